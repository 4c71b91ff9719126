//! Core types for the wirepack format

/// Identifies the encoded item that follows.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Unit = 0x01,
    BoolTrue = 0x02,
    BoolFalse = 0x03,
    U8 = 0x04,
    U16 = 0x05,
    U32 = 0x06,
    U64 = 0x07,
    S8 = 0x08,
    S16 = 0x09,
    S32 = 0x0A,
    S64 = 0x0B,
    F32 = 0x0C,
    F64 = 0x0D,
    Char = 0x0E,
    OptionNone = 0x0F,
    OptionSome = 0x10,
    String = 0x20,
    Blob = 0x21,
    List = 0x30,
}

impl Tag {
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Tag::Unit),
            0x02 => Some(Tag::BoolTrue),
            0x03 => Some(Tag::BoolFalse),
            0x04 => Some(Tag::U8),
            0x05 => Some(Tag::U16),
            0x06 => Some(Tag::U32),
            0x07 => Some(Tag::U64),
            0x08 => Some(Tag::S8),
            0x09 => Some(Tag::S16),
            0x0A => Some(Tag::S32),
            0x0B => Some(Tag::S64),
            0x0C => Some(Tag::F32),
            0x0D => Some(Tag::F64),
            0x0E => Some(Tag::Char),
            0x0F => Some(Tag::OptionNone),
            0x10 => Some(Tag::OptionSome),
            0x20 => Some(Tag::String),
            0x21 => Some(Tag::Blob),
            0x30 => Some(Tag::List),
            _ => None,
        }
    }

    /// Width of the fixed payload following the tag, or `None` for
    /// length-prefixed and nested items.
    pub const fn fixed_width(self) -> Option<usize> {
        match self {
            Tag::Unit | Tag::BoolTrue | Tag::BoolFalse | Tag::OptionNone => Some(0),
            Tag::U8 | Tag::S8 => Some(1),
            Tag::U16 | Tag::S16 => Some(2),
            Tag::U32 | Tag::S32 | Tag::F32 | Tag::Char => Some(4),
            Tag::U64 | Tag::S64 | Tag::F64 => Some(8),
            Tag::OptionSome | Tag::String | Tag::Blob | Tag::List => None,
        }
    }
}

/// Wirepack encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Buffer exhausted while reading.
    UnexpectedEnd,
    /// Byte does not correspond to a valid `Tag`.
    InvalidTag(u8),
    /// The item on the wire is not the one the reader asked for.
    TagMismatch { expected: Tag, found: Tag },
    /// String data is not valid UTF-8.
    InvalidUtf8,
    /// A `Char` item holds a value that is not a Unicode scalar.
    InvalidChar(u32),
    /// Blob or list length exceeds `u32::MAX`.
    BlobTooLarge(usize),
    /// `list_end` without a matching `list_begin`.
    ListUnderflow,
    /// Attempted to finalize the buffer with open lists.
    ListStillOpen(usize),
    /// Bytes were left over after the expected items were read.
    TrailingBytes(usize),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnexpectedEnd => write!(f, "unexpected end of input"),
            Error::InvalidTag(b) => write!(f, "invalid tag byte: {:#04x}", b),
            Error::TagMismatch { expected, found } => {
                write!(f, "tag mismatch: expected {:?}, found {:?}", expected, found)
            }
            Error::InvalidUtf8 => write!(f, "string is not valid utf-8"),
            Error::InvalidChar(v) => write!(f, "invalid char scalar: {:#x}", v),
            Error::BlobTooLarge(len) => write!(f, "blob of {} bytes exceeds u32 length", len),
            Error::ListUnderflow => write!(f, "list_end without list_begin"),
            Error::ListStillOpen(n) => write!(f, "{} list(s) still open", n),
            Error::TrailingBytes(n) => write!(f, "{} trailing byte(s) after last item", n),
        }
    }
}

impl std::error::Error for Error {}

/// Specialized `Result` for wirepack operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Append-only encoder with back-patched list lengths.

use crate::macros::encode_number;
use crate::macros::for_each_number;
use crate::types::Error;
use crate::types::Result;
use crate::types::Tag;

/// Writes wirepack items into an owned buffer.
///
/// Scalars cannot fail. Blobs and lists fail only when their length does not
/// fit the 4-byte length header. Open lists are tracked so `into_bytes`
/// refuses to hand out a buffer with an unpatched length.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    /// Offsets of the length headers of currently open lists.
    open: Vec<usize>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            open: Vec::new(),
        }
    }

    for_each_number!(encode_number);

    pub fn unit(&mut self) -> &mut Self {
        self.buf.push(Tag::Unit as u8);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        let tag = if v { Tag::BoolTrue } else { Tag::BoolFalse };
        self.buf.push(tag as u8);
        self
    }

    pub fn char(&mut self, v: char) -> &mut Self {
        self.buf.push(Tag::Char as u8);
        self.buf.extend_from_slice(&(v as u32).to_le_bytes());
        self
    }

    pub fn option_none(&mut self) -> &mut Self {
        self.buf.push(Tag::OptionNone as u8);
        self
    }

    /// Marks the next item as the payload of a `Some`.
    pub fn option_some(&mut self) -> &mut Self {
        self.buf.push(Tag::OptionSome as u8);
        self
    }

    pub fn str(&mut self, v: &str) -> Result<&mut Self> {
        self.blob_with_tag(Tag::String, v.as_bytes())
    }

    pub fn blob(&mut self, v: &[u8]) -> Result<&mut Self> {
        self.blob_with_tag(Tag::Blob, v)
    }

    fn blob_with_tag(&mut self, tag: Tag, v: &[u8]) -> Result<&mut Self> {
        let len = u32::try_from(v.len()).map_err(|_| Error::BlobTooLarge(v.len()))?;
        self.buf.push(tag as u8);
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(v);
        Ok(self)
    }

    pub fn list_begin(&mut self) -> &mut Self {
        self.buf.push(Tag::List as u8);
        self.open.push(self.buf.len());
        self.buf.extend_from_slice(&[0u8; 4]);
        self
    }

    pub fn list_end(&mut self) -> Result<&mut Self> {
        let header = self.open.pop().ok_or(Error::ListUnderflow)?;
        let body = self.buf.len() - header - 4;
        let len = u32::try_from(body).map_err(|_| Error::BlobTooLarge(body))?;
        self.buf[header..header + 4].copy_from_slice(&len.to_le_bytes());
        Ok(self)
    }

    /// Appends bytes that are already a sequence of encoded items.
    pub fn raw(&mut self, items: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(items);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the finalized bytes.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        if !self.open.is_empty() {
            return Err(Error::ListStillOpen(self.open.len()));
        }
        Ok(self.buf)
    }
}

//! Zero-copy, bounds-checked reader over an encoded buffer.

use crate::macros::decode_number;
use crate::macros::for_each_number;
use crate::types::Error;
use crate::types::Result;
use crate::types::Tag;

/// Reads wirepack items from a borrowed buffer.
///
/// Strings and blobs are returned as slices of the input. Every read either
/// consumes exactly one item or leaves the cursor untouched and returns an
/// error; nothing here panics on malformed input.
#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn peek_tag(&self) -> Result<Tag> {
        let byte = *self.buf.get(self.pos).ok_or(Error::UnexpectedEnd)?;
        Tag::from_u8(byte).ok_or(Error::InvalidTag(byte))
    }

    /// Skips one complete item, whatever it is.
    pub fn skip(&mut self) -> Result<()> {
        let start = self.pos;
        let result = self.skip_inner();
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn skip_inner(&mut self) -> Result<()> {
        let tag = self.peek_tag()?;
        self.pos += 1;
        match tag.fixed_width() {
            Some(width) => {
                self.take(width)?;
            }
            None if tag == Tag::OptionSome => self.skip_inner()?,
            None => {
                let len = self.read_len()?;
                self.take(len)?;
            }
        }
        Ok(())
    }

    for_each_number!(decode_number);

    pub fn unit(&mut self) -> Result<()> {
        self.expect_tag(Tag::Unit)
    }

    pub fn bool(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::BoolTrue => {
                self.pos += 1;
                Ok(true)
            }
            Tag::BoolFalse => {
                self.pos += 1;
                Ok(false)
            }
            found => Err(Error::TagMismatch { expected: Tag::BoolTrue, found }),
        }
    }

    pub fn char(&mut self) -> Result<char> {
        let start = self.pos;
        let v = self.u32_after_tag(Tag::Char)?;
        char::from_u32(v).ok_or_else(|| {
            self.pos = start;
            Error::InvalidChar(v)
        })
    }

    /// Returns `true` if a `Some` follows (its payload is the next item).
    pub fn option(&mut self) -> Result<bool> {
        match self.peek_tag()? {
            Tag::OptionNone => {
                self.pos += 1;
                Ok(false)
            }
            Tag::OptionSome => {
                self.pos += 1;
                Ok(true)
            }
            found => Err(Error::TagMismatch { expected: Tag::OptionSome, found }),
        }
    }

    pub fn str(&mut self) -> Result<&'a str> {
        let start = self.pos;
        let raw = self.blob_with_tag(Tag::String)?;
        std::str::from_utf8(raw).map_err(|_| {
            self.pos = start;
            Error::InvalidUtf8
        })
    }

    pub fn blob(&mut self) -> Result<&'a [u8]> {
        self.blob_with_tag(Tag::Blob)
    }

    /// Returns a decoder scoped to the body of the next list.
    pub fn list(&mut self) -> Result<Decoder<'a>> {
        let body = self.blob_with_tag(Tag::List)?;
        Ok(Decoder::new(body))
    }

    /// Fails if any bytes are left unread.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(Error::TrailingBytes(n)),
        }
    }

    fn blob_with_tag(&mut self, tag: Tag) -> Result<&'a [u8]> {
        let start = self.pos;
        self.expect_tag(tag)?;
        let result = self.read_len().and_then(|len| self.take(len));
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn u32_after_tag(&mut self, tag: Tag) -> Result<u32> {
        let start = self.pos;
        self.expect_tag(tag)?;
        let result = self.take(4).map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]));
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    fn read_len(&mut self) -> Result<usize> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
    }

    fn expect_tag(&mut self, expected: Tag) -> Result<()> {
        let found = self.peek_tag()?;
        if found != expected {
            return Err(Error::TagMismatch { expected, found });
        }
        self.pos += 1;
        Ok(())
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEnd);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

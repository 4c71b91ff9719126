//! `Pack`/`Unpack`: the typed face of the codec.
//!
//! Anything that crosses the wire as an argument, a return value or a feed
//! payload implements these two traits. Composite values are written as a
//! plain sequence of their parts, so a tuple `(a, b)` and the two separate
//! items `a`, `b` produce identical bytes.

use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::macros::for_each_number;
use crate::macros::pack_number;
use crate::macros::pack_tuple;
use crate::types::Result;

/// Writes `self` as one or more wirepack items.
pub trait Pack {
    fn pack(&self, enc: &mut Encoder) -> Result<()>;
}

/// Reads a value back from exactly the items its `Pack` impl wrote.
pub trait Unpack: Sized {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self>;
}

/// Encodes a single value into a fresh buffer.
pub fn to_bytes<T: Pack + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut enc = Encoder::new();
    value.pack(&mut enc)?;
    enc.into_bytes()
}

/// Decodes a single value, rejecting trailing bytes.
pub fn from_bytes<T: Unpack>(bytes: &[u8]) -> Result<T> {
    let mut dec = Decoder::new(bytes);
    let value = T::unpack(&mut dec)?;
    dec.finish()?;
    Ok(value)
}

/// Raw bytes written as a single blob item rather than a list of `u8`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Blob(pub Vec<u8>);

impl From<Vec<u8>> for Blob {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Blob {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Pack for Blob {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.blob(&self.0)?;
        Ok(())
    }
}

impl Unpack for Blob {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Self(dec.blob()?.to_vec()))
    }
}

for_each_number!(pack_number);

impl Pack for () {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.unit();
        Ok(())
    }
}

impl Unpack for () {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.unit()
    }
}

impl Pack for bool {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.bool(*self);
        Ok(())
    }
}

impl Unpack for bool {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.bool()
    }
}

impl Pack for char {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.char(*self);
        Ok(())
    }
}

impl Unpack for char {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        dec.char()
    }
}

impl Pack for str {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.str(self)?;
        Ok(())
    }
}

impl Pack for String {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        self.as_str().pack(enc)
    }
}

impl Unpack for String {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(dec.str()?.to_owned())
    }
}

impl<T: Pack + ?Sized> Pack for &T {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

impl<T: Pack + ?Sized> Pack for Box<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        (**self).pack(enc)
    }
}

impl<T: Unpack> Unpack for Box<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        Ok(Box::new(T::unpack(dec)?))
    }
}

impl<T: Pack> Pack for [T] {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        enc.list_begin();
        for item in self {
            item.pack(enc)?;
        }
        enc.list_end()?;
        Ok(())
    }
}

impl<T: Pack> Pack for Vec<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        self.as_slice().pack(enc)
    }
}

impl<T: Unpack> Unpack for Vec<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut body = dec.list()?;
        let mut items = Vec::new();
        while !body.is_empty() {
            items.push(T::unpack(&mut body)?);
        }
        Ok(items)
    }
}

impl<T: Pack> Pack for Option<T> {
    fn pack(&self, enc: &mut Encoder) -> Result<()> {
        match self {
            Some(v) => {
                enc.option_some();
                v.pack(enc)
            }
            None => {
                enc.option_none();
                Ok(())
            }
        }
    }
}

impl<T: Unpack> Unpack for Option<T> {
    fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
        if dec.option()? {
            Ok(Some(T::unpack(dec)?))
        } else {
            Ok(None)
        }
    }
}

pack_tuple!(A: 0);
pack_tuple!(A: 0, B: 1);
pack_tuple!(A: 0, B: 1, C: 2);
pack_tuple!(A: 0, B: 1, C: 2, D: 3);

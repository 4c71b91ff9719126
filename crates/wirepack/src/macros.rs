//! Scalar tables shared by the encoder, decoder and trait impls.

/// Calls `$m!(method, type, tag)` for every fixed-width number.
macro_rules! for_each_number {
    ($m:ident) => {
        $m!(u8,  u8,  U8);
        $m!(u16, u16, U16);
        $m!(u32, u32, U32);
        $m!(u64, u64, U64);
        $m!(i8,  i8,  S8);
        $m!(i16, i16, S16);
        $m!(i32, i32, S32);
        $m!(i64, i64, S64);
        $m!(f32, f32, F32);
        $m!(f64, f64, F64);
    };
}

/// Generates `Encoder::$name`, writing the tag then the little-endian value.
macro_rules! encode_number {
    ($name:ident, $ty:ty, $tag:ident) => {
        #[inline]
        pub fn $name(&mut self, v: $ty) -> &mut Self {
            self.buf.push(crate::types::Tag::$tag as u8);
            self.buf.extend_from_slice(&v.to_le_bytes());
            self
        }
    };
}

/// Generates `Decoder::$name`, checking the tag then reading the value.
macro_rules! decode_number {
    ($name:ident, $ty:ty, $tag:ident) => {
        #[inline]
        pub fn $name(&mut self) -> crate::types::Result<$ty> {
            let start = self.pos;
            self.expect_tag(crate::types::Tag::$tag)?;
            match self.take(std::mem::size_of::<$ty>()) {
                Ok(raw) => {
                    let mut le = [0u8; std::mem::size_of::<$ty>()];
                    le.copy_from_slice(raw);
                    Ok(<$ty>::from_le_bytes(le))
                }
                Err(e) => {
                    self.pos = start;
                    Err(e)
                }
            }
        }
    };
}

/// Generates `Pack` and `Unpack` for a number in terms of the methods above.
macro_rules! pack_number {
    ($name:ident, $ty:ty, $tag:ident) => {
        impl Pack for $ty {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                enc.$name(*self);
                Ok(())
            }
        }

        impl Unpack for $ty {
            fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
                dec.$name()
            }
        }
    };
}

/// Generates sequential `Pack`/`Unpack` for a tuple of the given arity.
macro_rules! pack_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Pack),+> Pack for ($($name,)+) {
            fn pack(&self, enc: &mut Encoder) -> Result<()> {
                $(self.$idx.pack(enc)?;)+
                Ok(())
            }
        }

        impl<$($name: Unpack),+> Unpack for ($($name,)+) {
            fn unpack(dec: &mut Decoder<'_>) -> Result<Self> {
                Ok(($($name::unpack(dec)?,)+))
            }
        }
    };
}

pub(crate) use for_each_number;
pub(crate) use encode_number;
pub(crate) use decode_number;
pub(crate) use pack_number;
pub(crate) use pack_tuple;

//! # Wirepack
//!
//! A small, tagged, little-endian binary codec for RPC arguments, results and
//! feed payloads.
//!
//! ## Format
//!
//! - **Scalars**: `[Tag: 1b][Data: N]`
//! - **Blobs**: `[Tag: 1b][Len: 4b][Data: Len]` (strings and raw bytes)
//! - **Lists**: `[Tag: 1b][Len: 4b][Body: Len]`
//! - **Options**: `[OptionNone]` or `[OptionSome][Item]`
//!
//! Items written at the root are simply concatenated, which is how a call
//! packs its arguments: one item per argument, in declaration order.
//!
//! ## Determinism
//!
//! Every `Pack` impl writes exactly the bytes its `Unpack` counterpart reads,
//! so `from_bytes(to_bytes(v)) == v` for every supported type.

mod macros;

pub mod types;
pub mod encoder;
pub mod decoder;
pub mod traits;

pub use types::Error;
pub use types::Result;
pub use types::Tag;

pub use encoder::Encoder;
pub use decoder::Decoder;

pub use traits::Blob;
pub use traits::Pack;
pub use traits::Unpack;
pub use traits::from_bytes;
pub use traits::to_bytes;

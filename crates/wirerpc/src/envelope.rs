//! # Envelopes
//!
//! Every frame exchanged between a client and a server is one envelope: a
//! sequence of root wirepack items, starting with a classification byte.
//!
//! | Classification | Byte | Fields                                    |
//! |----------------|------|-------------------------------------------|
//! | Call           | 1    | protocol, function, correlation, args     |
//! | Result         | 2    | correlation, value                        |
//! | Error          | 3    | correlation, code, message                |
//! | Feed           | 4    | protocol, feed, payload                   |
//! | Subscribe      | 5    | protocol, feed                            |
//! | Unsubscribe    | 6    | protocol, feed                            |
//!
//! Arguments, values and payloads are blobs holding already-encoded items,
//! so decoding an envelope never touches user data. A decoded `Envelope`
//! borrows those blobs straight out of the frame.

use wirepack::Decoder;
use wirepack::Encoder;

use crate::error::CallError;
use crate::handles::CorrelationId;
use crate::handles::FeedId;
use crate::handles::FunctionId;
use crate::handles::ProtocolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Classification {
    Call = 1,
    Result = 2,
    Error = 3,
    Feed = 4,
    Subscribe = 5,
    Unsubscribe = 6,
}

impl Classification {
    pub fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            1 => Self::Call,
            2 => Self::Result,
            3 => Self::Error,
            4 => Self::Feed,
            5 => Self::Subscribe,
            6 => Self::Unsubscribe,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    Codec(wirepack::Error),
    UnknownClassification(u8),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Codec(e) => write!(f, "malformed envelope: {}", e),
            Error::UnknownClassification(b) => write!(f, "unknown classification {}", b),
        }
    }
}

impl std::error::Error for Error {}

impl From<wirepack::Error> for Error {
    fn from(e: wirepack::Error) -> Self {
        Error::Codec(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// One decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Envelope<'a> {
    Call {
        protocol: ProtocolId,
        function: FunctionId,
        correlation: CorrelationId,
        args: &'a [u8],
    },
    Result {
        correlation: CorrelationId,
        value: &'a [u8],
    },
    Error {
        correlation: CorrelationId,
        code: u64,
        message: &'a str,
    },
    Feed {
        protocol: ProtocolId,
        feed: FeedId,
        payload: &'a [u8],
    },
    Subscribe {
        protocol: ProtocolId,
        feed: FeedId,
    },
    Unsubscribe {
        protocol: ProtocolId,
        feed: FeedId,
    },
}

impl<'a> Envelope<'a> {
    /// Borrows an outbound error reply for `correlation`.
    pub fn error(correlation: CorrelationId, error: &'a CallError) -> Self {
        Envelope::Error { correlation, code: error.code, message: &error.message }
    }

    pub fn classification(&self) -> Classification {
        match self {
            Envelope::Call { .. } => Classification::Call,
            Envelope::Result { .. } => Classification::Result,
            Envelope::Error { .. } => Classification::Error,
            Envelope::Feed { .. } => Classification::Feed,
            Envelope::Subscribe { .. } => Classification::Subscribe,
            Envelope::Unsubscribe { .. } => Classification::Unsubscribe,
        }
    }

    /// The correlation id of a reply or call, if this envelope carries one.
    pub fn correlation(&self) -> Option<CorrelationId> {
        match *self {
            Envelope::Call { correlation, .. }
            | Envelope::Result { correlation, .. }
            | Envelope::Error { correlation, .. } => Some(correlation),
            _ => None,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        enc.u8(self.classification() as u8);
        match *self {
            Envelope::Call { protocol, function, correlation, args } => {
                enc.u32(protocol).u32(function).u64(correlation).blob(args)?;
            }
            Envelope::Result { correlation, value } => {
                enc.u64(correlation).blob(value)?;
            }
            Envelope::Error { correlation, code, message } => {
                enc.u64(correlation).u64(code).str(message)?;
            }
            Envelope::Feed { protocol, feed, payload } => {
                enc.u32(protocol).u32(feed).blob(payload)?;
            }
            Envelope::Subscribe { protocol, feed } | Envelope::Unsubscribe { protocol, feed } => {
                enc.u32(protocol).u32(feed);
            }
        }
        Ok(enc.into_bytes()?)
    }

    pub fn decode(frame: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(frame);
        let byte = dec.u8()?;
        let class = Classification::from_u8(byte).ok_or(Error::UnknownClassification(byte))?;
        let envelope = match class {
            Classification::Call => Envelope::Call {
                protocol: dec.u32()?,
                function: dec.u32()?,
                correlation: dec.u64()?,
                args: dec.blob()?,
            },
            Classification::Result => Envelope::Result {
                correlation: dec.u64()?,
                value: dec.blob()?,
            },
            Classification::Error => Envelope::Error {
                correlation: dec.u64()?,
                code: dec.u64()?,
                message: dec.str()?,
            },
            Classification::Feed => Envelope::Feed {
                protocol: dec.u32()?,
                feed: dec.u32()?,
                payload: dec.blob()?,
            },
            Classification::Subscribe => Envelope::Subscribe {
                protocol: dec.u32()?,
                feed: dec.u32()?,
            },
            Classification::Unsubscribe => Envelope::Unsubscribe {
                protocol: dec.u32()?,
                feed: dec.u32()?,
            },
        };
        dec.finish()?;
        Ok(envelope)
    }
}

/// Reads just the classification and correlation id of a frame that may be
/// otherwise malformed. Used to answer a broken call instead of dropping it.
pub fn peek_correlation(frame: &[u8]) -> Option<(Classification, CorrelationId)> {
    let mut dec = Decoder::new(frame);
    let class = Classification::from_u8(dec.u8().ok()?)?;
    match class {
        Classification::Call => {
            dec.u32().ok()?;
            dec.u32().ok()?;
            Some((class, dec.u64().ok()?))
        }
        Classification::Result | Classification::Error => Some((class, dec.u64().ok()?)),
        _ => None,
    }
}

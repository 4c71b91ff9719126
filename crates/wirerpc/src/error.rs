//! # Call Errors
//!
//! `CallError` is the only structured failure that crosses the wire. It is
//! produced by user callables (business errors) or by the framework itself
//! (unknown function, undecodable arguments, timeout, lost connection), and it
//! reaches the caller exclusively through a failed `Promise`.
//!
//! Framework failures use codes in the reserved range starting at
//! [`codes::RESERVED_BASE`]; business codes should stay below it.

use std::time::Duration;

use wirepack::Decoder;
use wirepack::Encoder;
use wirepack::Pack;
use wirepack::Unpack;

use crate::handles::ConnectionId;
use crate::handles::FunctionId;
use crate::handles::ProtocolId;

/// Reserved error codes used by the framework.
pub mod codes {
    pub const RESERVED_BASE: u64 = 0xFFFF_0000_0000_0000;
    pub const FUNCTION_NOT_FOUND: u64 = RESERVED_BASE + 1;
    pub const DECODE_FAILURE: u64 = RESERVED_BASE + 2;
    pub const CONNECTION_LOST: u64 = RESERVED_BASE + 3;
    pub const TIMEOUT: u64 = RESERVED_BASE + 4;
    pub const COULD_NOT_DELIVER: u64 = RESERVED_BASE + 5;
    pub const INTERNAL: u64 = RESERVED_BASE + 6;
}

/// Classification of a `CallError` by its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The protocol or function id is not registered.
    FunctionNotFound,
    /// The argument (or reply) bytes did not match the expected signature.
    DecodeFailure,
    /// Raised by user code; carries its own code and message.
    Business,
    /// The connection carrying the call went away before a reply arrived.
    ConnectionLost,
    /// No reply arrived within the dispatcher's exchange timeout.
    Timeout,
    /// The transport refused the outbound call.
    CouldNotDeliver,
    /// The callable panicked or its result could not be encoded.
    Internal,
}

/// A failed call outcome: `{code, message}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallError {
    pub code: u64,
    pub message: String,
}

impl CallError {
    pub fn new(code: u64, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    /// An error raised by user code.
    pub fn business(code: u64, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    pub fn function_not_found(protocol: ProtocolId, function: FunctionId) -> Self {
        Self::new(
            codes::FUNCTION_NOT_FOUND,
            format!("no function {} in protocol {}", function, protocol),
        )
    }

    pub fn protocol_not_found(protocol: ProtocolId) -> Self {
        Self::new(codes::FUNCTION_NOT_FOUND, format!("no protocol {}", protocol))
    }

    pub fn decode_failure(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::DECODE_FAILURE, format!("decode failure: {}", detail))
    }

    pub fn connection_lost(connection: ConnectionId) -> Self {
        Self::new(codes::CONNECTION_LOST, format!("connection {} lost", connection))
    }

    pub fn timeout(age: Duration) -> Self {
        Self::new(codes::TIMEOUT, format!("no reply after {:?}", age))
    }

    pub fn could_not_deliver(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::COULD_NOT_DELIVER, format!("could not deliver request: {}", detail))
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self::new(codes::INTERNAL, detail.to_string())
    }

    pub fn kind(&self) -> ErrorKind {
        match self.code {
            codes::FUNCTION_NOT_FOUND => ErrorKind::FunctionNotFound,
            codes::DECODE_FAILURE => ErrorKind::DecodeFailure,
            codes::CONNECTION_LOST => ErrorKind::ConnectionLost,
            codes::TIMEOUT => ErrorKind::Timeout,
            codes::COULD_NOT_DELIVER => ErrorKind::CouldNotDeliver,
            codes::INTERNAL => ErrorKind::Internal,
            _ => ErrorKind::Business,
        }
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind() == kind
    }
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind() {
            ErrorKind::Business => write!(f, "remote error {}: {}", self.code, self.message),
            kind => write!(f, "{:?}: {}", kind, self.message),
        }
    }
}

impl std::error::Error for CallError {}

impl From<wirepack::Error> for CallError {
    fn from(e: wirepack::Error) -> Self {
        Self::decode_failure(e)
    }
}

impl Pack for CallError {
    fn pack(&self, enc: &mut Encoder) -> wirepack::Result<()> {
        enc.u64(self.code).str(&self.message)?;
        Ok(())
    }
}

impl Unpack for CallError {
    fn unpack(dec: &mut Decoder<'_>) -> wirepack::Result<Self> {
        let code = dec.u64()?;
        let message = dec.str()?.to_owned();
        Ok(Self { code, message })
    }
}

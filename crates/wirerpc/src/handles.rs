//! Identifiers shared by every layer of the framework.

/// Identifies a protocol (a numbered bundle of functions and feeds) within a service.
pub type ProtocolId = u32;

/// Identifies one callable within a protocol.
pub type FunctionId = u32;

/// Identifies one push channel within a protocol.
pub type FeedId = u32;

/// Tags a call and its eventual result or error. Allocated by a `Dispatcher`.
pub type CorrelationId = u64;

/// Opaque handle for one transport connection.
///
/// Servers allocate these as connections are attached; clients pick their own
/// so that several clients can share one dispatcher without colliding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

//! Shapes of the CQL-family wire messages the core reads and writes. The
//! frame codec itself — bytes on the wire — is an excluded external
//! collaborator; these types are just the vocabulary the Control
//! Connection pattern-matches on, the same way
//! `discovery::client::ConsulService` is a thin shape a client reads
//! without owning the HTTP/JSON wire format underneath it.

use std::collections::HashMap;

/// Error code the server uses to signal a protocol version mismatch.
/// Negotiation walks the protocol version down on this code; any other
/// code is a candidate-level failure.
pub const PROTOCOL_MISMATCH_CODE: i32 = 0x0A;

/// Default CQL-family port.
pub const DEFAULT_PORT: u16 = 9042;

/// One already-decoded row. Typed column decoding is out of scope here;
/// the core only ever reads a handful of well-known string columns out
/// of `system.local`/`system.peers` rows.
pub type Row = HashMap<String, String>;

#[derive(Debug, Clone)]
pub enum Request {
    Options,
    Startup { cql_version: String },
    AuthResponse { token: Vec<u8> },
    Register { event_types: Vec<EventType> },
    Query { cql: String, params: Vec<String> },
}

#[derive(Debug, Clone)]
pub enum QueryResult {
    Rows(Vec<Row>),
    SetKeyspace,
    Void,
}

#[derive(Debug, Clone)]
pub enum Response {
    Supported,
    Ready,
    Authenticate { authenticator: String },
    AuthSuccess,
    Result(QueryResult),
    Error { code: i32, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    StatusChange,
    TopologyChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologyKind {
    NewNode,
    RemovedNode,
}

/// A server-pushed event frame. `address` arrives in whatever form the
/// wire uses (binary/structured); the event handler normalizes it to a
/// canonical IP string before touching the Registry. The
/// port component of the event is always ignored.
#[derive(Debug, Clone)]
pub enum Event {
    StatusChange { status: StatusKind, address: String },
    TopologyChange { kind: TopologyKind, address: String },
}

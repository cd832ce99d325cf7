use std::collections::HashMap;
use std::fmt;

/// Errors produced while attempting a single connect candidate or an
/// in-steady-state discovery query. These never escape the core directly —
/// they're recorded per-IP and surfaced wrapped in
/// [`NoHostsAvailable`] once every candidate is exhausted, or logged and
/// swallowed once the connection is established.
#[derive(Debug, Clone)]
pub enum ControlError {
    /// Could not open a transport connection to the candidate.
    Transport(String),
    /// A request exceeded its configured deadline.
    Timeout,
    /// Server rejected a discovery/event-subscription query.
    Query(String),
    /// `system.local` returned no row.
    EmptyCluster,
    /// Credentials were rejected, or the negotiated protocol version does
    /// not support the auth exchange the server demanded.
    Authentication(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Transport(msg) => write!(f, "transport error: {msg}"),
            ControlError::Timeout => write!(f, "request timed out"),
            ControlError::Query(msg) => write!(f, "query error: {msg}"),
            ControlError::EmptyCluster => write!(f, "system.local returned no row"),
            ControlError::Authentication(msg) => write!(f, "authentication error: {msg}"),
        }
    }
}

impl std::error::Error for ControlError {}

/// Raised when every candidate IP in the registry failed during
/// `connect_async`. Carries the last observed error per IP.
#[derive(Debug, Clone, Default)]
pub struct NoHostsAvailable {
    pub errors: HashMap<String, ControlError>,
}

impl fmt::Display for NoHostsAvailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no hosts available, tried {} candidate(s)", self.errors.len())?;
        for (ip, err) in &self.errors {
            write!(f, "; {ip}: {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for NoHostsAvailable {}

/// The error surface that escapes `connect_async`.
#[derive(Debug, Clone)]
pub enum ConnectError {
    NoHostsAvailable(NoHostsAvailable),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::NoHostsAvailable(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<NoHostsAvailable> for ConnectError {
    fn from(e: NoHostsAvailable) -> Self {
        ConnectError::NoHostsAvailable(e)
    }
}

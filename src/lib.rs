//! Client-side cluster control subsystem for a distributed wide-column
//! database speaking a framed binary wire protocol (CQL-family): the
//! long-lived administrative connection, the in-memory host registry it
//! keeps synchronized with the cluster, and the reconnection supervisor
//! that survives transport loss. Query execution, request routing, row
//! decoding, and user-facing session APIs are external collaborators.

pub mod auth;
pub mod control;
pub mod error;
pub mod host;
pub mod logger;
pub mod protocol;
pub mod reactor;
pub mod registry;
pub mod settings;

pub use auth::{AuthProvider, PasswordAuthProvider};
pub use control::ControlConnection;
pub use error::{ConnectError, ControlError, NoHostsAvailable};
pub use host::Host;
pub use logger::{Logger, TracingLogger};
pub use reactor::{Connection, DirectRequestRunner, IoReactor, RequestRunner, TimerHandle};
pub use registry::{ClusterListener, Registry};
pub use settings::{Settings, SettingsBuilder};

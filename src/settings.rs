use crate::auth::AuthProvider;
use crate::logger::{Logger, TracingLogger};
use crate::protocol::DEFAULT_PORT;
use crate::registry::ClusterListener;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Mutable, process-scoped driver configuration. Shared by
/// reference between the core and external callers; the only field the
/// core ever mutates is `protocol_version`, and only during negotiation
/// — everything else is set once at construction.
///
/// Mirrors `hermes_gateway::server::state::GatewayState`'s pattern of a
/// plain owned record handed out via `Arc`, with interior mutability
/// scoped to the one field that legitimately changes at runtime. No
/// runtime dispatch beyond the listener and reactor contracts is needed,
/// so there's no dependency-injection container here.
pub struct Settings {
    protocol_version: AtomicU8,
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    pub reconnect_interval: Duration,
    pub logger: Arc<dyn Logger>,
    pub load_balancing_policy: Arc<dyn ClusterListener>,
    pub default_port: u16,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
}

impl Settings {
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version.load(Ordering::Acquire)
    }

    /// Written only during negotiation.
    pub fn set_protocol_version(&self, version: u8) {
        self.protocol_version.store(version, Ordering::Release);
    }

    pub fn builder(load_balancing_policy: Arc<dyn ClusterListener>) -> SettingsBuilder {
        SettingsBuilder::new(load_balancing_policy)
    }
}

/// Builder/factory for `Settings`: a plain record with constructor-literal
/// defaults, assembled fluently before being frozen into an `Arc`.
pub struct SettingsBuilder {
    max_protocol_version: u8,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    reconnect_interval: Duration,
    logger: Arc<dyn Logger>,
    load_balancing_policy: Arc<dyn ClusterListener>,
    default_port: u16,
    connection_timeout: Duration,
    request_timeout: Duration,
}

impl SettingsBuilder {
    pub fn new(load_balancing_policy: Arc<dyn ClusterListener>) -> Self {
        Self {
            max_protocol_version: 4,
            auth_provider: None,
            reconnect_interval: Duration::from_secs(1),
            logger: Arc::new(TracingLogger),
            load_balancing_policy,
            default_port: DEFAULT_PORT,
            connection_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn max_protocol_version(mut self, version: u8) -> Self {
        self.max_protocol_version = version;
        self
    }

    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = interval;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn default_port(mut self, port: u16) -> Self {
        self.default_port = port;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<Settings> {
        Arc::new(Settings {
            protocol_version: AtomicU8::new(self.max_protocol_version),
            auth_provider: self.auth_provider,
            reconnect_interval: self.reconnect_interval,
            logger: self.logger,
            load_balancing_policy: self.load_balancing_policy,
            default_port: self.default_port,
            connection_timeout: self.connection_timeout,
            request_timeout: self.request_timeout,
        })
    }
}

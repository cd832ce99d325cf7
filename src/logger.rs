//! The `Logger` collaborator contract. The core only ever calls
//! `debug`/`info`/`warn`/`error` with a pre-formatted line; the default
//! implementation forwards to `tracing`, matching the prefixing convention
//! used throughout the rest of this codebase ("module: action, field=value").

/// Free-form line logger. A driver embeds this crate alongside its own
/// logging setup and can supply any implementation; the default one below
/// is what's wired in when nothing else is configured.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Default `Logger` impl, backed by `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!("{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!("{}", message);
    }
}

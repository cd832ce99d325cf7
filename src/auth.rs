//! Authentication provider contract, engaged only when the server replies
//! `Authenticate` to `Startup`.

use async_trait::async_trait;

/// Evaluates a single authentication challenge-response round trip. A
/// `PasswordAuthenticator`-style provider answers the initial challenge
/// with credentials and expects no further round trips; the trait allows
/// more elaborate SASL-style exchanges without the core needing to know
/// the mechanism.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// `authenticator` is the class/mechanism name the server announced in
    /// the `Authenticate` response. Returns the bytes to send back as
    /// `AuthResponse`. Plumbing-level failures (missing credentials,
    /// misconfigured mechanism) are plain `anyhow::Error`; the core wraps
    /// them into the typed `ControlError::Authentication` on the way out.
    async fn initial_response(&self, authenticator: &str) -> anyhow::Result<Vec<u8>>;
}

/// The common case: a single username/password pair sent as one
/// `AuthResponse`, no further challenge handled.
pub struct PasswordAuthProvider {
    pub username: String,
    pub password: String,
}

impl PasswordAuthProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthProvider for PasswordAuthProvider {
    async fn initial_response(&self, _authenticator: &str) -> anyhow::Result<Vec<u8>> {
        let mut token = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        token.push(0);
        token.extend_from_slice(self.username.as_bytes());
        token.push(0);
        token.extend_from_slice(self.password.as_bytes());
        Ok(token)
    }
}

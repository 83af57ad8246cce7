//! Token provider port (driven/secondary port)
//!
//! The engine never acquires or refreshes credentials itself. It asks this
//! port for a valid token at the start of each cycle and aborts the cycle
//! with [`AuthError`] when none is available.

use thiserror::Error;

/// Bearer credential handed out by the provider
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Why no valid token could be obtained
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("Token expired and could not be refreshed: {0}")]
    Expired(String),

    #[error("Credentials rejected: {0}")]
    Rejected(String),
}

/// Port trait for obtaining access tokens
#[async_trait::async_trait]
pub trait ITokenProvider: Send + Sync {
    async fn get_valid_token(&self) -> Result<AccessToken, AuthError>;
}

/// Provider for remotes that need no credentials, or whose adapter
/// authenticates on its own
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<AccessToken>,
}

impl StaticTokenProvider {
    /// Always hands out `token`
    pub fn new(token: AccessToken) -> Self {
        Self { token: Some(token) }
    }

    /// Always fails with [`AuthError::NotSignedIn`]
    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait::async_trait]
impl ITokenProvider for StaticTokenProvider {
    async fn get_valid_token(&self) -> Result<AccessToken, AuthError> {
        self.token.clone().ok_or(AuthError::NotSignedIn)
    }
}

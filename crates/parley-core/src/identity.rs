use std::collections::HashMap;

use async_trait::async_trait;

use crate::ids::UserId;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Verifies a bearer token into a stable user id. Consumed exactly once,
/// at connection-register time.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<UserId, AuthError>;
}

/// Fixed token table for development and tests.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    /// Parse `token:user,token:user,...` (the shape of the PARLEY_TOKENS
    /// environment variable).
    pub fn from_spec(spec: &str) -> Self {
        let tokens = spec
            .split(',')
            .filter_map(|pair| {
                let (token, user) = pair.split_once(':')?;
                let token = token.trim();
                let user = user.trim();
                if token.is_empty() || user.is_empty() {
                    return None;
                }
                Some((token.to_string(), UserId::from_raw(user)))
            })
            .collect();
        Self { tokens }
    }

    pub fn insert(&mut self, token: impl Into<String>, user: UserId) {
        self.tokens.insert(token.into(), user);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenVerifier {
    async fn verify_token(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

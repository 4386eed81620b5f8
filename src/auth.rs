use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::AuthError;

/// Stable identity of an authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Resolves bearer tokens issued by the identity provider.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Default, Clone)]
pub struct StaticTokenAuthenticator {
    tokens: Arc<DashMap<String, UserId>>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&self, token: impl Into<String>, user_id: impl Into<String>) {
        self.tokens.insert(token.into(), UserId(user_id.into()));
    }

    /// Parses `TOKEN:USER_ID` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let auth = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (token, user) = pair
                .split_once(':')
                .ok_or_else(|| anyhow::anyhow!("expected TOKEN:USER_ID, got {pair}"))?;
            anyhow::ensure!(
                !token.is_empty() && !user.is_empty(),
                "token and user id must be non-empty"
            );
            auth.add_token(token, user);
        }
        Ok(auth)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        self.tokens
            .get(token)
            .map(|entry| entry.value().clone())
            .ok_or(AuthError::InvalidToken)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingToken)?;
    let (scheme, token) = header.split_once(' ').ok_or(AuthError::InvalidToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidToken);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}

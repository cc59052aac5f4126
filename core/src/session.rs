//! Authentication and version state owned by the surrounding application.

use std::sync::{PoisonError, RwLock};

/// The application's API session.
///
/// The requester reads the token on every call. Updating it while requests
/// are in flight is allowed; which value an in-flight request sees is
/// unspecified.
#[derive(Debug)]
pub struct ApiSession {
    token: RwLock<Option<String>>,
    version: String,
}

impl ApiSession {
    pub fn new(version: &str) -> Self {
        Self {
            token: RwLock::new(None),
            version: version.to_string(),
        }
    }

    pub fn with_token(version: &str, token: &str) -> Self {
        let session = Self::new(version);
        session.set_token(token);
        session
    }

    pub fn set_token(&self, token: &str) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Current token. An empty string counts as no token.
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|token| !token.is_empty())
            .cloned()
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

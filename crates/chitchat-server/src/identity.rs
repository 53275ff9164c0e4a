//! Request identity.
//!
//! Credentials are checked upstream. The server only reads the identity an
//! authenticating proxy attached to the request and hands handlers a typed
//! [`AuthContext`].

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use chitchat_protocol::Identity;
use std::sync::Arc;

use crate::config::IdentityConfig;
use crate::error::ApiError;
use crate::handlers::AppState;

/// Identity and channel of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub identity: Identity,
    pub channel: String,
}

/// Resolves the caller of a request.
pub trait IdentityProvider: Send + Sync {
    /// Produce the caller's identity from the request headers.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Unauthorized`] if the request carries no usable identity.
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ApiError>;
}

/// Reads identity from headers set by a trusted proxy.
#[derive(Debug, Clone)]
pub struct HeaderIdentityProvider {
    config: IdentityConfig,
}

impl HeaderIdentityProvider {
    #[must_use]
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    fn optional(headers: &HeaderMap, name: &str) -> Result<Option<String>, ApiError> {
        let Some(value) = headers.get(name) else {
            return Ok(None);
        };
        let value = value
            .to_str()
            .map_err(|_| ApiError::Unauthorized(format!("malformed header {name}")))?
            .trim();
        Ok((!value.is_empty()).then(|| value.to_string()))
    }

    fn required(headers: &HeaderMap, name: &str) -> Result<String, ApiError> {
        Self::optional(headers, name)?
            .ok_or_else(|| ApiError::Unauthorized(format!("missing header {name}")))
    }
}

impl IdentityProvider for HeaderIdentityProvider {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
        let id = Self::required(headers, &self.config.user_id_header)?;
        let name = Self::required(headers, &self.config.user_name_header)?;
        let channel = Self::required(headers, &self.config.channel_header)?;

        let mut identity = Identity::new(id, name);
        if let Some(avatar) = Self::optional(headers, &self.config.avatar_header)? {
            identity = identity.with_avatar(avatar);
        }
        Ok(AuthContext { identity, channel })
    }
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        state.identity.authenticate(&parts.headers)
    }
}

//! Caller identity.
//!
//! Authentication happens upstream. The verified `(tenantId, userId,
//! username)` triple arrives as request headers and is threaded explicitly
//! into every tenant-scoped operation as an [`Actor`].

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use taskhub_proto::task::{TenantId, UserId};

use crate::error::HubError;

/// Header carrying the verified tenant id.
pub const TENANT_HEADER: &str = "x-tenant-id";
/// Header carrying the verified user id.
pub const USER_HEADER: &str = "x-user-id";
/// Header carrying the verified display name.
pub const USERNAME_HEADER: &str = "x-username";

/// Display name stamped on changes made through a public share link.
pub const PUBLIC_USERNAME: &str = "Public User";
/// User id recorded for changes made through a public share link.
pub const PUBLIC_USER_ID: &str = "public";

/// The authenticated caller of a tenant-scoped operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    /// Tenant the caller belongs to.
    pub tenant_id: TenantId,
    /// Caller's user id.
    pub user_id: UserId,
    /// Caller's display name.
    pub username: String,
}

impl Actor {
    /// Builds an actor from its three identity parts.
    pub fn new(
        tenant_id: impl Into<String>,
        user_id: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: TenantId::new(tenant_id),
            user_id: UserId::new(user_id),
            username: username.into(),
        }
    }

    /// Reads the identity triple from request headers.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Unauthorized`] if any header is missing or blank.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, HubError> {
        let tenant = header_value(headers, TENANT_HEADER)
            .ok_or_else(|| HubError::Unauthorized("missing tenant identity".to_string()))?;
        let user = header_value(headers, USER_HEADER)
            .ok_or_else(|| HubError::Unauthorized("missing user identity".to_string()))?;
        let username = header_value(headers, USERNAME_HEADER)
            .ok_or_else(|| HubError::Unauthorized("missing username".to_string()))?;
        Ok(Self::new(tenant, user, username))
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = HubError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
    }
}

/// Optional identity attached to a hub connection at upgrade time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionIdentity {
    /// Tenant id, if the upgrade request carried one.
    pub tenant_id: Option<TenantId>,
    /// User id, if the upgrade request carried one.
    pub user_id: Option<UserId>,
}

impl ConnectionIdentity {
    /// Reads whatever identity headers are present. Never fails.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            tenant_id: header_value(headers, TENANT_HEADER).map(TenantId::new),
            user_id: header_value(headers, USER_HEADER).map(UserId::new),
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

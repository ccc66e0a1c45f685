//! Identity of the caller.
//!
//! Authentication happens elsewhere. Whatever authenticates a request stores a
//! [`Principal`] in the request extensions, and handlers read it back through the
//! [`CurrentUser`] extractor:
//!
//! ```rust,ignore
//! async fn authenticate(mut req: Request, next: Next) -> Response {
//!     let principal = verify_token(&req)?;
//!     req.extensions_mut().insert(principal);
//!     next.run(req).await
//! }
//! ```

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::convert::Infallible;

/// An authenticated user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(id: i64, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            roles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Role inheritance: each role grants the roles listed under it, transitively.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleHierarchy {
    hierarchy: HashMap<String, Vec<String>>,
}

impl RoleHierarchy {
    #[must_use]
    pub fn new(hierarchy: HashMap<String, Vec<String>>) -> Self {
        Self { hierarchy }
    }

    #[must_use]
    pub fn with_role<I, S>(mut self, role: impl Into<String>, grants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hierarchy
            .insert(role.into(), grants.into_iter().map(Into::into).collect());
        self
    }

    /// `roles` plus every role reachable from them, each listed once in discovery order.
    #[must_use]
    pub fn reachable_roles(&self, roles: &[String]) -> Vec<String> {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut reachable = Vec::new();
        let mut queue: VecDeque<&str> = roles.iter().map(String::as_str).collect();

        while let Some(role) = queue.pop_front() {
            if !seen.insert(role) {
                continue;
            }
            reachable.push(role.to_string());
            if let Some(grants) = self.hierarchy.get(role) {
                queue.extend(grants.iter().map(String::as_str));
            }
        }
        reachable
    }
}

/// The principal stored in the request extensions, if any.
#[derive(Clone, Debug, Default)]
pub struct CurrentUser(pub Option<Principal>);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(parts.extensions.get::<Principal>().cloned()))
    }
}

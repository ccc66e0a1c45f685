//! Named routes.
//!
//! Handlers refer to routes by name (`api_get_widget`) and never by path. A [`UrlGenerator`]
//! resolves the name to a path template such as `/api/widgets/{id}` and fills it in.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

use crate::errors::{HandlerError, HandlerErrorKind};

/// Verbs an entity route can be configured for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteKey {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RouteKey {
    pub const ALL: [Self; 5] = [Self::Get, Self::Post, Self::Put, Self::Patch, Self::Delete];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Post => "post",
            Self::Put => "put",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }

    /// Whether routes for this key address one entity through an `{id}` placeholder.
    #[must_use]
    pub const fn is_item(self) -> bool {
        !matches!(self, Self::Post)
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteKey {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == value)
            .ok_or_else(|| {
                HandlerError::new(
                    HandlerErrorKind::InvalidEntityRouteKey,
                    format!("Unable to find entity route ({value})"),
                )
            })
    }
}

/// Builds URLs for named routes.
pub trait UrlGenerator: Send + Sync {
    /// # Errors
    ///
    /// Fails when `route` is unknown or a placeholder has no value.
    fn generate(&self, route: &str, params: &[(&str, String)]) -> Result<String, HandlerError>;
}

/// Route names mapped to path templates such as `/widgets/{id}`.
///
/// Parameters filling a `{placeholder}` are substituted percent-encoded; the rest are appended
/// as a form-urlencoded query string in the order given.
#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl RouteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_route(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.insert(name, path);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, path: impl Into<String>) {
        self.routes.insert(name.into(), path.into());
    }

    /// Registers the derived route names of one resource (`<prefix><key>_<var_name>`)
    /// against `base_path` and `base_path/{id}`.
    #[must_use]
    pub fn for_resource(prefix: &str, var_name: &str, base_path: &str) -> Self {
        let base = base_path.trim_end_matches('/');
        let mut table = Self::new();
        for key in RouteKey::ALL {
            let path = if key.is_item() {
                format!("{base}/{{id}}")
            } else {
                base.to_string()
            };
            table.insert(format!("{prefix}{key}_{var_name}"), path);
        }
        table
    }

    #[must_use]
    pub fn path(&self, name: &str) -> Option<&str> {
        self.routes.get(name).map(String::as_str)
    }
}

impl UrlGenerator for RouteTable {
    fn generate(&self, route: &str, params: &[(&str, String)]) -> Result<String, HandlerError> {
        let template = self.path(route).ok_or_else(|| {
            HandlerError::new(
                HandlerErrorKind::InvalidKey,
                format!("Unable to generate a URL for the named route \"{route}\""),
            )
        })?;

        let mut url = template.to_string();
        let mut query = form_urlencoded::Serializer::new(String::new());
        let mut has_query = false;
        for (name, value) in params {
            let placeholder = format!("{{{name}}}");
            if url.contains(&placeholder) {
                url = url.replace(&placeholder, &url_escape::encode_component(value));
            } else {
                query.append_pair(name, value);
                has_query = true;
            }
        }

        if let Some(start) = url.find('{') {
            let missing = url[start..].split('}').next().unwrap_or_default();
            return Err(HandlerError::bad_request(format!(
                "Missing parameter \"{}\" for route \"{route}\"",
                missing.trim_start_matches('{')
            )));
        }

        if has_query {
            url.push('?');
            url.push_str(&query.finish());
        }
        Ok(url)
    }
}

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::errors::ApiError;

#[derive(Clone, Debug, PartialEq)]
pub enum ViewBody {
    Empty,
    Json(Value),
    Html(String),
}

/// Transport-independent result of a controller action.
#[derive(Clone, Debug, PartialEq)]
pub struct View {
    status: StatusCode,
    body: ViewBody,
    location: Option<String>,
}

impl View {
    #[must_use]
    pub fn new(body: Value, status: StatusCode) -> Self {
        Self {
            status,
            body: ViewBody::Json(body),
            location: None,
        }
    }

    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: ViewBody::Empty,
            location: None,
        }
    }

    /// Rendered fragment: raw HTML when the `_format` hint asks for it, `{"html": ...}`
    /// otherwise.
    #[must_use]
    pub fn fragment(html: String, format: Option<&str>) -> Self {
        let body = if format.is_some_and(|format| format.eq_ignore_ascii_case("html")) {
            ViewBody::Html(html)
        } else {
            ViewBody::Json(json!({ "html": html }))
        };
        Self {
            status: StatusCode::OK,
            body,
            location: None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> &ViewBody {
        &self.body
    }

    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
}

impl From<ApiError> for View {
    fn from(err: ApiError) -> Self {
        Self::new(err.body(), err.status_code())
    }
}

impl IntoResponse for View {
    fn into_response(self) -> Response {
        let mut response = match self.body {
            ViewBody::Empty => self.status.into_response(),
            ViewBody::Json(body) => (self.status, Json(body)).into_response(),
            ViewBody::Html(html) => (self.status, Html(html)).into_response(),
        };

        if let Some(location) = self.location {
            match HeaderValue::from_str(&location) {
                Ok(value) => {
                    response.headers_mut().insert(header::LOCATION, value);
                }
                Err(err) => {
                    tracing::warn!(location = %location, error = %err, "Dropping invalid Location header");
                }
            }
        }
        response
    }
}

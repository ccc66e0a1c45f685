//! Submitted form data.
//!
//! A [`Submission`] is the body of a write request read as form input. JSON bodies are kept
//! as they are. URL-encoded and multipart bodies arrive as text: a `widget[name]` key is
//! nested as `{"widget": {"name": ...}}`, and multipart file parts become [`UploadedFile`]
//! objects. HTML forms only send POST, so the method they stand for travels in a `_method`
//! field.

use axum::{
    Form, Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::LazyLock;

use crate::errors::HandlerError;
use crate::form::FormMethod;

/// Field carrying the method an HTML form stands for.
pub const METHOD_OVERRIDE_FIELD: &str = "_method";

static BRACKETED_KEY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^([^\[\]]+)\[([^\[\]]+)\]$").ok());

/// How the submitted values are typed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BodyEncoding {
    /// Values carry their own JSON types.
    #[default]
    Json,
    /// Every scalar is a string and is read against the target field.
    Text,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Submission {
    body: Value,
    encoding: BodyEncoding,
}

impl Submission {
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self {
            body,
            encoding: BodyEncoding::Json,
        }
    }

    #[must_use]
    pub fn text(body: Value) -> Self {
        Self {
            body,
            encoding: BodyEncoding::Text,
        }
    }

    /// Text submission from decoded form keys and values. Later keys win.
    #[must_use]
    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut root = Map::new();
        for (key, value) in pairs {
            match split_key(&key) {
                Some((form, field)) => {
                    let entry = root
                        .entry(form)
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !entry.is_object() {
                        *entry = Value::Object(Map::new());
                    }
                    if let Value::Object(fields) = entry {
                        fields.insert(field, value);
                    }
                }
                None => {
                    root.insert(key, value);
                }
            }
        }
        Self::text(Value::Object(root))
    }

    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    #[must_use]
    pub fn encoding(&self) -> BodyEncoding {
        self.encoding
    }

    #[must_use]
    pub fn is_text(&self) -> bool {
        self.encoding == BodyEncoding::Text
    }

    /// Method requested through the `_method` field.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerErrorKind::BadRequest`](crate::HandlerErrorKind::BadRequest) error
    /// when the field names no form method.
    pub fn method_override(&self) -> Result<Option<FormMethod>, HandlerError> {
        match self.body.get(METHOD_OVERRIDE_FIELD) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(method)) => method.parse().map(Some),
            Some(other) => Err(HandlerError::bad_request(format!(
                "'{other}' is not a form method"
            ))),
        }
    }
}

impl From<Value> for Submission {
    fn from(body: Value) -> Self {
        Self::json(body)
    }
}

impl From<&Value> for Submission {
    fn from(body: &Value) -> Self {
        Self::json(body.clone())
    }
}

fn split_key(key: &str) -> Option<(String, String)> {
    let captures = BRACKETED_KEY.as_ref()?.captures(key)?;
    Some((
        captures.get(1)?.as_str().to_string(),
        captures.get(2)?.as_str().to_string(),
    ))
}

/// A file part of a multipart submission.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl<S: Send + Sync> FromRequest<S> for Submission {
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match mime.as_str() {
            "application/x-www-form-urlencoded" => {
                let Form(pairs) = Form::<Vec<(String, String)>>::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
                Ok(Self::from_pairs(
                    pairs.into_iter().map(|(key, value)| (key, Value::String(value))),
                ))
            }
            "multipart/form-data" => {
                let multipart = Multipart::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
                read_multipart(multipart).await
            }
            "" => {
                let bytes = Bytes::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
                if bytes.iter().all(u8::is_ascii_whitespace) {
                    Ok(Self::json(Value::Null))
                } else {
                    Err(unsupported_media_type("none"))
                }
            }
            kind if kind == "application/json" || kind.ends_with("+json") => {
                let Json(body) = Json::<Value>::from_request(req, state)
                    .await
                    .map_err(IntoResponse::into_response)?;
                Ok(Self::json(body))
            }
            other => Err(unsupported_media_type(other)),
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<Submission, Response> {
    let mut pairs = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(IntoResponse::into_response)?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);

        let value = match file_name {
            // A file input left empty.
            Some(file_name) if file_name.is_empty() => Value::Null,
            Some(file_name) => {
                let bytes = field.bytes().await.map_err(IntoResponse::into_response)?;
                let file = UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                };
                serde_json::to_value(file).unwrap_or(Value::Null)
            }
            None => Value::String(field.text().await.map_err(IntoResponse::into_response)?),
        };
        pairs.push((name, value));
    }
    tracing::debug!(fields = pairs.len(), "Read multipart submission");
    Ok(Submission::from_pairs(pairs))
}

fn unsupported_media_type(content_type: &str) -> Response {
    (
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        Json(json!({ "error": format!("Unsupported content type '{content_type}'") })),
    )
        .into_response()
}

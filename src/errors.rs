//! # Error Handling
//!
//! Three layers of errors flow through a resource handler:
//!
//! - [`HandlerError`]: a business error tagged with a stable [`HandlerErrorKind`] UUID. The base
//!   controller never converts these; a [`HandlerErrorResponder`](crate::controller::HandlerErrorResponder)
//!   decides their final shape.
//! - [`Error`]: everything a handler operation can fail with (missing entity, rejected form,
//!   storage failure, business error).
//! - [`ApiError`]: the response-shaping error. It knows its status code and JSON body and is
//!   what the controller turns every non-business [`Error`] into.
//!
//! ## Logging
//!
//! Internal details are logged with `tracing` when an [`ApiError`] is rendered. Install a
//! subscriber in your application to see them:
//!
//! ```rust,ignore
//! tracing_subscriber::fmt().with_target(false).compact().init();
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::form::FormState;
use crate::storage::StoreError;

/// Message returned for every storage-level uniqueness violation.
pub const DUPLICATE_ENTRY_MESSAGE: &str = "This item has already been recorded in the database.";

/// Message carried by every rejected form.
pub const INVALID_FORM_MESSAGE: &str = "Invalid submitted data";

/// Validation language that marks a rejected form as a conflict rather than a bad request.
pub const CONFLICT_MARKER: &str = "already in use with";

// ============================================================================
// Business errors
// ============================================================================

/// Kinds of business error a handler can raise. Each kind carries a fixed UUID so clients
/// can match on it regardless of the message text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HandlerErrorKind {
    AccessDenied,
    BadRequest,
    MissingFormType,
    InvalidId,
    MissingEntityClass,
    AnonymousUserNotAllowed,
    MissingDependency,
    InvalidEntityRouteKey,
    InvalidKey,
    InvalidType,
    DuplicateEntry,
}

impl HandlerErrorKind {
    pub const ALL: [Self; 11] = [
        Self::AccessDenied,
        Self::BadRequest,
        Self::MissingFormType,
        Self::InvalidId,
        Self::MissingEntityClass,
        Self::AnonymousUserNotAllowed,
        Self::MissingDependency,
        Self::InvalidEntityRouteKey,
        Self::InvalidKey,
        Self::InvalidType,
        Self::DuplicateEntry,
    ];

    /// Stable identifier of this kind.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        Uuid::from_u128(match self {
            Self::AccessDenied => 0x36d0_d55d_079f_44e6_92b9_024a_b4eb_ebb4,
            Self::BadRequest => 0xa2cc_ce5f_6268_41c1_b5a1_654f_9652_42da,
            Self::MissingFormType => 0x65d1_26dd_7bc5_4f67_b9a3_04e8_75fd_c5fd,
            Self::InvalidId => 0xb7c0_0792_4f01_4750_89db_21c8_28a3_9ab1,
            Self::MissingEntityClass => 0x8579_aa41_430a_4b9a_bba5_e719_1cf0_dad9,
            Self::AnonymousUserNotAllowed => 0x7396_6900_482e_49f1_a44c_e264_ff40_89f0,
            Self::MissingDependency => 0x2189_31d1_2055_4e91_b3ef_f146_ee1e_9ba8,
            Self::InvalidEntityRouteKey => 0xab76_9448_7426_482f_892f_fd4a_b5ef_4680,
            Self::InvalidKey => 0x9d65_4e29_7aba_49f3_b137_124c_12dd_aa22,
            Self::InvalidType => 0xdd7a_8d8c_eba8_449e_ae1e_7f64_afc7_1c4d,
            Self::DuplicateEntry => 0xc3df_04db_c3ee_4f62_b59c_04a1_42a0_6c91,
        })
    }

    /// Reverse lookup of [`HandlerErrorKind::uuid`].
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == uuid)
    }
}

/// A UUID-tagged business error raised by the handler layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerError {
    pub kind: HandlerErrorKind,
    pub message: String,
}

impl HandlerError {
    pub fn new(kind: HandlerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn access_denied(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::AccessDenied, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::BadRequest, message)
    }

    pub fn missing_dependency(message: impl Into<String>) -> Self {
        Self::new(HandlerErrorKind::MissingDependency, message)
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.kind.uuid()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

// ============================================================================
// Handler operation errors
// ============================================================================

/// A form rejected by validation, with the status hint the controller should answer with.
#[derive(Clone, Debug)]
pub struct InvalidFormError {
    pub form: FormState,
    pub status: StatusCode,
}

impl InvalidFormError {
    /// Builds the error, flagging it as a conflict when any validation message carries
    /// uniqueness language.
    #[must_use]
    pub fn new(form: FormState) -> Self {
        let status = if form.errors.to_string().contains(CONFLICT_MARKER) {
            StatusCode::CONFLICT
        } else {
            StatusCode::BAD_REQUEST
        };
        Self { form, status }
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status == StatusCode::CONFLICT
    }
}

/// Failure of a handler operation.
#[derive(Debug)]
pub enum Error {
    /// No entity exists for the requested identity.
    NotFound(String),
    /// Submitted data was rejected.
    InvalidForm(Box<InvalidFormError>),
    /// The backing store refused the write or read.
    Storage(StoreError),
    /// Business error; passes every base layer untouched.
    Handler(HandlerError),
    /// Raised by hooks to travel through `persist_entity` without extra logging.
    BubbleUp(Box<dyn std::error::Error + Send + Sync>),
    /// Invalid handler configuration.
    Config(String),
    Internal(String),
}

impl Error {
    pub fn not_found(id: impl fmt::Display) -> Self {
        Self::NotFound(format!("The resource '{id}' was not found."))
    }

    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidForm(_) => "invalid_form",
            Self::Storage(_) => "storage",
            Self::Handler(_) => "handler",
            Self::BubbleUp(_) => "bubble_up",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(message) | Self::Config(message) | Self::Internal(message) => {
                f.write_str(message)
            }
            Self::InvalidForm(_) => f.write_str(INVALID_FORM_MESSAGE),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Handler(err) => write!(f, "{err}"),
            Self::BubbleUp(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        Self::Storage(err)
    }
}

impl From<HandlerError> for Error {
    fn from(err: HandlerError) -> Self {
        Self::Handler(err)
    }
}

impl From<InvalidFormError> for Error {
    fn from(err: InvalidFormError) -> Self {
        Self::InvalidForm(Box::new(err))
    }
}

// ============================================================================
// Response shaping
// ============================================================================

/// Response-shaping error with a fixed status code and JSON body.
#[derive(Debug)]
pub enum ApiError {
    /// 404 Not Found
    NotFound { message: String },
    /// 400 Bad Request
    BadRequest { message: String },
    /// 403 Forbidden
    Forbidden { message: String },
    /// 409 Conflict
    Conflict { message: String },
    /// 400 or 409, carrying the rejected form
    InvalidForm(Box<InvalidFormError>),
    /// 500 Internal Server Error. The raw message is returned to the caller.
    Internal {
        message: String,
        internal: Option<String>,
    },
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    /// Translates a handler failure into a response error.
    ///
    /// Business errors are handed back untouched in `Err` so that only a
    /// [`HandlerErrorResponder`](crate::controller::HandlerErrorResponder) shapes them.
    ///
    /// # Errors
    ///
    /// Returns the [`HandlerError`] when `err` is [`Error::Handler`].
    pub fn from_error(err: Error) -> Result<Self, HandlerError> {
        Ok(match err {
            Error::Handler(err) => return Err(err),
            Error::NotFound(message) => Self::NotFound { message },
            Error::InvalidForm(form) => Self::InvalidForm(form),
            Error::Storage(StoreError::NotNullViolation { column, message }) => {
                match column.as_deref().and_then(crate::storage::violation::not_null_message) {
                    Some(readable) => Self::bad_request(readable),
                    None => Self::bad_request(message),
                }
            }
            Error::Storage(StoreError::UniqueViolation { .. }) => {
                Self::conflict(DUPLICATE_ENTRY_MESSAGE)
            }
            Error::Storage(err) => Self::internal(err.to_string(), Some(format!("{err:?}"))),
            Error::BubbleUp(err) => Self::internal(err.to_string(), None),
            Error::Config(message) | Error::Internal(message) => Self::internal(message, None),
        })
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::InvalidForm(form) => form.status,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotFound { message }
            | Self::BadRequest { message }
            | Self::Forbidden { message }
            | Self::Conflict { message }
            | Self::Internal { message, .. } => message.clone(),
            Self::InvalidForm(form) if form.is_conflict() => form.form.errors.messages().join(" "),
            Self::InvalidForm(_) => INVALID_FORM_MESSAGE.to_string(),
        }
    }

    /// JSON body sent to the client.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::InvalidForm(form) if !form.is_conflict() => json!(ErrorResponse {
                error: INVALID_FORM_MESSAGE.to_string(),
                form: Some(form.form.name.clone()),
                errors: Some(form.form.errors.by_field()),
            }),
            _ => json!(ErrorResponse {
                error: self.user_message(),
                form: None,
                errors: None,
            }),
        }
    }

    fn log_internal(&self) {
        match self {
            Self::Internal {
                message,
                internal: Some(details),
            } => {
                tracing::error!(message = %message, details = %details, "Internal error occurred");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

/// Error body sent to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// Name of the rejected form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<String>,
    /// Field name to validation messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<std::collections::BTreeMap<String, Vec<String>>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();
        (self.status_code(), Json(self.body())).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user_message())
    }
}

impl std::error::Error for ApiError {}

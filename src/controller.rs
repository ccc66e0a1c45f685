//! Verb dispatch and response shaping.
//!
//! [`RestViewController`] adapts HTTP requests to a [`RestHandler`] and turns its results into
//! [`View`]s. Storage and form failures are converted to responses here. Business failures
//! ([`Error::Handler`]) are handed to a [`HandlerErrorResponder`], which decides their final
//! shape.
//!
//! ```rust,ignore
//! let controller = RestViewController::new(Arc::new(handler), Arc::new(HandlebarsRenderer::new()?));
//! let app = Router::new().nest("/api/widgets", controller::router(controller));
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{ApiError, Error, HandlerError, HandlerErrorKind};
use crate::form::{Form, FormMethod, FormOptions};
use crate::handler::RestHandler;
use crate::query::FormDisplayParams;
use crate::resource::RestResource;
use crate::routing::RouteKey;
use crate::security::{CurrentUser, Principal};
use crate::submission::Submission;
use crate::templating::TemplateRenderer;
use crate::view::View;

/// Final shaping of business errors.
pub trait HandlerErrorResponder: Send + Sync {
    fn respond(&self, err: HandlerError) -> Response;
}

/// Maps each [`HandlerErrorKind`] to a status and returns `{"error", "code"}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResponder;

impl DefaultResponder {
    #[must_use]
    pub fn status_for(kind: HandlerErrorKind) -> StatusCode {
        match kind {
            HandlerErrorKind::AccessDenied => StatusCode::FORBIDDEN,
            HandlerErrorKind::AnonymousUserNotAllowed => StatusCode::UNAUTHORIZED,
            HandlerErrorKind::BadRequest
            | HandlerErrorKind::InvalidId
            | HandlerErrorKind::InvalidKey
            | HandlerErrorKind::InvalidType
            | HandlerErrorKind::InvalidEntityRouteKey => StatusCode::BAD_REQUEST,
            HandlerErrorKind::DuplicateEntry => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl HandlerErrorResponder for DefaultResponder {
    fn respond(&self, err: HandlerError) -> Response {
        let status = Self::status_for(err.kind);
        let code = err.uuid();
        tracing::warn!(
            kind = ?err.kind,
            code = %code,
            status = %status,
            message = %err.message,
            "Handler error"
        );
        (
            status,
            Json(json!({ "error": err.message, "code": code })),
        )
            .into_response()
    }
}

pub struct RestViewController<T: RestResource> {
    handler: Arc<RestHandler<T>>,
    renderer: Arc<dyn TemplateRenderer>,
    responder: Arc<dyn HandlerErrorResponder>,
}

impl<T: RestResource> Clone for RestViewController<T> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            renderer: Arc::clone(&self.renderer),
            responder: Arc::clone(&self.responder),
        }
    }
}

impl<T: RestResource> RestViewController<T> {
    pub fn new(handler: Arc<RestHandler<T>>, renderer: Arc<dyn TemplateRenderer>) -> Self {
        Self {
            handler,
            renderer,
            responder: Arc::new(DefaultResponder),
        }
    }

    #[must_use]
    pub fn with_responder(mut self, responder: impl HandlerErrorResponder + 'static) -> Self {
        self.responder = Arc::new(responder);
        self
    }

    #[must_use]
    pub fn handler(&self) -> &RestHandler<T> {
        &self.handler
    }

    /// Lists entities. Every failure becomes a response: access denied is 403, a bad request
    /// 400, anything else 500 with the error message as body.
    pub async fn cget_action(
        &self,
        query: &HashMap<String, String>,
        principal: Option<&Principal>,
    ) -> View {
        let result = self
            .handler
            .handle_get_all_request(query, principal)
            .await
            .and_then(|entities| {
                serde_json::to_value(entities).map_err(|err| Error::Internal(err.to_string()))
            });

        match result {
            Ok(entities) => View::new(entities, StatusCode::OK),
            Err(Error::Handler(err)) => {
                let status = match err.kind {
                    HandlerErrorKind::AccessDenied => StatusCode::FORBIDDEN,
                    HandlerErrorKind::BadRequest => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                tracing::warn!(kind = ?err.kind, status = %status, message = %err.message, "List request refused");
                View::new(Value::String(err.message), status)
            }
            Err(err) => {
                tracing::error!(resource = T::SHORT_NAME, kind = err.kind(), error = %err, "List request failed");
                View::new(
                    Value::String(err.to_string()),
                    StatusCode::INTERNAL_SERVER_ERROR,
                )
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identity.
    pub async fn get_action(&self, id: i64) -> Result<View, Error> {
        let entity = self.handler.get_or_404(id).await?;
        Ok(View::new(self.single(&entity)?, StatusCode::OK))
    }

    /// Create form fragment.
    ///
    /// # Errors
    ///
    /// Fails when the form target cannot be generated or the template cannot be rendered.
    pub fn new_action(&self, query: &HashMap<String, String>) -> Result<View, Error> {
        let action = self.handler.generate_url(RouteKey::Post, &[])?;
        let form = self
            .handler
            .get_form(None, FormOptions::new(FormMethod::Post).with_action(action));
        self.render_form(
            &self.handler.config().templates.new_form,
            &form,
            query,
            "Create",
        )
    }

    /// Edit form fragment for a stored entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identity, and fails when the form cannot be
    /// rendered.
    pub async fn edit_action(
        &self,
        id: i64,
        query: &HashMap<String, String>,
    ) -> Result<View, Error> {
        let entity = self.handler.get_or_404(id).await?;
        let action = self
            .handler
            .generate_url(RouteKey::Put, &[("id", id.to_string())])?;
        let form = self.handler.get_form(
            Some(entity),
            FormOptions::new(FormMethod::Put).with_action(action),
        );
        self.render_form(
            &self.handler.config().templates.edit_form,
            &form,
            query,
            "Edit",
        )
    }

    /// Delete confirmation fragment for a stored entity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identity, and fails when the form cannot be
    /// rendered.
    pub async fn remove_action(
        &self,
        id: i64,
        query: &HashMap<String, String>,
    ) -> Result<View, Error> {
        let entity = self.handler.get_or_404(id).await?;
        let form = self.handler.create_remove_form(entity)?;
        self.render_form(
            &self.handler.config().templates.delete_form,
            &form,
            query,
            "Delete",
        )
    }

    /// Creates an entity: 201 with the entity and a Location pointing at it.
    ///
    /// # Errors
    ///
    /// See [`RestHandler::process_form_request`].
    pub async fn post_action(
        &self,
        input: impl Into<Submission>,
        query: &HashMap<String, String>,
    ) -> Result<View, Error> {
        let entity = self.handler.handle_post_request(input).await?;
        self.created(&entity, query)
    }

    /// Upsert: 201 when no entity has this identity yet, 204 after replacing an existing one.
    ///
    /// # Errors
    ///
    /// See [`RestHandler::process_form_request`].
    pub async fn put_action(
        &self,
        id: i64,
        input: impl Into<Submission>,
        query: &HashMap<String, String>,
    ) -> Result<View, Error> {
        match self.handler.get(id).await? {
            None => {
                let entity = self.handler.handle_post_request(input).await?;
                self.created(&entity, query)
            }
            Some(entity) => {
                let entity = self.handler.handle_put_request(entity, input).await?;
                self.updated(&entity, query)
            }
        }
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identity; see also
    /// [`RestHandler::process_form_request`].
    pub async fn patch_action(
        &self,
        id: i64,
        input: impl Into<Submission>,
        query: &HashMap<String, String>,
    ) -> Result<View, Error> {
        let entity = self.handler.get_or_404(id).await?;
        let entity = self.handler.handle_patch_request(entity, input).await?;
        self.updated(&entity, query)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown identity, and propagates storage failures.
    pub async fn delete_action(&self, id: i64) -> Result<View, Error> {
        let entity = self.handler.get_or_404(id).await?;
        self.handler.handle_delete_request(entity).await?;
        Ok(View::empty(StatusCode::NO_CONTENT))
    }

    /// Converts an action result into a response. Business errors go to the responder.
    pub fn respond(&self, result: Result<View, Error>) -> Response {
        match result {
            Ok(view) => view.into_response(),
            Err(err) => match ApiError::from_error(err) {
                Ok(api_error) => api_error.into_response(),
                Err(handler_error) => self.responder.respond(handler_error),
            },
        }
    }

    fn single(&self, entity: &T) -> Result<Value, Error> {
        let value = serde_json::to_value(entity).map_err(|err| Error::Internal(err.to_string()))?;
        let mut body = Map::new();
        body.insert(self.handler.var_name(), value);
        Ok(Value::Object(body))
    }

    fn created(&self, entity: &T, query: &HashMap<String, String>) -> Result<View, Error> {
        Ok(View::new(self.single(entity)?, StatusCode::CREATED)
            .with_location(self.self_location(entity, query)?))
    }

    fn updated(&self, entity: &T, query: &HashMap<String, String>) -> Result<View, Error> {
        Ok(View::empty(StatusCode::NO_CONTENT).with_location(self.self_location(entity, query)?))
    }

    /// URL of the entity's get route, keeping the request's `_format`.
    fn self_location(&self, entity: &T, query: &HashMap<String, String>) -> Result<String, Error> {
        let id = entity
            .id()
            .ok_or_else(|| Error::Internal(format!("Stored {} has no identity", T::SHORT_NAME)))?;
        let mut params = vec![("id", id.to_string())];
        if let Some(format) = query.get("_format") {
            params.push(("_format", format.clone()));
        }
        Ok(self.handler.generate_url(RouteKey::Get, &params)?)
    }

    fn render_form(
        &self,
        template: &str,
        form: &Form<T>,
        query: &HashMap<String, String>,
        submit_text: &str,
    ) -> Result<View, Error> {
        let params = FormDisplayParams::from_query(query);
        let context = json!({
            "form": form.view(),
            "withSubmitButton": params.with_submit_button(),
            "submitButtonText": submit_text,
        });
        let html = self.renderer.render(template, &context)?;
        Ok(View::fragment(html, params.format.as_deref()))
    }
}

/// Router exposing the controller's actions. Nest it under the resource's base path.
pub fn router<T>(controller: RestViewController<T>) -> Router
where
    T: RestResource,
{
    Router::new()
        .route("/", get(cget::<T>).post(post::<T>))
        .route("/new", get(new_form::<T>))
        .route(
            "/{id}",
            get(get_one::<T>)
                .post(post_override::<T>)
                .put(put::<T>)
                .patch(patch::<T>)
                .delete(delete::<T>),
        )
        .route("/{id}/edit", get(edit_form::<T>))
        .route("/{id}/remove", get(remove_form::<T>))
        .with_state(controller)
}

fn parse_id<T: RestResource>(raw: &str) -> Result<i64, Error> {
    Ok(RestHandler::<T>::validate_id(raw)?)
}

async fn cget<T>(
    State(controller): State<RestViewController<T>>,
    CurrentUser(principal): CurrentUser,
    Query(query): Query<HashMap<String, String>>,
) -> Response
where
    T: RestResource,
{
    controller
        .cget_action(&query, principal.as_ref())
        .await
        .into_response()
}

async fn new_form<T>(
    State(controller): State<RestViewController<T>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response
where
    T: RestResource,
{
    controller.respond(controller.new_action(&query))
}

async fn get_one<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
) -> Response
where
    T: RestResource,
{
    let result = match parse_id::<T>(&id) {
        Ok(id) => controller.get_action(id).await,
        Err(err) => Err(err),
    };
    controller.respond(result)
}

async fn edit_form<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response
where
    T: RestResource,
{
    let result = match parse_id::<T>(&id) {
        Ok(id) => controller.edit_action(id, &query).await,
        Err(err) => Err(err),
    };
    controller.respond(result)
}

async fn remove_form<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response
where
    T: RestResource,
{
    let result = match parse_id::<T>(&id) {
        Ok(id) => controller.remove_action(id, &query).await,
        Err(err) => Err(err),
    };
    controller.respond(result)
}

fn method_not_allowed(method: FormMethod, path: &str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": format!("{method} is not allowed on {path}") })),
    )
        .into_response()
}

async fn post<T>(
    State(controller): State<RestViewController<T>>,
    Query(query): Query<HashMap<String, String>>,
    submission: Submission,
) -> Response
where
    T: RestResource,
{
    match submission.method_override() {
        Ok(None | Some(FormMethod::Post)) => {
            let result = controller.post_action(submission, &query).await;
            controller.respond(result)
        }
        Ok(Some(method)) => method_not_allowed(method, "the collection"),
        Err(err) => controller.respond(Err(err.into())),
    }
}

/// POST on an item, standing for the method named in `_method`.
async fn post_override<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    submission: Submission,
) -> Response
where
    T: RestResource,
{
    let method = match submission.method_override() {
        Ok(method) => method.unwrap_or_default(),
        Err(err) => return controller.respond(Err(err.into())),
    };
    let id = match parse_id::<T>(&id) {
        Ok(id) => id,
        Err(err) => return controller.respond(Err(err)),
    };
    tracing::debug!(resource = T::SHORT_NAME, id, %method, "Dispatching overridden method");

    let result = match method {
        FormMethod::Put => controller.put_action(id, submission, &query).await,
        FormMethod::Patch => controller.patch_action(id, submission, &query).await,
        FormMethod::Delete => controller.delete_action(id).await,
        FormMethod::Post => return method_not_allowed(method, "an item"),
    };
    controller.respond(result)
}

async fn put<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    submission: Submission,
) -> Response
where
    T: RestResource,
{
    let result = match parse_id::<T>(&id) {
        Ok(id) => controller.put_action(id, submission, &query).await,
        Err(err) => Err(err),
    };
    controller.respond(result)
}

async fn patch<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    submission: Submission,
) -> Response
where
    T: RestResource,
{
    let result = match parse_id::<T>(&id) {
        Ok(id) => controller.patch_action(id, submission, &query).await,
        Err(err) => Err(err),
    };
    controller.respond(result)
}

async fn delete<T>(
    State(controller): State<RestViewController<T>>,
    Path(id): Path<String>,
) -> Response
where
    T: RestResource,
{
    let result = match parse_id::<T>(&id) {
        Ok(id) => controller.delete_action(id).await,
        Err(err) => Err(err),
    };
    controller.respond(result)
}

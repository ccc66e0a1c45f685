//! Per-resource orchestration of validation, persistence and events.
//!
//! A [`RestHandler`] owns the capabilities one resource type needs (a [`Repository`], a
//! [`FormValidator`], an [`EventPublisher`] and optionally a [`UrlGenerator`] and
//! [`RoleHierarchy`]) and runs the form-request state machine:
//!
//! ```text
//! bind + validate ──invalid──> Err(InvalidForm { 400 | 409 })
//!        │
//!      valid ──> audit ──> persist ──> publish event ──> Ok(entity)
//! ```
//!
//! Build one with [`RestHandler::builder`]:
//!
//! ```rust,ignore
//! let handler = RestHandler::builder(Arc::new(SeaOrmRepository::<Widget>::new(db)))
//!     .validator(EntityValidator)
//!     .publisher(dispatcher.clone())
//!     .url_generator(RouteTable::for_resource("api_", "widget", "/api/widgets"))
//!     .default_events()
//!     .build()?;
//! ```

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::{HandlerConfig, boolish};
use crate::errors::{Error, HandlerError, HandlerErrorKind, InvalidFormError};
use crate::event::{AppEvent, EventContext, EventDispatcher, EventKey, EventPublisher, EventType};
use crate::form::{Form, FormMethod, FormOptions, fields_of};
use crate::query::ListParams;
use crate::resource::RestResource;
use crate::routing::{RouteKey, UrlGenerator};
use crate::security::{Principal, RoleHierarchy};
use crate::storage::{Criteria, OrderBy, Repository, StoreError};
use crate::submission::{METHOD_OVERRIDE_FIELD, Submission};
use crate::validation::{FormValidator, NoConstraints};

/// Hooks around persistence.
#[async_trait]
pub trait AuditTrail<T: RestResource>: Send + Sync {
    /// Runs on a validated entity before it is written.
    async fn audit(&self, _entity: &T, _method: FormMethod) -> Result<(), Error> {
        Ok(())
    }

    /// Runs after the write, before the flush.
    async fn audit_persist(&self, _entity: &T) -> Result<(), Error> {
        Ok(())
    }
}

/// Audit hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAudit;

impl<T: RestResource> AuditTrail<T> for NoAudit {}

pub struct RestHandler<T: RestResource> {
    repository: Arc<dyn Repository<T>>,
    validator: Arc<dyn FormValidator<T>>,
    publisher: Arc<dyn EventPublisher<T>>,
    auditor: Arc<dyn AuditTrail<T>>,
    urls: Option<Arc<dyn UrlGenerator>>,
    roles: Option<Arc<RoleHierarchy>>,
    config: HandlerConfig,
    event_types: HashMap<EventKey, EventType>,
    event_names: RwLock<HashMap<EventKey, String>>,
    entity_routes: RwLock<HashMap<RouteKey, String>>,
}

impl<T: RestResource> RestHandler<T> {
    pub fn builder(repository: Arc<dyn Repository<T>>) -> RestHandlerBuilder<T> {
        RestHandlerBuilder::new(repository)
    }

    #[must_use]
    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    #[must_use]
    pub fn repository(&self) -> &Arc<dyn Repository<T>> {
        &self.repository
    }

    #[must_use]
    pub fn is_user_aware(&self) -> bool {
        self.config.user_aware
    }

    /// Key wrapping single entities in responses.
    #[must_use]
    pub fn var_name(&self) -> String {
        self.config
            .template_var_name
            .clone()
            .unwrap_or_else(T::var_name)
    }

    #[must_use]
    pub fn form_name(&self) -> String {
        self.config.form_name.clone().unwrap_or_else(T::var_name)
    }

    #[must_use]
    pub fn create_entity(&self) -> T {
        T::default()
    }

    /// Serialized field names of the resource, minus `ignore`.
    #[must_use]
    pub fn entity_property_names(&self, ignore: &[&str]) -> Vec<String> {
        fields_of(&self.create_entity())
            .into_iter()
            .map(|(name, _)| name)
            .filter(|name| !ignore.contains(&name.as_str()))
            .collect()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn get(&self, id: i64) -> Result<Option<T>, Error> {
        tracing::debug!(resource = T::SHORT_NAME, id, "Fetching entity");
        Ok(self.repository.find(id).await?)
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when no entity has this identity.
    pub async fn get_or_404(&self, id: i64) -> Result<T, Error> {
        self.get(id).await?.ok_or_else(|| Error::not_found(id))
    }

    /// Parses a path identity; only digit strings are identities.
    ///
    /// # Errors
    ///
    /// Returns an [`HandlerErrorKind::InvalidId`] error for anything else.
    pub fn validate_id(raw: &str) -> Result<i64, HandlerError> {
        if !raw.is_empty() && raw.bytes().all(|byte| byte.is_ascii_digit()) {
            if let Ok(id) = raw.parse() {
                return Ok(id);
            }
        }
        Err(HandlerError::new(
            HandlerErrorKind::InvalidId,
            format!("'{raw}' id must be a valid integer value"),
        ))
    }

    /// Entities matching `criteria`. A user-aware handler also filters on the principal's
    /// identity, whatever `criteria` holds.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerErrorKind::AnonymousUserNotAllowed`] when the handler is user-aware and
    /// no principal is given, and propagates storage failures.
    pub async fn all(
        &self,
        criteria: Option<Criteria>,
        limit: Option<u64>,
        offset: Option<u64>,
        order_by: Option<OrderBy>,
        principal: Option<&Principal>,
    ) -> Result<Vec<T>, Error> {
        let mut criteria = criteria.unwrap_or_default();
        if self.config.user_aware {
            let principal = principal.ok_or_else(|| {
                HandlerError::new(
                    HandlerErrorKind::AnonymousUserNotAllowed,
                    format!("Anonymous users cannot list {} resources", T::SHORT_NAME),
                )
            })?;
            criteria.insert(self.config.user_aware_property.clone(), json!(principal.id));
        }

        tracing::debug!(
            resource = T::SHORT_NAME,
            filters = criteria.len(),
            ?limit,
            ?offset,
            "Listing entities"
        );
        let order_by = order_by.unwrap_or_default();
        Ok(self
            .repository
            .find_by(&criteria, &order_by, limit, offset)
            .await?)
    }

    /// Equality filters from query parameters naming a filterable property.
    #[must_use]
    pub fn parse_criteria(&self, query: &HashMap<String, String>) -> Option<Criteria> {
        let criteria: Criteria = self
            .config
            .filterable_properties
            .iter()
            .filter_map(|property| {
                query
                    .get(property)
                    .map(|raw| (property.clone(), query_value(raw)))
            })
            .collect();
        (!criteria.is_empty()).then_some(criteria)
    }

    /// Requested ordering, restricted to the sortable properties.
    #[must_use]
    pub fn parse_order_by(&self, query: &HashMap<String, String>) -> Option<OrderBy> {
        ListParams::from_query(query).order_by(&self.config.sortable_properties)
    }

    /// Lists entities using `offset`, `limit`, `sort` and filter parameters from the query.
    ///
    /// # Errors
    ///
    /// See [`RestHandler::all`].
    pub async fn handle_get_all_request(
        &self,
        query: &HashMap<String, String>,
        principal: Option<&Principal>,
    ) -> Result<Vec<T>, Error> {
        let params = ListParams::from_query(query);
        self.all(
            self.parse_criteria(query),
            params.limit(),
            params.offset(),
            self.parse_order_by(query),
            principal,
        )
        .await
    }

    // ========================================================================
    // Form requests
    // ========================================================================

    /// # Errors
    ///
    /// See [`RestHandler::process_form_request`].
    pub async fn handle_post_request(&self, input: impl Into<Submission>) -> Result<T, Error> {
        self.process_form_request(self.create_entity(), input, FormMethod::Post)
            .await
    }

    /// # Errors
    ///
    /// See [`RestHandler::process_form_request`].
    pub async fn handle_put_request(
        &self,
        entity: T,
        input: impl Into<Submission>,
    ) -> Result<T, Error> {
        self.process_form_request(entity, input, FormMethod::Put)
            .await
    }

    /// # Errors
    ///
    /// See [`RestHandler::process_form_request`].
    pub async fn handle_patch_request(
        &self,
        entity: T,
        input: impl Into<Submission>,
    ) -> Result<T, Error> {
        self.process_form_request(entity, input, FormMethod::Patch)
            .await
    }

    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn handle_delete_request(&self, entity: T) -> Result<(), Error> {
        self.remove(entity, None, EventContext::new()).await
    }

    #[must_use]
    pub fn get_form(&self, entity: Option<T>, options: FormOptions) -> Form<T> {
        Form::new(
            self.form_name(),
            entity.unwrap_or_else(|| self.create_entity()),
            options,
        )
    }

    /// Form input from a request body.
    ///
    /// A body wrapping its fields under the form name is unwrapped. `submit`, `_format` and
    /// `_method` are dropped and configured boolean properties are coerced.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerErrorKind::BadRequest`] error when the body is neither an object
    /// nor `null`.
    pub fn get_parameters(
        &self,
        body: &Value,
        form_name: &str,
    ) -> Result<Map<String, Value>, HandlerError> {
        let mut params = match body {
            Value::Null => Map::new(),
            Value::Object(fields) => match fields.get(form_name) {
                Some(Value::Object(nested)) => nested.clone(),
                _ => fields.clone(),
            },
            _ => {
                return Err(HandlerError::bad_request(
                    "The request body must be a JSON object",
                ));
            }
        };

        params.remove("submit");
        params.remove("_format");
        params.remove(METHOD_OVERRIDE_FIELD);

        for property in &self.config.boolean_properties {
            if let Some(value) = params.get_mut(property) {
                let coerced = match value {
                    Value::String(text) => Some(boolish(text)),
                    Value::Number(number) => Some(number.as_i64() == Some(1)),
                    _ => None,
                };
                if let Some(flag) = coerced {
                    *value = Value::Bool(flag);
                }
            }
        }
        Ok(params)
    }

    /// Binds the submitted data onto `entity` and runs the validator.
    ///
    /// # Errors
    ///
    /// Fails only when the body cannot be read as form input; validation problems are
    /// recorded on the returned form.
    pub async fn get_form_from_request_data(
        &self,
        entity: T,
        input: &Submission,
        method: FormMethod,
    ) -> Result<Form<T>, Error> {
        let mut form = self.get_form(Some(entity), FormOptions::new(method));
        let params = self.get_parameters(input.body(), form.name())?;
        if input.is_text() {
            form.submit_text(params);
        } else {
            form.submit(params);
        }
        if form.errors().is_empty() {
            let errors = self.validator.validate(form.data()).await;
            form.extend_errors(errors);
        }
        Ok(form)
    }

    /// # Errors
    ///
    /// See [`RestHandler::get_form_from_request_data`].
    pub async fn validate_form_data(
        &self,
        entity: T,
        input: impl Into<Submission>,
        method: FormMethod,
    ) -> Result<bool, Error> {
        Ok(self
            .get_form_from_request_data(entity, &input.into(), method)
            .await?
            .is_valid())
    }

    /// Rejection for `form`: a conflict when its errors carry uniqueness language.
    #[must_use]
    pub fn handle_invalid_form(&self, form: &Form<T>) -> Error {
        let err = InvalidFormError::new(form.state());
        tracing::debug!(
            resource = T::SHORT_NAME,
            status = %err.status,
            errors = err.form.errors.len(),
            "Rejected submitted data"
        );
        err.into()
    }

    /// Validates and applies a submitted form.
    ///
    /// | method | effect |
    /// |---|---|
    /// | POST | create |
    /// | PUT | update when the entity has an identity, create otherwise |
    /// | PATCH | update |
    /// | DELETE | nothing; removal goes through [`RestHandler::remove`] |
    ///
    /// Events are published under the method's key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidForm`] when validation fails, and propagates audit and storage
    /// failures.
    pub async fn process_form_request(
        &self,
        entity: T,
        input: impl Into<Submission>,
        method: FormMethod,
    ) -> Result<T, Error> {
        let input = input.into();
        let form = self.get_form_from_request_data(entity, &input, method).await?;
        if !form.is_valid() {
            return Err(self.handle_invalid_form(&form));
        }

        let entity = form.into_data();
        self.auditor.audit(&entity, method).await?;

        // TODO: wrap persist and event dispatch in one transaction once Repository exposes one.
        let key = Some(method.event_key().as_str());
        match method {
            FormMethod::Put if entity.id().is_some() => {
                self.edit(entity, key, EventContext::new()).await
            }
            FormMethod::Post | FormMethod::Put => {
                self.add(entity, key, EventContext::new()).await
            }
            FormMethod::Patch => self.edit(entity, key, EventContext::new()).await,
            FormMethod::Delete => Ok(entity),
        }
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Persists a new entity and publishes the `key` event (`add` by default).
    ///
    /// # Errors
    ///
    /// See [`RestHandler::persist_entity`].
    pub async fn add(
        &self,
        entity: T,
        key: Option<&str>,
        context: EventContext,
    ) -> Result<T, Error> {
        let key = key.unwrap_or(EventKey::Add.as_str());
        tracing::debug!(resource = T::SHORT_NAME, key, "Adding entity");
        let entity = self.persist_entity(entity, true).await?;
        self.fire_event(&entity, key, context).await;
        Ok(entity)
    }

    /// Persists changes and publishes the `key` event (`edit` by default).
    ///
    /// # Errors
    ///
    /// See [`RestHandler::persist_entity`].
    pub async fn edit(
        &self,
        entity: T,
        key: Option<&str>,
        context: EventContext,
    ) -> Result<T, Error> {
        let key = key.unwrap_or(EventKey::Edit.as_str());
        tracing::debug!(resource = T::SHORT_NAME, id = ?entity.id(), key, "Editing entity");
        let entity = self.persist_entity(entity, true).await?;
        self.fire_event(&entity, key, context).await;
        Ok(entity)
    }

    /// Deletes the entity and publishes the `key` event (`remove` by default).
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn remove(
        &self,
        entity: T,
        key: Option<&str>,
        context: EventContext,
    ) -> Result<(), Error> {
        let key = key.unwrap_or(EventKey::Remove.as_str());
        tracing::debug!(resource = T::SHORT_NAME, id = ?entity.id(), key, "Removing entity");
        self.repository.remove(&entity).await?;
        self.repository.flush().await?;
        self.fire_event(&entity, key, context).await;
        Ok(())
    }

    /// Writes the entity, runs the post-write audit hook, then flushes when `and_flush`.
    /// Single attempt; every failure is returned to the caller.
    ///
    /// # Errors
    ///
    /// Storage failures are logged and returned. [`Error::BubbleUp`] from a hook is returned
    /// without logging.
    pub async fn persist_entity(&self, entity: T, and_flush: bool) -> Result<T, Error> {
        let result = self.write(entity, and_flush).await;
        match &result {
            Ok(_) | Err(Error::BubbleUp(_)) => {}
            Err(Error::Storage(StoreError::NotNullViolation { column, message })) => {
                tracing::error!(
                    resource = T::SHORT_NAME,
                    column = ?column,
                    message = %message,
                    "Required field missing"
                );
            }
            Err(err) => {
                tracing::error!(
                    resource = T::SHORT_NAME,
                    kind = err.kind(),
                    message = %err,
                    backtrace = %Backtrace::capture(),
                    "Failed to persist entity"
                );
            }
        }
        result
    }

    async fn write(&self, entity: T, and_flush: bool) -> Result<T, Error> {
        let persisted = self.repository.persist(entity).await?;
        self.auditor.audit_persist(&persisted).await?;
        if and_flush {
            self.repository.flush().await?;
        }
        Ok(persisted)
    }

    // ========================================================================
    // Events
    // ========================================================================

    /// Publishes the event registered for `key` (any case). Unknown or unregistered keys
    /// publish nothing.
    pub async fn fire_event(&self, entity: &T, key: &str, context: EventContext) {
        let Ok(event_key) = key.parse::<EventKey>() else {
            tracing::debug!(resource = T::SHORT_NAME, key, "Ignoring unknown event key");
            return;
        };
        let Some(event) = self.get_event(event_key, entity.clone(), context) else {
            tracing::debug!(resource = T::SHORT_NAME, key = %event_key, "No event registered");
            return;
        };
        if let Some(name) = self.get_event_name(event_key) {
            self.publisher.publish(&name, &event).await;
        }
    }

    /// Event registered for `key`, or `None`.
    #[must_use]
    pub fn get_event(
        &self,
        key: EventKey,
        entity: T,
        context: EventContext,
    ) -> Option<AppEvent<T>> {
        let event_type = self.event_type(key)?;
        Some(AppEvent::new(event_type, key, entity, context))
    }

    #[must_use]
    pub fn event_type(&self, key: EventKey) -> Option<EventType> {
        self.event_types.get(&key).copied()
    }

    /// Configured name for `key`; otherwise the name derived from the registered event type,
    /// which is cached.
    #[must_use]
    pub fn get_event_name(&self, key: EventKey) -> Option<String> {
        {
            let names = self.event_names.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(name) = names.get(&key) {
                return Some(name.clone());
            }
        }
        let derived = self.event_type(key)?.event_name::<T>();
        let mut names = self
            .event_names
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Some(names.entry(key).or_insert(derived).clone())
    }

    pub fn set_event_name(&self, key: EventKey, name: impl Into<String>) {
        self.event_names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, name.into());
    }

    pub fn set_event_names(&self, names: impl IntoIterator<Item = (EventKey, String)>) {
        self.event_names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(names);
    }

    /// Every name configured or derived so far.
    #[must_use]
    pub fn event_names(&self) -> HashMap<EventKey, String> {
        self.event_names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    // ========================================================================
    // Routes
    // ========================================================================

    /// Configured route name for `key`, or `<prefix><key>_<var name>`, which is cached.
    #[must_use]
    pub fn entity_route(&self, key: RouteKey) -> String {
        {
            let routes = self
                .entity_routes
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(route) = routes.get(&key) {
                return route.clone();
            }
        }
        let derived = format!("{}{}_{}", self.config.route_prefix, key, T::var_name());
        self.entity_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_insert(derived)
            .clone()
    }

    /// # Errors
    ///
    /// Returns an [`HandlerErrorKind::InvalidEntityRouteKey`] error unless `key` is one of
    /// `get`, `post`, `put`, `patch` or `delete`.
    pub fn set_entity_route(&self, key: &str, route: impl Into<String>) -> Result<(), HandlerError> {
        let key: RouteKey = key.parse()?;
        self.entity_routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, route.into());
        Ok(())
    }

    #[must_use]
    pub fn entity_routes(&self) -> HashMap<RouteKey, String> {
        self.entity_routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// URL of the entity route for `key`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerErrorKind::MissingDependency`] error without a URL generator, and
    /// propagates generator failures.
    pub fn generate_url(
        &self,
        key: RouteKey,
        params: &[(&str, String)],
    ) -> Result<String, HandlerError> {
        let urls = self
            .urls
            .as_ref()
            .ok_or_else(|| HandlerError::missing_dependency("No URL generator configured"))?;
        urls.generate(&self.entity_route(key), params)
    }

    /// Delete-confirmation form pointing at the entity's delete route.
    ///
    /// # Errors
    ///
    /// Fails when the entity has no identity or its URL cannot be generated.
    pub fn create_remove_form(&self, entity: T) -> Result<Form<T>, HandlerError> {
        let id = entity
            .id()
            .ok_or_else(|| HandlerError::bad_request("Only stored entities can be removed"))?;
        let action = self.generate_url(RouteKey::Delete, &[("id", id.to_string())])?;
        Ok(self.get_form(
            Some(entity),
            FormOptions::new(FormMethod::Delete).with_action(action),
        ))
    }

    // ========================================================================
    // Roles
    // ========================================================================

    /// The principal's roles plus every role they inherit, each once.
    ///
    /// # Errors
    ///
    /// See [`RestHandler::assigned_roles`].
    pub fn current_user_roles(&self, principal: &Principal) -> Result<Vec<String>, HandlerError> {
        let mut roles = principal.roles.clone();
        for role in self.assigned_roles(&principal.roles)? {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
        Ok(roles)
    }

    /// Roles inherited through the hierarchy that are not among `roles`.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerErrorKind::MissingDependency`] error when no hierarchy is set.
    pub fn assigned_roles(&self, roles: &[String]) -> Result<Vec<String>, HandlerError> {
        let hierarchy = self
            .roles
            .as_ref()
            .ok_or_else(|| HandlerError::missing_dependency("No role hierarchy configured"))?;
        Ok(hierarchy
            .reachable_roles(roles)
            .into_iter()
            .filter(|role| !roles.contains(role))
            .collect())
    }
}

fn query_value(raw: &str) -> Value {
    if let Ok(number) = raw.parse::<i64>() {
        return json!(number);
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Null,
        _ => Value::String(raw.to_string()),
    }
}

pub struct RestHandlerBuilder<T: RestResource> {
    repository: Arc<dyn Repository<T>>,
    validator: Arc<dyn FormValidator<T>>,
    publisher: Arc<dyn EventPublisher<T>>,
    auditor: Arc<dyn AuditTrail<T>>,
    urls: Option<Arc<dyn UrlGenerator>>,
    roles: Option<Arc<RoleHierarchy>>,
    config: HandlerConfig,
    event_types: HashMap<EventKey, EventType>,
}

impl<T: RestResource> RestHandlerBuilder<T> {
    fn new(repository: Arc<dyn Repository<T>>) -> Self {
        Self {
            repository,
            validator: Arc::new(NoConstraints),
            publisher: Arc::new(EventDispatcher::new()),
            auditor: Arc::new(NoAudit),
            urls: None,
            roles: None,
            config: HandlerConfig::default(),
            event_types: HashMap::new(),
        }
    }

    #[must_use]
    pub fn validator(mut self, validator: impl FormValidator<T> + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    #[must_use]
    pub fn publisher(mut self, publisher: Arc<dyn EventPublisher<T>>) -> Self {
        self.publisher = publisher;
        self
    }

    #[must_use]
    pub fn auditor(mut self, auditor: impl AuditTrail<T> + 'static) -> Self {
        self.auditor = Arc::new(auditor);
        self
    }

    #[must_use]
    pub fn url_generator(mut self, urls: impl UrlGenerator + 'static) -> Self {
        self.urls = Some(Arc::new(urls));
        self
    }

    #[must_use]
    pub fn role_hierarchy(mut self, roles: RoleHierarchy) -> Self {
        self.roles = Some(Arc::new(roles));
        self
    }

    #[must_use]
    pub fn config(mut self, config: HandlerConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the event type published for `key`.
    #[must_use]
    pub fn event(mut self, key: EventKey, event_type: EventType) -> Self {
        self.event_types.insert(key, event_type);
        self
    }

    /// Registers [`EventType::default_for`] on every key.
    #[must_use]
    pub fn default_events(mut self) -> Self {
        for key in EventKey::ALL {
            if let Some(event_type) = EventType::default_for(key) {
                self.event_types.insert(key, event_type);
            }
        }
        self
    }

    /// # Errors
    ///
    /// Fails when the config names an unknown event key, event type or route key.
    pub fn build(self) -> Result<RestHandler<T>, HandlerError> {
        let mut event_types = self.event_types;
        for (key, type_name) in &self.config.event_types {
            event_types.insert(key.parse()?, type_name.parse()?);
        }

        let mut event_names = HashMap::new();
        for (key, name) in &self.config.event_names {
            event_names.insert(key.parse::<EventKey>()?, name.clone());
        }

        let mut entity_routes = HashMap::new();
        for (key, route) in &self.config.entity_routes {
            entity_routes.insert(key.parse::<RouteKey>()?, route.clone());
        }

        Ok(RestHandler {
            repository: self.repository,
            validator: self.validator,
            publisher: self.publisher,
            auditor: self.auditor,
            urls: self.urls,
            roles: self.roles,
            config: self.config,
            event_types,
            event_names: RwLock::new(event_names),
            entity_routes: RwLock::new(entity_routes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::RouteTable;
    use crate::storage::{MemoryRepository, SortDirection};
    use crate::validation::{
        EntityValidator, UniqueFieldValidator, Validatable, ValidationError, ValidatorChain,
        validators,
    };
    use axum::http::StatusCode;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Gadget {
        id: Option<i64>,
        name: String,
        color: Option<String>,
        #[serde(default)]
        active: bool,
        user_id: Option<i64>,
    }

    impl RestResource for Gadget {
        const SHORT_NAME: &'static str = "Gadget";
        const FORM_FIELDS: &'static [&'static str] = &["name", "color", "active"];

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn assign_id(&mut self, id: i64) {
            self.id = Some(id);
        }
    }

    impl Validatable for Gadget {
        fn validate(&self) -> Result<(), ValidationError> {
            validators::validate_required("name", &self.name)
        }
    }

    /// Publisher recording every published event name.
    #[derive(Default)]
    struct Recorder {
        published: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn names(&self) -> Vec<String> {
            self.published.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EventPublisher<Gadget> for Recorder {
        async fn publish(&self, name: &str, _event: &AppEvent<Gadget>) {
            self.published.lock().unwrap().push(name.to_string());
        }
    }

    /// Repository whose writes always fail with the given driver message.
    struct FailingRepository(&'static str);

    #[async_trait]
    impl Repository<Gadget> for FailingRepository {
        async fn find(&self, _id: i64) -> Result<Option<Gadget>, StoreError> {
            Ok(None)
        }

        async fn find_by(
            &self,
            _criteria: &Criteria,
            _order_by: &[(String, SortDirection)],
            _limit: Option<u64>,
            _offset: Option<u64>,
        ) -> Result<Vec<Gadget>, StoreError> {
            Ok(Vec::new())
        }

        async fn persist(&self, _entity: Gadget) -> Result<Gadget, StoreError> {
            Err(StoreError::classify(self.0))
        }

        async fn remove(&self, _entity: &Gadget) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Fixture {
        handler: RestHandler<Gadget>,
        repository: Arc<MemoryRepository<Gadget>>,
        recorder: Arc<Recorder>,
    }

    fn fixture_with(config: HandlerConfig) -> Fixture {
        let repository = Arc::new(MemoryRepository::<Gadget>::new());
        let recorder = Arc::new(Recorder::default());
        let handler = RestHandler::<Gadget>::builder(repository.clone())
            .validator(
                ValidatorChain::<Gadget>::new()
                    .with(EntityValidator)
                    .with(UniqueFieldValidator::<Gadget>::new(repository.clone(), ["name"])),
            )
            .publisher(recorder.clone())
            .url_generator(RouteTable::for_resource("api_", "gadget", "/gadgets"))
            .config(config)
            .default_events()
            .build()
            .unwrap();
        Fixture {
            handler,
            repository,
            recorder,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(HandlerConfig::default())
    }

    // ========================================================================
    // process_form_request
    // ========================================================================

    #[tokio::test]
    async fn test_post_creates_and_publishes_once() {
        let f = fixture();
        let created = f
            .handler
            .handle_post_request(&json!({"name": "lamp", "color": "blue"}))
            .await
            .unwrap();

        assert_eq!(created.id, Some(1));
        assert_eq!(f.repository.len(), 1);
        assert_eq!(f.recorder.names(), ["gadget.created"]);
    }

    #[tokio::test]
    async fn test_invalid_form_publishes_nothing() {
        let f = fixture();
        let err = f
            .handler
            .handle_post_request(&json!({"name": "  "}))
            .await
            .unwrap_err();

        let Error::InvalidForm(form) = err else {
            panic!("expected an invalid form");
        };
        assert_eq!(form.status, StatusCode::BAD_REQUEST);
        assert_eq!(form.form.name, "gadget");
        assert!(f.repository.is_empty());
        assert!(f.recorder.names().is_empty());
    }

    #[tokio::test]
    async fn test_uniqueness_language_marks_conflict() {
        let f = fixture();
        f.handler
            .handle_post_request(&json!({"name": "lamp"}))
            .await
            .unwrap();
        let err = f
            .handler
            .handle_post_request(&json!({"name": "lamp"}))
            .await
            .unwrap_err();

        let Error::InvalidForm(form) = err else {
            panic!("expected an invalid form");
        };
        assert_eq!(form.status, StatusCode::CONFLICT);
        assert_eq!(f.recorder.names(), ["gadget.created"]);
    }

    #[tokio::test]
    async fn test_put_with_identity_updates() {
        let f = fixture();
        let stored = f.repository.persist(Gadget {
            name: "lamp".to_string(),
            ..Gadget::default()
        })
        .await
        .unwrap();

        let updated = f
            .handler
            .handle_put_request(stored, &json!({"name": "desk lamp"}))
            .await
            .unwrap();

        assert_eq!(updated.id, Some(1));
        assert_eq!(updated.name, "desk lamp");
        assert_eq!(f.repository.len(), 1);
        assert_eq!(f.recorder.names(), ["gadget.updated"]);
    }

    #[tokio::test]
    async fn test_put_without_identity_creates() {
        let f = fixture();
        let created = f
            .handler
            .handle_put_request(Gadget::default(), &json!({"name": "lamp"}))
            .await
            .unwrap();

        assert_eq!(created.id, Some(1));
        assert_eq!(f.recorder.names(), ["gadget.created"]);
    }

    #[tokio::test]
    async fn test_post_binds_text_submission() {
        let f = fixture();
        let created = f
            .handler
            .handle_post_request(Submission::from_pairs([
                ("gadget[name]".to_string(), json!("lamp")),
                ("gadget[color]".to_string(), json!("")),
                ("gadget[active]".to_string(), json!("on")),
                ("gadget[submit]".to_string(), json!("")),
            ]))
            .await
            .unwrap();

        assert_eq!(created.name, "lamp");
        assert_eq!(created.color, None);
        assert!(created.active);
        assert_eq!(f.recorder.names(), ["gadget.created"]);
    }

    #[tokio::test]
    async fn test_patch_keeps_omitted_fields() {
        let f = fixture();
        let stored = f.repository.persist(Gadget {
            name: "lamp".to_string(),
            color: Some("red".to_string()),
            active: true,
            ..Gadget::default()
        })
        .await
        .unwrap();

        let patched = f
            .handler
            .handle_patch_request(stored, &json!({"color": "green"}))
            .await
            .unwrap();

        assert_eq!(patched.name, "lamp");
        assert_eq!(patched.color.as_deref(), Some("green"));
        assert!(patched.active);
        assert_eq!(f.recorder.names(), ["gadget.updated"]);
    }

    #[tokio::test]
    async fn test_delete_method_does_not_persist() {
        let f = fixture();
        let entity = f
            .handler
            .process_form_request(Gadget::default(), &json!({"name": "lamp"}), FormMethod::Delete)
            .await
            .unwrap();

        assert_eq!(entity.id, None);
        assert!(f.repository.is_empty());
        assert!(f.recorder.names().is_empty());
    }

    #[tokio::test]
    async fn test_remove_deletes_and_publishes() {
        let f = fixture();
        let stored = f.repository.persist(Gadget::default()).await.unwrap();

        f.handler.handle_delete_request(stored).await.unwrap();

        assert!(f.repository.is_empty());
        assert_eq!(f.recorder.names(), ["gadget.removed"]);
    }

    #[tokio::test]
    async fn test_add_uses_default_key() {
        let repository = Arc::new(MemoryRepository::<Gadget>::new());
        let recorder = Arc::new(Recorder::default());
        let handler = RestHandler::<Gadget>::builder(repository)
            .publisher(recorder.clone())
            .event(EventKey::Add, EventType::Created)
            .build()
            .unwrap();

        handler
            .add(Gadget::default(), None, EventContext::new())
            .await
            .unwrap();
        // Nothing is registered under "edit".
        handler
            .edit(Gadget::default(), None, EventContext::new())
            .await
            .unwrap();

        assert_eq!(recorder.names(), ["gadget.created"]);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates_without_event() {
        let recorder = Arc::new(Recorder::default());
        let handler = RestHandler::<Gadget>::builder(Arc::new(FailingRepository(
            "NOT NULL constraint failed: gadgets.color",
        )))
        .publisher(recorder.clone())
        .default_events()
        .build()
        .unwrap();

        let err = handler
            .handle_post_request(&json!({"name": "lamp"}))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Storage(StoreError::NotNullViolation { .. })
        ));
        assert!(recorder.names().is_empty());
    }

    #[tokio::test]
    async fn test_bubble_up_errors_pass_through_persist() {
        struct Veto;

        #[async_trait]
        impl AuditTrail<Gadget> for Veto {
            async fn audit_persist(&self, _entity: &Gadget) -> Result<(), Error> {
                Err(Error::BubbleUp("vetoed".into()))
            }
        }

        let handler = RestHandler::<Gadget>::builder(Arc::new(MemoryRepository::<Gadget>::new()))
            .auditor(Veto)
            .build()
            .unwrap();
        let err = handler
            .persist_entity(Gadget::default(), true)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "vetoed");
    }

    // ========================================================================
    // Reads
    // ========================================================================

    #[tokio::test]
    async fn test_get_or_404_is_stable() {
        let f = fixture();
        f.repository.persist(Gadget::default()).await.unwrap();

        for _ in 0..2 {
            assert_eq!(f.handler.get_or_404(1).await.unwrap().id, Some(1));
            let err = f.handler.get_or_404(9).await.unwrap_err();
            assert_eq!(err.to_string(), "The resource '9' was not found.");
        }
    }

    #[test]
    fn test_validate_id() {
        assert_eq!(RestHandler::<Gadget>::validate_id("42").unwrap(), 42);
        for bad in ["", "4a", "-1", "1.0", "99999999999999999999"] {
            let err = RestHandler::<Gadget>::validate_id(bad).unwrap_err();
            assert_eq!(err.kind, HandlerErrorKind::InvalidId, "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_user_aware_lists_only_own_entities() {
        let f = fixture_with(HandlerConfig {
            user_aware: true,
            ..HandlerConfig::default()
        });
        for owner in [Some(1), Some(2), Some(1), None] {
            f.repository
                .persist(Gadget {
                    user_id: owner,
                    ..Gadget::default()
                })
                .await
                .unwrap();
        }

        let alice = Principal::new(1, "alice");
        let own = f.handler.all(None, None, None, None, Some(&alice)).await.unwrap();
        assert_eq!(own.len(), 2);
        assert!(own.iter().all(|g| g.user_id == Some(1)));

        let err = f.handler.all(None, None, None, None, None).await.unwrap_err();
        let Error::Handler(err) = err else {
            panic!("expected a handler error");
        };
        assert_eq!(err.kind, HandlerErrorKind::AnonymousUserNotAllowed);
    }

    #[tokio::test]
    async fn test_handle_get_all_request_parses_query() {
        let f = fixture_with(HandlerConfig {
            filterable_properties: vec!["active".to_string()],
            sortable_properties: vec!["name".to_string()],
            ..HandlerConfig::default()
        });
        for (name, active) in [("b", true), ("a", true), ("c", false), ("d", true)] {
            f.repository
                .persist(Gadget {
                    name: name.to_string(),
                    active,
                    ..Gadget::default()
                })
                .await
                .unwrap();
        }

        let query: HashMap<String, String> = [
            ("active", "true"),
            ("sort", r#"["name","ASC"]"#),
            ("limit", "2"),
            ("offset", "abc"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let found = f.handler.handle_get_all_request(&query, None).await.unwrap();
        let names: Vec<_> = found.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    // ========================================================================
    // Input parsing
    // ========================================================================

    #[test]
    fn test_get_parameters() {
        let f = fixture_with(HandlerConfig {
            boolean_properties: vec!["active".to_string()],
            ..HandlerConfig::default()
        });

        let nested = json!({"gadget": {"name": "lamp", "active": "on", "submit": ""}, "_format": "json"});
        let params = f.handler.get_parameters(&nested, "gadget").unwrap();
        assert_eq!(Value::Object(params), json!({"name": "lamp", "active": true}));

        let flat = json!({"name": "lamp", "active": "0", "_format": "json", "_method": "PUT"});
        let params = f.handler.get_parameters(&flat, "gadget").unwrap();
        assert_eq!(Value::Object(params), json!({"name": "lamp", "active": false}));

        assert!(f.handler.get_parameters(&Value::Null, "gadget").unwrap().is_empty());
        let err = f.handler.get_parameters(&json!([1, 2]), "gadget").unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_validate_form_data() {
        let f = fixture();
        assert!(
            f.handler
                .validate_form_data(Gadget::default(), &json!({"name": "lamp"}), FormMethod::Post)
                .await
                .unwrap()
        );
        assert!(
            !f.handler
                .validate_form_data(Gadget::default(), &json!({"nope": 1}), FormMethod::Post)
                .await
                .unwrap()
        );
    }

    // ========================================================================
    // Events and routes
    // ========================================================================

    #[test]
    fn test_event_names_configured_derived_and_cached() {
        let f = fixture_with(HandlerConfig {
            event_names: [("add".to_string(), "inventory.gadget_added".to_string())].into(),
            ..HandlerConfig::default()
        });

        assert_eq!(
            f.handler.get_event_name(EventKey::Add).as_deref(),
            Some("inventory.gadget_added")
        );
        assert_eq!(f.handler.event_names().get(&EventKey::Edit), None);
        assert_eq!(
            f.handler.get_event_name(EventKey::Edit).as_deref(),
            Some("gadget.updated")
        );
        assert_eq!(
            f.handler.event_names().get(&EventKey::Edit).map(String::as_str),
            Some("gadget.updated")
        );
        assert_eq!(f.handler.get_event_name(EventKey::Get), None);
    }

    #[test]
    fn test_event_names_can_be_replaced() {
        let f = fixture();
        f.handler.set_event_name(EventKey::Post, "gadget.registered");
        f.handler
            .set_event_names([(EventKey::Delete, "gadget.scrapped".to_string())]);

        assert_eq!(
            f.handler.get_event_name(EventKey::Post).as_deref(),
            Some("gadget.registered")
        );
        assert_eq!(
            f.handler.get_event_name(EventKey::Delete).as_deref(),
            Some("gadget.scrapped")
        );
    }

    #[test]
    fn test_get_event_for_unregistered_key_is_none() {
        let f = fixture();
        assert!(
            f.handler
                .get_event(EventKey::Get, Gadget::default(), EventContext::new())
                .is_none()
        );
        let event = f
            .handler
            .get_event(EventKey::Post, Gadget::default(), EventContext::new())
            .unwrap();
        assert_eq!(event.event_type(), EventType::Created);
    }

    #[test]
    fn test_builder_rejects_bad_config_keys() {
        let build = |config: HandlerConfig| {
            RestHandler::<Gadget>::builder(Arc::new(MemoryRepository::<Gadget>::new()))
                .config(config)
                .build()
                .err()
                .map(|err| err.kind)
        };

        let mut config = HandlerConfig::default();
        config.event_types.insert("archive".to_string(), "created".to_string());
        assert_eq!(build(config), Some(HandlerErrorKind::InvalidKey));

        let mut config = HandlerConfig::default();
        config.event_types.insert("add".to_string(), "exploded".to_string());
        assert_eq!(build(config), Some(HandlerErrorKind::InvalidType));

        let mut config = HandlerConfig::default();
        config.entity_routes.insert("list".to_string(), "x".to_string());
        assert_eq!(build(config), Some(HandlerErrorKind::InvalidEntityRouteKey));
    }

    #[test]
    fn test_entity_routes() {
        let f = fixture();
        assert_eq!(f.handler.entity_route(RouteKey::Get), "api_get_gadget");
        assert_eq!(
            f.handler.entity_routes().get(&RouteKey::Get).map(String::as_str),
            Some("api_get_gadget")
        );

        f.handler.set_entity_route("put", "gadget_replace").unwrap();
        assert_eq!(f.handler.entity_route(RouteKey::Put), "gadget_replace");

        let err = f.handler.set_entity_route("list", "x").unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::InvalidEntityRouteKey);
    }

    #[tokio::test]
    async fn test_create_remove_form() {
        let f = fixture();
        let stored = f
            .repository
            .persist(Gadget {
                name: "lamp".to_string(),
                ..Gadget::default()
            })
            .await
            .unwrap();

        let form = f.handler.create_remove_form(stored).unwrap();
        assert_eq!(form.method(), FormMethod::Delete);
        assert_eq!(form.action(), Some("/gadgets/1"));

        assert!(f.handler.create_remove_form(Gadget::default()).is_err());
    }

    // ========================================================================
    // Roles and metadata
    // ========================================================================

    #[test]
    fn test_roles() {
        let principal = Principal::new(1, "alice").with_roles(["ROLE_ADMIN"]);

        let f = fixture();
        let err = f.handler.current_user_roles(&principal).unwrap_err();
        assert_eq!(err.kind, HandlerErrorKind::MissingDependency);

        let handler = RestHandler::<Gadget>::builder(Arc::new(MemoryRepository::<Gadget>::new()))
            .role_hierarchy(
                RoleHierarchy::default()
                    .with_role("ROLE_ADMIN", ["ROLE_USER"])
                    .with_role("ROLE_USER", ["ROLE_ADMIN"]),
            )
            .build()
            .unwrap();
        assert_eq!(
            handler.assigned_roles(&principal.roles).unwrap(),
            ["ROLE_USER"]
        );
        assert_eq!(
            handler.current_user_roles(&principal).unwrap(),
            ["ROLE_ADMIN", "ROLE_USER"]
        );
    }

    #[test]
    fn test_entity_property_names() {
        let f = fixture();
        let names = f.handler.entity_property_names(&["id", "user_id"]);
        assert_eq!(names, ["active", "color", "name"]);
    }
}

//! Validation Support
//!
//! Entities implement [`Validatable`] for their own field rules. A handler runs a
//! [`FormValidator`] over every bound form before anything is persisted; validators that
//! need the store, such as [`UniqueFieldValidator`], implement that trait directly.
//!
//! # Example
//!
//! ```rust,ignore
//! use restbridge::validation::{Validatable, ValidationError, validators};
//!
//! impl Validatable for Widget {
//!     fn validate(&self) -> Result<(), ValidationError> {
//!         validators::validate_required("name", &self.name)?;
//!         validators::validate_length("name", &self.name, None, Some(64))
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::resource::RestResource;
use crate::storage::{Criteria, Repository};

/// Validation error with field name and message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    /// Human-readable error message
    pub message: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Collection of validation errors
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Messages attached to `field`.
    #[must_use]
    pub fn for_field(&self, field: &str) -> Vec<String> {
        self.errors
            .iter()
            .filter(|error| error.field == field)
            .map(|error| error.message.clone())
            .collect()
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|error| error.message.clone()).collect()
    }

    /// Messages grouped by field name.
    #[must_use]
    pub fn by_field(&self) -> BTreeMap<String, Vec<String>> {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for error in &self.errors {
            grouped
                .entry(error.field.clone())
                .or_default()
                .push(error.message.clone());
        }
        grouped
    }

    /// Convert to Result
    ///
    /// # Errors
    ///
    /// Returns `self` when at least one error was collected.
    pub fn result(self) -> Result<(), Self> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl From<ValidationError> for ValidationErrors {
    fn from(error: ValidationError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Validation failed with {} error(s):", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Field rules an entity checks on itself.
pub trait Validatable {
    /// Return `Ok(())` if valid, or the first rule that failed.
    ///
    /// # Errors
    ///
    /// Returns the failing field and message.
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Validation run by the handler on every bound form.
#[async_trait]
pub trait FormValidator<T: RestResource>: Send + Sync {
    /// Errors for `entity`; empty when it may be persisted.
    async fn validate(&self, entity: &T) -> ValidationErrors;
}

/// Accepts every entity.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoConstraints;

#[async_trait]
impl<T: RestResource> FormValidator<T> for NoConstraints {
    async fn validate(&self, _entity: &T) -> ValidationErrors {
        ValidationErrors::new()
    }
}

/// Runs the entity's own [`Validatable`] rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct EntityValidator;

#[async_trait]
impl<T: RestResource + Validatable> FormValidator<T> for EntityValidator {
    async fn validate(&self, entity: &T) -> ValidationErrors {
        match Validatable::validate(entity) {
            Ok(()) => ValidationErrors::new(),
            Err(error) => error.into(),
        }
    }
}

pub const UNVERIFIED_UNIQUENESS_MESSAGE: &str = "Uniqueness could not be verified.";

/// Rejects values already stored on another entity of the same type.
///
/// Messages read `'<value>' is already in use with another <name>.`, which the handler
/// recognises as a conflict. A failed lookup rejects the field.
pub struct UniqueFieldValidator<T> {
    repository: Arc<dyn Repository<T>>,
    fields: Vec<String>,
}

impl<T: RestResource> UniqueFieldValidator<T> {
    pub fn new<I, S>(repository: Arc<dyn Repository<T>>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repository,
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl<T: RestResource> FormValidator<T> for UniqueFieldValidator<T> {
    async fn validate(&self, entity: &T) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        let Ok(Value::Object(values)) = serde_json::to_value(entity) else {
            return errors;
        };

        for field in &self.fields {
            let Some(value) = values.get(field).filter(|value| !value.is_null()) else {
                continue;
            };
            let mut criteria = Criteria::new();
            criteria.insert(field.clone(), value.clone());

            match self.repository.find_by(&criteria, &[], Some(2), None).await {
                Ok(found) if found.iter().any(|other| other.id() != entity.id()) => {
                    let shown = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                    errors.add(ValidationError::new(
                        field.clone(),
                        format!("'{shown}' is already in use with another {}.", T::var_name()),
                    ));
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(field = %field, error = %err, "Uniqueness lookup failed");
                    errors.add(ValidationError::new(field.clone(), UNVERIFIED_UNIQUENESS_MESSAGE));
                }
            }
        }
        errors
    }
}

/// Runs several validators and merges their errors.
pub struct ValidatorChain<T> {
    validators: Vec<Arc<dyn FormValidator<T>>>,
}

impl<T: RestResource> ValidatorChain<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            validators: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, validator: impl FormValidator<T> + 'static) -> Self {
        self.validators.push(Arc::new(validator));
        self
    }
}

impl<T: RestResource> Default for ValidatorChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: RestResource> FormValidator<T> for ValidatorChain<T> {
    async fn validate(&self, entity: &T) -> ValidationErrors {
        let mut errors = ValidationErrors::new();
        for validator in &self.validators {
            errors.extend(validator.validate(entity).await);
        }
        errors
    }
}

/// Helper validators for common patterns
pub mod validators {
    use super::ValidationError;

    /// Validate string length is within range
    ///
    /// # Errors
    ///
    /// Fails when `value` is shorter than `min` or longer than `max` characters.
    pub fn validate_length(
        field: &str,
        value: &str,
        min: Option<usize>,
        max: Option<usize>,
    ) -> Result<(), ValidationError> {
        let len = value.chars().count();

        if let Some(min_len) = min {
            if len < min_len {
                return Err(ValidationError::new(
                    field,
                    format!("Must be at least {min_len} characters"),
                ));
            }
        }

        if let Some(max_len) = max {
            if len > max_len {
                return Err(ValidationError::new(
                    field,
                    format!("Must be at most {max_len} characters"),
                ));
            }
        }

        Ok(())
    }

    /// Validate value is not blank
    ///
    /// # Errors
    ///
    /// Fails on empty or whitespace-only input.
    pub fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::new(field, "This value should not be blank."));
        }
        Ok(())
    }
}

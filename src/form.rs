//! Form binding.
//!
//! A [`Form`] binds a submitted JSON object onto a copy of an entity through the entity's
//! serde representation. How absent fields are treated depends on the [`FormMethod`]:
//!
//! - POST, PUT and DELETE submit the whole form. Bindable fields missing from the payload
//!   fall back to their serde default, so required fields fail to bind.
//! - PATCH submits part of the form. Missing fields keep their current values.
//!
//! The identity field is never bound from submitted data.

use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::config::boolish;
use crate::errors::HandlerError;
use crate::event::EventKey;
use crate::resource::RestResource;
use crate::validation::{ValidationError, ValidationErrors};

pub const EXTRA_FIELDS_MESSAGE: &str = "This form should not contain extra fields.";
pub const BLANK_MESSAGE: &str = "This value should not be blank.";

static MISSING_FIELD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"missing field `(\w+)`").ok());

/// HTTP method a form is submitted with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FormMethod {
    #[default]
    Post,
    Put,
    Patch,
    Delete,
}

impl FormMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Whether a submit resets bindable fields absent from the payload.
    #[must_use]
    pub const fn clears_missing(self) -> bool {
        !matches!(self, Self::Patch)
    }

    /// Event key fired when a form submitted with this method is persisted.
    #[must_use]
    pub const fn event_key(self) -> EventKey {
        match self {
            Self::Post => EventKey::Post,
            Self::Put => EventKey::Put,
            Self::Patch => EventKey::Patch,
            Self::Delete => EventKey::Delete,
        }
    }
}

impl fmt::Display for FormMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormMethod {
    type Err = HandlerError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_uppercase().as_str() {
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(HandlerError::bad_request(format!(
                "'{value}' is not a form method"
            ))),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FormOptions {
    /// URL the rendered form submits to.
    pub action: Option<String>,
    pub method: FormMethod,
}

impl FormOptions {
    #[must_use]
    pub fn new(method: FormMethod) -> Self {
        Self {
            action: None,
            method,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Snapshot of a form, carried by rejected-form errors.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FormState {
    pub name: String,
    pub method: FormMethod,
    pub submitted: Map<String, Value>,
    pub errors: ValidationErrors,
}

pub struct Form<T> {
    name: String,
    options: FormOptions,
    data: T,
    submitted: Option<Map<String, Value>>,
    errors: ValidationErrors,
}

impl<T: RestResource> Form<T> {
    pub fn new(name: impl Into<String>, data: T, options: FormOptions) -> Self {
        Self {
            name: name.into(),
            options,
            data,
            submitted: None,
            errors: ValidationErrors::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn method(&self) -> FormMethod {
        self.options.method
    }

    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.options.action.as_deref()
    }

    #[must_use]
    pub fn data(&self) -> &T {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> T {
        self.data
    }

    #[must_use]
    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    #[must_use]
    pub fn is_submitted(&self) -> bool {
        self.submitted.is_some()
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_submitted() && self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.add(error);
    }

    pub fn extend_errors(&mut self, errors: ValidationErrors) {
        self.errors.extend(errors);
    }

    /// Names of the fields this form binds, in display order.
    #[must_use]
    pub fn fields(&self) -> Vec<String> {
        if T::FORM_FIELDS.is_empty() {
            fields_of(&self.data)
                .keys()
                .filter(|field| field.as_str() != T::ID_FIELD)
                .cloned()
                .collect()
        } else {
            T::FORM_FIELDS.iter().map(ToString::to_string).collect()
        }
    }

    /// Binds `data` onto the entity. Binding problems are collected as form errors.
    pub fn submit(&mut self, data: Map<String, Value>) {
        let bindable = self.fields();
        for field in data.keys() {
            if field != T::ID_FIELD && !bindable.contains(field) {
                self.errors
                    .add(ValidationError::new(field.clone(), EXTRA_FIELDS_MESSAGE));
            }
        }

        match self.bind(&data) {
            Ok(bound) => self.data = bound,
            Err(err) => self.errors.add(self.binding_error(&err)),
        }
        self.submitted = Some(data);
    }

    /// Binds text input, as sent by HTML forms.
    ///
    /// Each string is read against the field's current value: numbers and booleans are
    /// parsed and an empty string clears the field. A field without a current value gets
    /// the narrowest reading (number, boolean, then text). When a reading does not bind,
    /// the raw text is tried instead.
    pub fn submit_text(&mut self, data: Map<String, Value>) {
        let current = fields_of(&self.data);
        let mut typed = Map::new();
        let mut fallbacks = Vec::new();
        for (field, value) in &data {
            let value = match value {
                Value::String(text) => {
                    let hint = current.get(field).unwrap_or(&Value::Null);
                    let read = text_value(text, hint);
                    if !read.is_string() && !hint.is_boolean() {
                        fallbacks.push((field.clone(), value.clone()));
                    }
                    read
                }
                other => other.clone(),
            };
            typed.insert(field.clone(), value);
        }

        if !fallbacks.is_empty() && self.bind(&typed).is_err() {
            let mut all = typed.clone();
            let mut chosen = None;
            for (field, raw) in &fallbacks {
                let mut retry = typed.clone();
                retry.insert(field.clone(), raw.clone());
                all.insert(field.clone(), raw.clone());
                if self.bind(&retry).is_ok() {
                    chosen = Some(retry);
                    break;
                }
            }
            typed = match chosen {
                Some(retry) => retry,
                None if self.bind(&all).is_ok() => all,
                None => typed,
            };
        }
        self.submit(typed);
    }

    /// The entity with `data` applied. Unbindable keys are skipped.
    fn bind(&self, data: &Map<String, Value>) -> Result<T, serde_json::Error> {
        let bindable = self.fields();
        let mut current = fields_of(&self.data);

        if self.method().clears_missing() {
            for field in &bindable {
                if !data.contains_key(field) {
                    current.remove(field);
                }
            }
        }

        for (field, value) in data {
            if field != T::ID_FIELD && bindable.contains(field) {
                current.insert(field.clone(), value.clone());
            }
        }
        serde_json::from_value(Value::Object(current))
    }

    fn binding_error(&self, err: &serde_json::Error) -> ValidationError {
        let message = err.to_string();
        let missing = MISSING_FIELD
            .as_ref()
            .and_then(|pattern| pattern.captures(&message))
            .and_then(|captures| captures.get(1));
        match missing {
            Some(field) => ValidationError::new(field.as_str(), BLANK_MESSAGE),
            None => ValidationError::new(self.name.clone(), message),
        }
    }

    #[must_use]
    pub fn state(&self) -> FormState {
        FormState {
            name: self.name.clone(),
            method: self.method(),
            submitted: self.submitted.clone().unwrap_or_default(),
            errors: self.errors.clone(),
        }
    }

    /// Render model for templates.
    #[must_use]
    pub fn view(&self) -> FormView {
        let values = fields_of(&self.data);
        let names = if self.method() == FormMethod::Delete {
            Vec::new()
        } else {
            self.fields()
        };

        let fields: Vec<FieldView> = names
            .into_iter()
            .map(|name| FieldView {
                label: humanize(&name),
                value: display_value(values.get(&name).unwrap_or(&Value::Null)),
                errors: self.errors.for_field(&name),
                name,
            })
            .collect();

        let errors = self
            .errors
            .errors()
            .iter()
            .filter(|error| !fields.iter().any(|field| field.name == error.field))
            .map(|error| error.message.clone())
            .collect();

        FormView {
            name: self.name.clone(),
            action: self.options.action.clone().unwrap_or_default(),
            method: self.method().as_str(),
            override_method: self.method() != FormMethod::Post,
            fields,
            errors,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct FormView {
    pub name: String,
    pub action: String,
    pub method: &'static str,
    /// HTML forms only send GET and POST; other methods travel in a `_method` field.
    pub override_method: bool,
    pub fields: Vec<FieldView>,
    /// Errors not attached to a rendered field.
    pub errors: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldView {
    pub name: String,
    pub label: String,
    pub value: String,
    pub errors: Vec<String>,
}

pub(crate) fn fields_of<T: Serialize>(entity: &T) -> Map<String, Value> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    }
}

fn text_value(text: &str, hint: &Value) -> Value {
    if let Value::Bool(_) = hint {
        return Value::Bool(boolish(text));
    }
    if text.trim().is_empty() {
        return Value::Null;
    }
    match hint {
        Value::String(_) => Value::String(text.to_string()),
        Value::Number(_) => number_value(text).unwrap_or_else(|| Value::String(text.to_string())),
        _ => number_value(text)
            .or_else(|| match text {
                "true" => Some(Value::Bool(true)),
                "false" => Some(Value::Bool(false)),
                _ => None,
            })
            .unwrap_or_else(|| Value::String(text.to_string())),
    }
}

fn number_value(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(number) = text.parse::<i64>() {
        return Some(Value::from(number));
    }
    text.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn humanize(field: &str) -> String {
    let spaced = field.replace('_', " ");
    let mut chars = spaced.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Gizmo {
        id: Option<i64>,
        name: String,
        color: Option<String>,
        #[serde(default)]
        enabled: bool,
        owner_id: Option<i64>,
    }

    impl RestResource for Gizmo {
        const SHORT_NAME: &'static str = "Gizmo";
        const FORM_FIELDS: &'static [&'static str] = &["name", "color", "enabled"];

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn assign_id(&mut self, id: i64) {
            self.id = Some(id);
        }
    }

    fn stored() -> Gizmo {
        Gizmo {
            id: Some(7),
            name: "sprocket".to_string(),
            color: Some("red".to_string()),
            enabled: true,
            owner_id: Some(3),
        }
    }

    fn payload(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_full_submit_resets_missing_fields() {
        let mut form = Form::new("gizmo", stored(), FormOptions::new(FormMethod::Put));
        form.submit(payload(json!({"name": "cog"})));

        assert!(form.is_valid(), "{}", form.errors());
        let bound = form.into_data();
        assert_eq!(bound.name, "cog");
        assert_eq!(bound.color, None);
        assert!(!bound.enabled);
        // Fields outside the form are untouched.
        assert_eq!(bound.owner_id, Some(3));
        assert_eq!(bound.id, Some(7));
    }

    #[test]
    fn test_partial_submit_keeps_missing_fields() {
        let mut form = Form::new("gizmo", stored(), FormOptions::new(FormMethod::Patch));
        form.submit(payload(json!({"color": "blue"})));

        assert!(form.is_valid());
        let bound = form.into_data();
        assert_eq!(bound.name, "sprocket");
        assert_eq!(bound.color.as_deref(), Some("blue"));
        assert!(bound.enabled);
    }

    #[test]
    fn test_identity_is_never_bound() {
        let mut form = Form::new("gizmo", stored(), FormOptions::new(FormMethod::Patch));
        form.submit(payload(json!({"id": 99, "name": "cog"})));

        assert!(form.is_valid());
        assert_eq!(form.data().id, Some(7));
    }

    #[test]
    fn test_missing_required_field_is_reported_on_the_field() {
        let mut form = Form::new("gizmo", Gizmo::default(), FormOptions::default());
        form.submit(payload(json!({"color": "green"})));

        assert!(!form.is_valid());
        assert_eq!(form.errors().for_field("name"), [BLANK_MESSAGE]);
    }

    #[test]
    fn test_extra_fields_are_rejected() {
        let mut form = Form::new("gizmo", Gizmo::default(), FormOptions::default());
        form.submit(payload(json!({"name": "cog", "owner_id": 1})));

        assert!(!form.is_valid());
        assert_eq!(form.errors().for_field("owner_id"), [EXTRA_FIELDS_MESSAGE]);
        assert_eq!(form.state().submitted["owner_id"], 1);
    }

    #[test]
    fn test_text_submit_reads_values_against_field_types() {
        let mut form = Form::new("gizmo", stored(), FormOptions::new(FormMethod::Put));
        form.submit_text(payload(json!({"name": "42", "color": "", "enabled": "on"})));

        assert!(form.is_valid(), "{}", form.errors());
        let bound = form.into_data();
        assert_eq!(bound.name, "42");
        assert_eq!(bound.color, None);
        assert!(bound.enabled);
    }

    #[test]
    fn test_text_submit_falls_back_to_text_for_untyped_fields() {
        #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
        struct Part {
            id: Option<i64>,
            code: Option<String>,
            quantity: Option<i64>,
        }

        impl RestResource for Part {
            const SHORT_NAME: &'static str = "Part";

            fn id(&self) -> Option<i64> {
                self.id
            }

            fn assign_id(&mut self, id: i64) {
                self.id = Some(id);
            }
        }

        let mut form = Form::new("part", Part::default(), FormOptions::default());
        form.submit_text(payload(json!({"code": "123", "quantity": "4"})));

        assert!(form.is_valid(), "{}", form.errors());
        assert_eq!(form.data().code.as_deref(), Some("123"));
        assert_eq!(form.data().quantity, Some(4));
    }

    #[test]
    fn test_unsubmitted_form_is_not_valid() {
        let form = Form::new("gizmo", stored(), FormOptions::default());
        assert!(!form.is_submitted());
        assert!(!form.is_valid());
    }

    #[test]
    fn test_view_lists_form_fields_with_values() {
        let form = Form::new(
            "gizmo",
            stored(),
            FormOptions::new(FormMethod::Put).with_action("/gizmos/7"),
        );
        let view = form.view();

        assert_eq!(view.action, "/gizmos/7");
        assert_eq!(view.method, "PUT");
        assert!(view.override_method);
        let names: Vec<_> = view.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["name", "color", "enabled"]);
        assert_eq!(view.fields[0].label, "Name");
        assert_eq!(view.fields[2].value, "true");
    }

    #[test]
    fn test_delete_view_has_no_fields() {
        let form = Form::new("gizmo", stored(), FormOptions::new(FormMethod::Delete));
        assert!(form.view().fields.is_empty());
    }

    #[test]
    fn test_method_parsing_and_flags() {
        assert_eq!("patch".parse::<FormMethod>().unwrap(), FormMethod::Patch);
        assert!("GET".parse::<FormMethod>().is_err());
        assert!(FormMethod::Put.clears_missing());
        assert!(!FormMethod::Patch.clears_missing());
        assert_eq!(FormMethod::Post.event_key(), EventKey::Post);
    }
}

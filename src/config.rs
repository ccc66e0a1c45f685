//! Per-resource handler configuration.
//!
//! Every field has a default, so a config can be built in code, deserialized from JSON, or
//! mixed:
//!
//! ```rust,ignore
//! let config = HandlerConfig::from_json(r#"{"user_aware": "true", "filterable_properties": ["sku"]}"#)?;
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

use crate::errors::Error;

/// Environment variable overriding the default route prefix.
pub const ROUTE_PREFIX_ENV: &str = "RESTBRIDGE_ROUTE_PREFIX";

/// Built-in template names registered by [`HandlebarsRenderer`](crate::templating::HandlebarsRenderer).
pub const ENTITY_FORM_TEMPLATE: &str = "entity_form";
pub const DELETE_ENTITY_TEMPLATE: &str = "delete_entity";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Scope every list query to the current principal.
    #[serde(deserialize_with = "deserialize_boolish")]
    pub user_aware: bool,
    /// Field holding the owner's identity.
    pub user_aware_property: String,
    /// Prefix of derived entity route names.
    pub route_prefix: String,
    /// Form name; defaults to the resource's var name.
    pub form_name: Option<String>,
    /// Key wrapping single entities in responses; defaults to the resource's var name.
    pub template_var_name: Option<String>,
    /// Fields coerced from boolean-ish strings before binding.
    pub boolean_properties: Vec<String>,
    /// Query parameters accepted as equality filters on list requests.
    pub filterable_properties: Vec<String>,
    /// Fields a list request may order by.
    pub sortable_properties: Vec<String>,
    /// Event key to event name.
    pub event_names: HashMap<String, String>,
    /// Event key to event type name.
    pub event_types: HashMap<String, String>,
    /// Route key to route name.
    pub entity_routes: HashMap<String, String>,
    pub templates: TemplateConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            user_aware: false,
            user_aware_property: "user_id".to_string(),
            route_prefix: default_route_prefix(),
            form_name: None,
            template_var_name: None,
            boolean_properties: Vec::new(),
            filterable_properties: Vec::new(),
            sortable_properties: Vec::new(),
            event_names: HashMap::new(),
            event_types: HashMap::new(),
            entity_routes: HashMap::new(),
            templates: TemplateConfig::default(),
        }
    }
}

impl HandlerConfig {
    /// # Errors
    ///
    /// Returns [`Error::Config`] when `json` is not a valid configuration document.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|err| Error::Config(err.to_string()))
    }
}

/// Templates used by the form-presentation actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub new_form: String,
    pub edit_form: String,
    pub delete_form: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            new_form: ENTITY_FORM_TEMPLATE.to_string(),
            edit_form: ENTITY_FORM_TEMPLATE.to_string(),
            delete_form: DELETE_ENTITY_TEMPLATE.to_string(),
        }
    }
}

fn default_route_prefix() -> String {
    std::env::var(ROUTE_PREFIX_ENV).unwrap_or_else(|_| "api_".to_string())
}

/// Reads a boolean-ish string: `1`, `true`, `on` and `yes` (any case) are true.
#[must_use]
pub fn boolish(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "on" | "yes"
    )
}

fn deserialize_boolish<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Boolish {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Boolish::deserialize(deserializer)? {
        Boolish::Bool(flag) => flag,
        Boolish::Int(number) => number == 1,
        Boolish::Text(text) => boolish(&text),
    })
}

//! Rendering of form fragments.
//!
//! [`HandlebarsRenderer`] comes with two templates: [`ENTITY_FORM_TEMPLATE`] for create and
//! edit forms, and [`DELETE_ENTITY_TEMPLATE`] for the delete confirmation. Both receive
//! `form` (a [`FormView`](crate::form::FormView)), `withSubmitButton` and `submitButtonText`.
//! Register replacements under the same names to restyle them.

use handlebars::Handlebars;
use serde_json::Value;

pub use crate::config::{DELETE_ENTITY_TEMPLATE, ENTITY_FORM_TEMPLATE};
use crate::errors::Error;

const ENTITY_FORM_SOURCE: &str = r#"<form name="{{form.name}}" method="post" action="{{form.action}}">
{{#if form.override_method}}  <input type="hidden" name="_method" value="{{form.method}}">
{{/if}}{{#each form.errors}}  <p class="form-error">{{this}}</p>
{{/each}}{{#each form.fields}}  <div class="form-row">
    <label for="{{../form.name}}_{{name}}">{{label}}</label>
    <input id="{{../form.name}}_{{name}}" name="{{../form.name}}[{{name}}]" value="{{value}}">
{{#each errors}}    <span class="field-error">{{this}}</span>
{{/each}}  </div>
{{/each}}{{#if withSubmitButton}}  <button type="submit" name="{{form.name}}[submit]">{{submitButtonText}}</button>
{{/if}}</form>
"#;

const DELETE_ENTITY_SOURCE: &str = r#"<form name="{{form.name}}" method="post" action="{{form.action}}">
  <input type="hidden" name="_method" value="DELETE">
{{#if withSubmitButton}}  <button type="submit" name="{{form.name}}[submit]">{{submitButtonText}}</button>
{{/if}}</form>
"#;

/// Templating capability.
pub trait TemplateRenderer: Send + Sync {
    /// # Errors
    ///
    /// Fails when `template` is unknown or cannot be rendered with `context`.
    fn render(&self, template: &str, context: &Value) -> Result<String, Error>;
}

pub struct HandlebarsRenderer {
    registry: Handlebars<'static>,
}

impl HandlebarsRenderer {
    /// Renderer with the built-in form templates registered.
    ///
    /// # Errors
    ///
    /// Fails if a built-in template does not compile.
    pub fn new() -> Result<Self, Error> {
        let mut renderer = Self {
            registry: Handlebars::new(),
        };
        renderer.register_template(ENTITY_FORM_TEMPLATE, ENTITY_FORM_SOURCE)?;
        renderer.register_template(DELETE_ENTITY_TEMPLATE, DELETE_ENTITY_SOURCE)?;
        Ok(renderer)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when `source` is not a valid template.
    pub fn register_template(&mut self, name: &str, source: &str) -> Result<(), Error> {
        self.registry
            .register_template_string(name, source)
            .map_err(|err| Error::Config(format!("Template '{name}' does not compile: {err}")))
    }

    #[must_use]
    pub fn has_template(&self, name: &str) -> bool {
        self.registry.has_template(name)
    }
}

impl TemplateRenderer for HandlebarsRenderer {
    fn render(&self, template: &str, context: &Value) -> Result<String, Error> {
        self.registry
            .render(template, context)
            .map_err(|err| Error::Internal(format!("Failed to render '{template}': {err}")))
    }
}

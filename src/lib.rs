//! Generic REST resource handling for Axum and Sea-ORM.
//!
//! A [`RestHandler`] runs validation, persistence and event publishing for one resource type.
//! A [`RestViewController`] maps HTTP verbs onto it and shapes the responses, including
//! HTML form fragments for create, edit and delete.
//!
//! ```rust,ignore
//! let handler = RestHandler::builder(Arc::new(SeaOrmRepository::<Widget>::new(db)))
//!     .validator(EntityValidator)
//!     .url_generator(RouteTable::for_resource("api_", "widget", "/api/widgets"))
//!     .default_events()
//!     .build()?;
//! let controller = RestViewController::new(Arc::new(handler), Arc::new(HandlebarsRenderer::new()?));
//! let app = Router::new().nest("/api/widgets", restbridge::router(controller));
//! ```

pub mod config;
pub mod controller;
pub mod errors;
pub mod event;
pub mod form;
pub mod handler;
pub mod query;
pub mod resource;
pub mod routing;
pub mod security;
pub mod storage;
pub mod submission;
pub mod templating;
pub mod validation;
pub mod view;

pub use config::HandlerConfig;
pub use controller::{DefaultResponder, HandlerErrorResponder, RestViewController, router};
pub use errors::{ApiError, Error, HandlerError, HandlerErrorKind};
pub use event::{AppEvent, EventDispatcher, EventKey, EventPublisher, EventType};
pub use handler::{AuditTrail, NoAudit, RestHandler, RestHandlerBuilder};
pub use resource::RestResource;
pub use routing::{RouteKey, RouteTable, UrlGenerator};
pub use security::{CurrentUser, Principal, RoleHierarchy};
pub use storage::{MemoryRepository, Repository, SeaOrmRepository, SeaOrmResource};
pub use submission::{Submission, UploadedFile};
pub use templating::{HandlebarsRenderer, TemplateRenderer};
pub use validation::{
    EntityValidator, FormValidator, UniqueFieldValidator, Validatable, ValidatorChain,
};
pub use view::View;

#![allow(dead_code)]

use axum::Router;
use restbridge::{
    EntityValidator, EventDispatcher, HandlebarsRenderer, HandlerConfig, RestHandler,
    RestViewController, RouteTable, SeaOrmRepository, UniqueFieldValidator, ValidatorChain,
};
use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::prelude::*;
use std::sync::Arc;

pub mod widget_entity;

use widget_entity::Widget;

pub async fn setup_test_db() -> Result<DatabaseConnection, DbErr> {
    // Handler logs show up under `cargo test -- --nocapture`.
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let db = Database::connect("sqlite::memory:").await?;

    // Run migrations
    Migrator::up(&db, None).await?;

    Ok(db)
}

/// Everything a test needs to drive and observe the widget API.
pub struct TestApp {
    pub router: Router,
    pub repository: Arc<SeaOrmRepository<Widget>>,
    pub events: Arc<EventDispatcher<Widget>>,
}

pub fn setup_test_app(db: DatabaseConnection) -> TestApp {
    setup_test_app_with(db, HandlerConfig::default())
}

pub fn setup_test_app_with(db: DatabaseConnection, config: HandlerConfig) -> TestApp {
    let repository = Arc::new(SeaOrmRepository::<Widget>::new(db));
    let events = Arc::new(EventDispatcher::<Widget>::new());

    let handler = RestHandler::<Widget>::builder(repository.clone())
        .validator(
            ValidatorChain::<Widget>::new()
                .with(EntityValidator)
                .with(UniqueFieldValidator::<Widget>::new(repository.clone(), ["name"])),
        )
        .publisher(events.clone())
        .url_generator(RouteTable::for_resource(
            &config.route_prefix,
            "widget",
            "/api/widgets",
        ))
        .config(config)
        .default_events()
        .build()
        .expect("handler configuration is valid");

    let renderer = HandlebarsRenderer::new().expect("built-in templates compile");
    let controller = RestViewController::new(Arc::new(handler), Arc::new(renderer));

    TestApp {
        router: Router::new().nest("/api/widgets", restbridge::router(controller)),
        repository,
        events,
    }
}

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(CreateWidgetTable)]
    }
}

pub struct CreateWidgetTable;

#[async_trait::async_trait]
impl MigrationName for CreateWidgetTable {
    fn name(&self) -> &'static str {
        "m20240101_000001_create_widget_table"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateWidgetTable {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let table = Table::create()
            .table(WidgetEntity)
            .if_not_exists()
            .col(
                ColumnDef::new(WidgetColumn::Id)
                    .integer()
                    .not_null()
                    .auto_increment()
                    .primary_key(),
            )
            .col(ColumnDef::new(WidgetColumn::Name).string().not_null())
            .col(ColumnDef::new(WidgetColumn::Sku).string().null().unique_key())
            .col(
                ColumnDef::new(WidgetColumn::CompanyId)
                    .big_integer()
                    .not_null(),
            )
            .col(
                ColumnDef::new(WidgetColumn::Active)
                    .boolean()
                    .not_null()
                    .default(false),
            )
            .col(ColumnDef::new(WidgetColumn::UserId).big_integer().null())
            .to_owned();

        manager.create_table(table).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WidgetEntity).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(Debug)]
pub enum WidgetColumn {
    Id,
    Name,
    Sku,
    CompanyId,
    Active,
    UserId,
}

impl Iden for WidgetColumn {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Id => "id",
                Self::Name => "name",
                Self::Sku => "sku",
                Self::CompanyId => "company_id",
                Self::Active => "active",
                Self::UserId => "user_id",
            }
        )
        .unwrap();
    }
}

#[derive(Debug)]
pub struct WidgetEntity;

impl Iden for WidgetEntity {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(s, "widgets").unwrap();
    }
}

use restbridge::storage::SeaOrmResource;
use restbridge::validation::{Validatable, ValidationError, validators};
use restbridge::RestResource;
use sea_orm::{ActiveValue, entity::prelude::*};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Deserialize, Serialize)]
#[sea_orm(table_name = "widgets")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[sea_orm(unique)]
    pub sku: Option<String>,
    // NOT NULL in the schema; optional here so a missing value reaches the database.
    pub company_id: Option<i64>,
    pub active: bool,
    pub user_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Widget {
    pub id: Option<i64>,
    pub name: String,
    pub sku: Option<String>,
    pub company_id: Option<i64>,
    #[serde(default)]
    pub active: bool,
    pub user_id: Option<i64>,
}

impl RestResource for Widget {
    const SHORT_NAME: &'static str = "Widget";
    const FORM_FIELDS: &'static [&'static str] = &["name", "sku", "company_id", "active"];

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn assign_id(&mut self, id: i64) {
        self.id = Some(id);
    }
}

impl Validatable for Widget {
    fn validate(&self) -> Result<(), ValidationError> {
        validators::validate_required("name", &self.name)?;
        validators::validate_length("name", &self.name, None, Some(64))
    }
}

impl SeaOrmResource for Widget {
    type EntityType = Entity;
    type ActiveModelType = ActiveModel;

    fn from_model(model: Model) -> Self {
        Self {
            id: Some(model.id),
            name: model.name,
            sku: model.sku,
            company_id: model.company_id,
            active: model.active,
            user_id: model.user_id,
        }
    }

    fn to_active_model(&self) -> ActiveModel {
        ActiveModel {
            id: self.id.map_or(ActiveValue::NotSet, ActiveValue::Set),
            name: ActiveValue::Set(self.name.clone()),
            sku: ActiveValue::Set(self.sku.clone()),
            company_id: ActiveValue::Set(self.company_id),
            active: ActiveValue::Set(self.active),
            user_id: ActiveValue::Set(self.user_id),
        }
    }
}

use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection,
    EntityTrait, IdenStatic, IntoActiveModel, Iterable, PrimaryKeyTrait, QueryFilter, QueryOrder,
    QuerySelect,
};
use serde_json::Value;
use std::marker::PhantomData;

use super::{Criteria, Repository, SortDirection, StoreError};
use crate::resource::RestResource;

/// Links a [`RestResource`] to the `sea-orm` entity that stores it.
///
/// Criteria and ordering keys are matched against the entity's column names, so the
/// resource's serialized field names should mirror them.
pub trait SeaOrmResource: RestResource {
    type EntityType: EntityTrait;
    type ActiveModelType: ActiveModelTrait<Entity = Self::EntityType>
        + ActiveModelBehavior
        + Send
        + 'static;

    fn from_model(model: <Self::EntityType as EntityTrait>::Model) -> Self;

    /// Active model for an insert (identity `NotSet`) or update (identity `Set`).
    fn to_active_model(&self) -> Self::ActiveModelType;
}

/// [`Repository`] over a `sea-orm` connection. Writes go straight to the database, so
/// `flush` has nothing to do.
pub struct SeaOrmRepository<T> {
    db: DatabaseConnection,
    _resource: PhantomData<fn() -> T>,
}

impl<T> SeaOrmRepository<T> {
    #[must_use]
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            _resource: PhantomData,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn column_by_name<E: EntityTrait>(name: &str) -> Option<E::Column> {
    E::Column::iter().find(|column| column.as_str() == name)
}

fn to_db_value(value: &Value) -> Option<sea_orm::Value> {
    match value {
        Value::Null => None,
        Value::Bool(flag) => Some((*flag).into()),
        Value::Number(number) => number
            .as_i64()
            .map(sea_orm::Value::from)
            .or_else(|| number.as_f64().map(sea_orm::Value::from)),
        Value::String(text) => Some(text.clone().into()),
        other => Some(other.to_string().into()),
    }
}

fn condition_for<E: EntityTrait>(criteria: &Criteria) -> Result<Condition, StoreError> {
    let mut condition = Condition::all();
    for (field, value) in criteria {
        let column = column_by_name::<E>(field)
            .ok_or_else(|| StoreError::UnknownField(field.clone()))?;
        condition = match to_db_value(value) {
            Some(value) => condition.add(column.eq(value)),
            None => condition.add(column.is_null()),
        };
    }
    Ok(condition)
}

#[async_trait]
impl<T> Repository<T> for SeaOrmRepository<T>
where
    T: SeaOrmResource,
    <T::EntityType as EntityTrait>::Model: IntoActiveModel<T::ActiveModelType> + Sync,
    <<T::EntityType as EntityTrait>::PrimaryKey as PrimaryKeyTrait>::ValueType: From<i64>,
{
    async fn find(&self, id: i64) -> Result<Option<T>, StoreError> {
        let model = T::EntityType::find_by_id(id).one(&self.db).await?;
        Ok(model.map(T::from_model))
    }

    async fn find_by(
        &self,
        criteria: &Criteria,
        order_by: &[(String, SortDirection)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<T>, StoreError> {
        let mut query = T::EntityType::find().filter(condition_for::<T::EntityType>(criteria)?);
        for (field, direction) in order_by {
            let column = column_by_name::<T::EntityType>(field)
                .ok_or_else(|| StoreError::UnknownField(field.clone()))?;
            query = query.order_by(column, (*direction).into());
        }
        let models = query.offset(offset).limit(limit).all(&self.db).await?;
        Ok(models.into_iter().map(T::from_model).collect())
    }

    async fn persist(&self, entity: T) -> Result<T, StoreError> {
        let active = entity.to_active_model();
        let model = if entity.id().is_some() {
            active.update(&self.db).await?
        } else {
            active.insert(&self.db).await?
        };
        Ok(T::from_model(model))
    }

    async fn remove(&self, entity: &T) -> Result<(), StoreError> {
        if let Some(id) = entity.id() {
            T::EntityType::delete_by_id(id).exec(&self.db).await?;
        }
        Ok(())
    }
}

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering as AtomicOrdering};
use std::sync::{PoisonError, RwLock};

use super::{Criteria, Repository, SortDirection, StoreError};
use crate::form::fields_of;
use crate::resource::RestResource;

/// In-process [`Repository`] keyed by identity. Identities are handed out from 1 upwards.
///
/// Filters and ordering compare the entities' serialized field values.
pub struct MemoryRepository<T> {
    rows: RwLock<BTreeMap<i64, T>>,
    sequence: AtomicI64,
}

impl<T: RestResource> MemoryRepository<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            sequence: AtomicI64::new(0),
        }
    }

    /// Number of stored entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_id(&self) -> i64 {
        self.sequence.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }
}

impl<T: RestResource> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn matches(fields: &Map<String, Value>, criteria: &Criteria) -> bool {
    criteria
        .iter()
        .all(|(field, expected)| fields.get(field).unwrap_or(&Value::Null) == expected)
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => a.to_string().cmp(&b.to_string()),
    }
}

#[async_trait]
impl<T: RestResource> Repository<T> for MemoryRepository<T> {
    async fn find(&self, id: i64) -> Result<Option<T>, StoreError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.get(&id).cloned())
    }

    async fn find_by(
        &self,
        criteria: &Criteria,
        order_by: &[(String, SortDirection)],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<T>, StoreError> {
        let mut found: Vec<(Map<String, Value>, T)> = {
            let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
            rows.values()
                .map(|entity| (fields_of(entity), entity.clone()))
                .filter(|(fields, _)| matches(fields, criteria))
                .collect()
        };

        found.sort_by(|(left, _), (right, _)| {
            order_by
                .iter()
                .map(|(field, direction)| {
                    let ordering = compare_values(
                        left.get(field).unwrap_or(&Value::Null),
                        right.get(field).unwrap_or(&Value::Null),
                    );
                    match direction {
                        SortDirection::Asc => ordering,
                        SortDirection::Desc => ordering.reverse(),
                    }
                })
                .find(|ordering| ordering.is_ne())
                .unwrap_or(Ordering::Equal)
        });

        let skip = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |limit| {
            usize::try_from(limit).unwrap_or(usize::MAX)
        });
        Ok(found
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|(_, entity)| entity)
            .collect())
    }

    async fn persist(&self, mut entity: T) -> Result<T, StoreError> {
        let id = match entity.id() {
            Some(id) => id,
            None => {
                let id = self.next_id();
                entity.assign_id(id);
                id
            }
        };
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.insert(id, entity.clone());
        Ok(entity)
    }

    async fn remove(&self, entity: &T) -> Result<(), StoreError> {
        if let Some(id) = entity.id() {
            let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
            rows.remove(&id);
        }
        Ok(())
    }
}

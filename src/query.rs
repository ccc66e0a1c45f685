use serde::Deserialize;
use std::collections::HashMap;
use utoipa::IntoParams;

use crate::config::boolish;
use crate::storage::{OrderBy, SortDirection};

/// Query parameters of a list request.
///
/// # Pagination
/// `offset` and `limit` must be plain digit strings. Anything else means "no bound".
///
/// # Sorting
/// `sort` takes a JSON array with the column name and direction, e.g. `["name", "DESC"]`,
/// or a bare column name optionally prefixed with `-` for descending order. An `order`
/// parameter sets the direction of a bare column name.
///
/// # Filtering
/// Any other parameter naming a filterable property becomes an equality filter.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Number of entities to skip.
    #[param(example = "20")]
    pub offset: Option<String>,
    /// Maximum number of entities returned.
    #[param(example = "10")]
    pub limit: Option<String>,
    /// Sort order, e.g. `["name", "DESC"]`.
    #[param(example = r#"["id", "ASC"]"#)]
    pub sort: Option<String>,
    /// `ASC` or `DESC` for a bare `sort` column.
    pub order: Option<String>,
    /// Response format hint.
    #[serde(rename = "_format")]
    pub format: Option<String>,
}

impl ListParams {
    #[must_use]
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            offset: query.get("offset").cloned(),
            limit: query.get("limit").cloned(),
            sort: query.get("sort").cloned(),
            order: query.get("order").cloned(),
            format: query.get("_format").cloned(),
        }
    }

    #[must_use]
    pub fn offset(&self) -> Option<u64> {
        parse_bound(self.offset.as_deref())
    }

    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        parse_bound(self.limit.as_deref())
    }

    /// Requested ordering, keeping only columns listed in `sortable`.
    #[must_use]
    pub fn order_by(&self, sortable: &[String]) -> Option<OrderBy> {
        let sort = self.sort.as_deref()?.trim();
        let (column, direction) = if sort.starts_with('[') {
            let parts: Vec<String> = serde_json::from_str(sort).ok()?;
            let direction = parts
                .get(1)
                .and_then(|direction| SortDirection::parse(direction))
                .unwrap_or_default();
            (parts.first()?.clone(), direction)
        } else if let Some(column) = sort.strip_prefix('-') {
            (column.to_string(), SortDirection::Desc)
        } else {
            let direction = self
                .order
                .as_deref()
                .and_then(SortDirection::parse)
                .unwrap_or_default();
            (sort.to_string(), direction)
        };

        sortable
            .contains(&column)
            .then(|| vec![(column, direction)])
    }
}

/// Query parameters of the form-presentation actions.
#[derive(Clone, Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FormDisplayParams {
    /// Whether the rendered form gets a submit button. Defaults to `true`.
    #[serde(rename = "includeSubmitButton")]
    #[param(example = "false")]
    pub include_submit_button: Option<String>,
    /// `html` returns the fragment as `text/html` instead of JSON.
    #[serde(rename = "_format")]
    pub format: Option<String>,
}

impl FormDisplayParams {
    #[must_use]
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        Self {
            include_submit_button: query.get("includeSubmitButton").cloned(),
            format: query.get("_format").cloned(),
        }
    }

    #[must_use]
    pub fn with_submit_button(&self) -> bool {
        self.include_submit_button.as_deref().is_none_or(boolish)
    }
}

/// Digits-only bound; anything else is no bound.
fn parse_bound(value: Option<&str>) -> Option<u64> {
    let value = value?;
    if value.is_empty() || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

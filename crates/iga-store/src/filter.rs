//! Typed query filters.
//!
//! Filters name entity properties as strings and are evaluated against
//! [`Persistent::property`]. The reserved property `id` resolves to the
//! object's own identifier.

use chrono::{DateTime, Utc};
use iga_core::{Object, Persistent, PropertyValue};
use uuid::Uuid;

/// A predicate over an entity's properties.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, PropertyValue),
    EqIgnoreCase(String, String),
    In(String, Vec<PropertyValue>),
    /// Collection membership.
    Contains(String, PropertyValue),
    IsNull(String),
    Lt(String, DateTime<Utc>),
    Ge(String, DateTime<Utc>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn eq(property: &str, value: impl Into<PropertyValue>) -> Self {
        Self::Eq(property.to_string(), value.into())
    }

    pub fn eq_ignore_case(property: &str, value: impl Into<String>) -> Self {
        Self::EqIgnoreCase(property.to_string(), value.into())
    }

    pub fn contains(property: &str, value: impl Into<PropertyValue>) -> Self {
        Self::Contains(property.to_string(), value.into())
    }

    pub fn is_null(property: &str) -> Self {
        Self::IsNull(property.to_string())
    }

    pub fn lt(property: &str, value: DateTime<Utc>) -> Self {
        Self::Lt(property.to_string(), value)
    }

    pub fn ge(property: &str, value: DateTime<Utc>) -> Self {
        Self::Ge(property.to_string(), value)
    }

    /// Matches objects whose id is one of `ids`.
    pub fn id_in<I: Into<Uuid> + Copy>(ids: &[I]) -> Self {
        Self::In(
            "id".to_string(),
            ids.iter().map(|id| PropertyValue::Id((*id).into())).collect(),
        )
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Evaluates the filter against an object.
    pub fn matches<T: Persistent>(&self, object: &T) -> bool {
        self.evaluate(object.id().into(), &|name| object.property(name))
    }

    /// Evaluates the filter against an untyped object.
    pub fn matches_object(&self, object: &Object) -> bool {
        self.evaluate(object.id(), &|name| object.property(name))
    }

    fn evaluate(&self, id: Uuid, property: &dyn Fn(&str) -> PropertyValue) -> bool {
        let resolve = |name: &str| {
            if name == "id" {
                PropertyValue::Id(id)
            } else {
                property(name)
            }
        };
        match self {
            Self::Eq(name, value) => resolve(name.as_str()) == *value,
            Self::EqIgnoreCase(name, value) => match resolve(name.as_str()) {
                PropertyValue::Text(text) => text.to_lowercase() == value.to_lowercase(),
                _ => false,
            },
            Self::In(name, values) => values.contains(&resolve(name.as_str())),
            Self::Contains(name, value) => resolve(name.as_str()).contains(value),
            Self::IsNull(name) => resolve(name.as_str()).is_null(),
            Self::Lt(name, bound) => {
                matches!(resolve(name.as_str()), PropertyValue::Timestamp(t) if t < *bound)
            }
            Self::Ge(name, bound) => {
                matches!(resolve(name.as_str()), PropertyValue::Timestamp(t) if t >= *bound)
            }
            Self::And(filters) => filters.iter().all(|f| f.evaluate(id, property)),
            Self::Or(filters) => filters.iter().any(|f| f.evaluate(id, property)),
            Self::Not(filter) => !filter.evaluate(id, property),
        }
    }
}

/// Options for a search.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filter: Option<Filter>,
    pub limit: Option<usize>,
    /// Sort by a text property, ascending.
    pub order_by: Option<String>,
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn filter(filter: Filter) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn order_by(mut self, property: &str) -> Self {
        self.order_by = Some(property.to_string());
        self
    }

    pub fn accepts(&self, object: &Object) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches_object(object))
    }
}

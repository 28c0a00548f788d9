//! The id-keyed entity model.
//!
//! Relationship fields are ids, never nested objects. Each entity declares the
//! properties it exposes to queries and the hard references it holds.

mod application;
mod identity;
mod managed_attribute;
mod role;
mod system;

pub use application::*;
pub use identity::*;
pub use managed_attribute::*;
pub use role::*;
pub use system::*;

use std::collections::BTreeMap;

use serde_json::Value;

/// Free-form attribute map carried by links, identities and groups.
pub type Attributes = BTreeMap<String, Value>;

/// Flattens an attribute value into its string members.
///
/// Arrays yield one entry per element, scalars a single entry and `null`
/// nothing.
#[must_use]
pub fn values_as_strings(value: &Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(values_as_strings).collect(),
        other => vec![other.to_string()],
    }
}

macro_rules! impl_owned {
    ($($name:ident),+ $(,)?) => {
        $(
            impl crate::object::Owned for $name {
                fn owner(&self) -> Option<crate::ids::IdentityId> {
                    self.owner
                }

                fn set_owner(&mut self, owner: Option<crate::ids::IdentityId>) {
                    self.owner = owner;
                }
            }
        )+
    };
}

impl_owned!(
    Identity,
    Application,
    ManagedAttribute,
    Bundle,
    Policy,
    SodConstraint,
    PolicyViolation,
    Profile,
    TaskDefinition,
    TaskResult,
    CertificationDefinition,
);

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_values_as_strings() {
        assert!(values_as_strings(&Value::Null).is_empty());
        assert_eq!(values_as_strings(&json!("a")), vec!["a"]);
        assert_eq!(values_as_strings(&json!(["a", "b"])), vec!["a", "b"]);
        assert_eq!(values_as_strings(&json!(7)), vec!["7"]);
    }
}

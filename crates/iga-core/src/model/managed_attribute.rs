use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Attributes;
use crate::ids::*;
use crate::object::{ObjectKind, ObjectRef, Persistent, PropertyValue, References};

/// Persisted representation of a group or entitlement value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedAttribute {
    pub id: ManagedAttributeId,
    pub application: ApplicationId,
    pub object_type: String,
    pub attribute: String,
    pub value: String,
    pub display_name: Option<String>,
    pub uuid: Option<String>,
    pub description: Option<String>,
    pub owner: Option<IdentityId>,
    /// Parent groups.
    #[serde(default)]
    pub inheritance: Vec<ManagedAttributeId>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub classifications: Vec<String>,
    #[serde(default)]
    pub correlation_keys: BTreeMap<u8, String>,
    #[serde(default)]
    pub requestable: bool,
    pub last_refresh: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: Option<DateTime<Utc>>,
}

impl ManagedAttribute {
    /// A bare placeholder, created before the group's own record is seen.
    #[must_use]
    pub fn stub(
        application: ApplicationId,
        object_type: impl Into<String>,
        attribute: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let value = value.into();
        Self {
            id: ManagedAttributeId::new(),
            application,
            object_type: object_type.into(),
            attribute: attribute.into(),
            display_name: Some(value.clone()),
            value,
            uuid: None,
            description: None,
            owner: None,
            inheritance: Vec::new(),
            attributes: Attributes::new(),
            classifications: Vec::new(),
            correlation_keys: BTreeMap::new(),
            requestable: false,
            last_refresh: None,
            created: Utc::now(),
            modified: None,
        }
    }
}

impl Persistent for ManagedAttribute {
    type Id = ManagedAttributeId;
    const KIND: ObjectKind = ObjectKind::ManagedAttribute;

    fn id(&self) -> ManagedAttributeId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "application" => self.application.into(),
            "object_type" => PropertyValue::text(&self.object_type),
            "attribute" => PropertyValue::text(&self.attribute),
            "value" => PropertyValue::text(&self.value),
            "uuid" => PropertyValue::opt_text(self.uuid.as_deref()),
            "owner" => self.owner.into(),
            "inheritance" => PropertyValue::ids(&self.inheritance),
            "created" => self.created.into(),
            "last_refresh" => PropertyValue::timestamp(self.last_refresh),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Application, Some(self.application))
            .one(ObjectKind::Identity, self.owner)
            .many(ObjectKind::ManagedAttribute, &self.inheritance)
            .build()
    }
}

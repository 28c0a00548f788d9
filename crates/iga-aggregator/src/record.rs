//! Raw records delivered by a record source.

use iga_core::{values_as_strings, Attributes, Schema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One account or group as the source system reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    pub object_type: String,
    pub native_identity: Option<String>,
    pub display_name: Option<String>,
    pub uuid: Option<String>,
    pub instance: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    /// The object no longer exists on the source.
    #[serde(default)]
    pub delete: bool,
    /// The listed attribute values were removed from the object.
    #[serde(default)]
    pub remove: bool,
    /// Only some attributes are present; the rest are unchanged.
    #[serde(default)]
    pub sparse: bool,
    /// Attributes carry changes, not full values.
    #[serde(default)]
    pub incremental: bool,
    /// Last record of a multi-part update.
    #[serde(default)]
    pub final_update: bool,
    /// The source could not read every attribute.
    #[serde(default)]
    pub incomplete: bool,
    /// Former native identity, set when the source reports a rename.
    pub previous_identity: Option<String>,
}

impl ResourceObject {
    #[must_use]
    pub fn new(object_type: impl Into<String>, native_identity: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            native_identity: Some(native_identity.into()),
            display_name: None,
            uuid: None,
            instance: None,
            attributes: Attributes::new(),
            delete: false,
            remove: false,
            sparse: false,
            incremental: false,
            final_update: false,
            incomplete: false,
            previous_identity: None,
        }
    }

    #[must_use]
    pub fn account(native_identity: impl Into<String>) -> Self {
        Self::new(Schema::ACCOUNT, native_identity)
    }

    #[must_use]
    pub fn group(native_identity: impl Into<String>) -> Self {
        Self::new(Schema::GROUP, native_identity)
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn deleted(mut self) -> Self {
        self.delete = true;
        self
    }

    #[must_use]
    pub fn sparse(mut self) -> Self {
        self.sparse = true;
        self
    }

    #[must_use]
    pub fn incremental(mut self) -> Self {
        self.incremental = true;
        self
    }

    #[must_use]
    pub fn removing(mut self) -> Self {
        self.incremental = true;
        self.remove = true;
        self
    }

    #[must_use]
    pub fn renamed_from(mut self, previous: impl Into<String>) -> Self {
        self.previous_identity = Some(previous.into());
        self
    }

    /// The native identity, treating an empty string as absent.
    #[must_use]
    pub fn native(&self) -> Option<&str> {
        self.native_identity.as_deref().filter(|n| !n.is_empty())
    }

    #[must_use]
    pub fn is_delete(&self) -> bool {
        self.delete
    }

    /// Sparse and incremental records never stand on their own.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        self.sparse || self.incremental
    }

    /// First string value of an attribute.
    #[must_use]
    pub fn string_attribute(&self, name: &str) -> Option<String> {
        self.attributes
            .get(name)
            .and_then(|v| values_as_strings(v).into_iter().next())
    }

    /// All string values of an attribute.
    #[must_use]
    pub fn values(&self, name: &str) -> Vec<String> {
        self.attributes
            .get(name)
            .map(values_as_strings)
            .unwrap_or_default()
    }
}

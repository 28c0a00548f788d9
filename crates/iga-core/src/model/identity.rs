//! Identities, their links and the rows that hang off an identity.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Attributes;
use crate::ids::*;
use crate::object::{ObjectKind, ObjectRef, Persistent, PropertyValue, References};

/// A person, or a workgroup when `workgroup` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub workgroup: bool,
    /// Protected identities are never removed by the cascading deleter.
    #[serde(default)]
    pub protected: bool,
    pub owner: Option<IdentityId>,
    pub manager: Option<IdentityId>,
    pub administrator: Option<IdentityId>,
    #[serde(default)]
    pub workgroups: Vec<IdentityId>,
    #[serde(default)]
    pub links: Vec<LinkId>,
    #[serde(default)]
    pub detected_roles: Vec<BundleId>,
    #[serde(default)]
    pub assigned_roles: Vec<BundleId>,
    #[serde(default)]
    pub exceptions: Vec<EntitlementException>,
    pub scorecard: Option<ScorecardId>,
    /// Extended identity-valued attributes, by attribute name.
    #[serde(default)]
    pub extended: BTreeMap<String, IdentityId>,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub needs_refresh: bool,
    pub created: DateTime<Utc>,
    pub modified: Option<DateTime<Utc>>,
}

/// Entitlements an identity holds outside of any role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitlementException {
    pub application: ApplicationId,
    pub attribute: String,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Identity {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: IdentityId::new(),
            name: name.into(),
            display_name: None,
            workgroup: false,
            protected: false,
            owner: None,
            manager: None,
            administrator: None,
            workgroups: Vec::new(),
            links: Vec::new(),
            detected_roles: Vec::new(),
            assigned_roles: Vec::new(),
            exceptions: Vec::new(),
            scorecard: None,
            extended: BTreeMap::new(),
            attributes: Attributes::new(),
            needs_refresh: false,
            created: Utc::now(),
            modified: None,
        }
    }

    #[must_use]
    pub fn workgroup(name: impl Into<String>) -> Self {
        Self {
            workgroup: true,
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

impl Persistent for Identity {
    type Id = IdentityId;
    const KIND: ObjectKind = ObjectKind::Identity;

    fn id(&self) -> IdentityId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "workgroup" => self.workgroup.into(),
            "protected" => self.protected.into(),
            "owner" => self.owner.into(),
            "manager" => self.manager.into(),
            "administrator" => self.administrator.into(),
            "workgroups" => PropertyValue::ids(&self.workgroups),
            "links" => PropertyValue::ids(&self.links),
            "detected_roles" => PropertyValue::ids(&self.detected_roles),
            "assigned_roles" => PropertyValue::ids(&self.assigned_roles),
            "exception_applications" => PropertyValue::ids(
                &self
                    .exceptions
                    .iter()
                    .map(|e| e.application)
                    .collect::<Vec<_>>(),
            ),
            "extended" => {
                PropertyValue::ids(&self.extended.values().copied().collect::<Vec<_>>())
            }
            "scorecard" => self.scorecard.into(),
            "created" => self.created.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        let exception_apps: Vec<ApplicationId> =
            self.exceptions.iter().map(|e| e.application).collect();
        let extended: Vec<IdentityId> = self.extended.values().copied().collect();
        References::new()
            .one(ObjectKind::Identity, self.owner)
            .one(ObjectKind::Identity, self.manager)
            .one(ObjectKind::Identity, self.administrator)
            .many(ObjectKind::Identity, &self.workgroups)
            .many(ObjectKind::Identity, &extended)
            .many(ObjectKind::Link, &self.links)
            .many(ObjectKind::Bundle, &self.detected_roles)
            .many(ObjectKind::Bundle, &self.assigned_roles)
            .many(ObjectKind::Application, &exception_apps)
            .one(ObjectKind::Scorecard, self.scorecard)
            .build()
    }
}

/// An account on an application, held by an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub identity: Option<IdentityId>,
    pub application: ApplicationId,
    pub native_identity: String,
    pub instance: Option<String>,
    pub display_name: Option<String>,
    pub uuid: Option<String>,
    #[serde(default)]
    pub attributes: Attributes,
    pub last_refresh: Option<DateTime<Utc>>,
    pub created: DateTime<Utc>,
    pub modified: Option<DateTime<Utc>>,
}

impl Link {
    #[must_use]
    pub fn new(
        identity: IdentityId,
        application: ApplicationId,
        native_identity: impl Into<String>,
    ) -> Self {
        Self {
            id: LinkId::new(),
            identity: Some(identity),
            application,
            native_identity: native_identity.into(),
            instance: None,
            display_name: None,
            uuid: None,
            attributes: Attributes::new(),
            last_refresh: None,
            created: Utc::now(),
            modified: None,
        }
    }
}

impl Persistent for Link {
    type Id = LinkId;
    const KIND: ObjectKind = ObjectKind::Link;

    fn id(&self) -> LinkId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity" => self.identity.into(),
            "application" => self.application.into(),
            "native_identity" => PropertyValue::text(&self.native_identity),
            "instance" => PropertyValue::opt_text(self.instance.as_deref()),
            "uuid" => PropertyValue::opt_text(self.uuid.as_deref()),
            "created" => self.created.into(),
            "last_refresh" => PropertyValue::timestamp(self.last_refresh),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, self.identity)
            .one(ObjectKind::Application, Some(self.application))
            .build()
    }
}

/// One row of the entitlement index: identity X holds value V of attribute A
/// through an account on an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityEntitlement {
    pub id: IdentityEntitlementId,
    pub identity: IdentityId,
    pub application: Option<ApplicationId>,
    pub native_identity: Option<String>,
    pub instance: Option<String>,
    pub name: String,
    pub value: String,
    pub created: DateTime<Utc>,
}

impl IdentityEntitlement {
    #[must_use]
    pub fn for_link(link: &Link, identity: IdentityId, name: &str, value: &str) -> Self {
        Self {
            id: IdentityEntitlementId::new(),
            identity,
            application: Some(link.application),
            native_identity: Some(link.native_identity.clone()),
            instance: link.instance.clone(),
            name: name.to_string(),
            value: value.to_string(),
            created: Utc::now(),
        }
    }
}

impl Persistent for IdentityEntitlement {
    type Id = IdentityEntitlementId;
    const KIND: ObjectKind = ObjectKind::IdentityEntitlement;

    fn id(&self) -> IdentityEntitlementId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity" => self.identity.into(),
            "application" => self.application.into(),
            "native_identity" => PropertyValue::opt_text(self.native_identity.as_deref()),
            "instance" => PropertyValue::opt_text(self.instance.as_deref()),
            "name" => PropertyValue::text(&self.name),
            "value" => PropertyValue::text(&self.value),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, Some(self.identity))
            .one(ObjectKind::Application, self.application)
            .build()
    }
}

/// The kind of object an external attribute row belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalOwner {
    Identity,
    Link,
}

impl ExternalOwner {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Link => "link",
        }
    }

    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Identity => ObjectKind::Identity,
            Self::Link => ObjectKind::Link,
        }
    }
}

/// A single value of a multi-valued attribute stored outside its owner row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalAttribute {
    pub id: ExternalAttributeId,
    pub owner_kind: ExternalOwner,
    pub object_id: uuid::Uuid,
    pub attribute_name: String,
    pub value: String,
}

impl ExternalAttribute {
    #[must_use]
    pub fn new(
        owner_kind: ExternalOwner,
        object_id: uuid::Uuid,
        attribute_name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: ExternalAttributeId::new(),
            owner_kind,
            object_id,
            attribute_name: attribute_name.into(),
            value: value.into(),
        }
    }
}

impl Persistent for ExternalAttribute {
    type Id = ExternalAttributeId;
    const KIND: ObjectKind = ObjectKind::ExternalAttribute;

    fn id(&self) -> ExternalAttributeId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "owner_kind" => PropertyValue::text(self.owner_kind.as_str()),
            "object_id" => self.object_id.into(),
            "attribute_name" => PropertyValue::text(&self.attribute_name),
            "value" => PropertyValue::text(&self.value),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .object(ObjectRef::new(self.owner_kind.kind(), self.object_id))
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentitySnapshot {
    pub id: IdentitySnapshotId,
    /// Weak reference, not enforced by the store.
    pub identity_id: IdentityId,
    pub identity_name: String,
    #[serde(default)]
    pub summary: Attributes,
    pub created: DateTime<Utc>,
}

impl Persistent for IdentitySnapshot {
    type Id = IdentitySnapshotId;
    const KIND: ObjectKind = ObjectKind::IdentitySnapshot;

    fn id(&self) -> IdentitySnapshotId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity_id" => self.identity_id.into(),
            "identity_name" => PropertyValue::text(&self.identity_name),
            _ => PropertyValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityHistoryItem {
    pub id: IdentityHistoryItemId,
    pub identity: IdentityId,
    pub action: String,
    pub created: DateTime<Utc>,
}

impl Persistent for IdentityHistoryItem {
    type Id = IdentityHistoryItemId;
    const KIND: ObjectKind = ObjectKind::IdentityHistoryItem;

    fn id(&self) -> IdentityHistoryItemId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity" => self.identity.into(),
            "action" => PropertyValue::text(&self.action),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Identity, self.identity)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityArchive {
    pub id: IdentityArchiveId,
    pub source_id: IdentityId,
    pub name: String,
    pub archive: serde_json::Value,
    pub created: DateTime<Utc>,
}

impl Persistent for IdentityArchive {
    type Id = IdentityArchiveId;
    const KIND: ObjectKind = ObjectKind::IdentityArchive;

    fn id(&self) -> IdentityArchiveId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "source_id" => self.source_id.into(),
            "name" => PropertyValue::text(&self.name),
            _ => PropertyValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub id: ScorecardId,
    pub identity: IdentityId,
    pub composite_score: u32,
}

impl Persistent for Scorecard {
    type Id = ScorecardId;
    const KIND: ObjectKind = ObjectKind::Scorecard;

    fn id(&self) -> ScorecardId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity" => self.identity.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Identity, self.identity)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningRequest {
    pub id: ProvisioningRequestId,
    pub identity: IdentityId,
    pub target: Option<String>,
    pub created: DateTime<Utc>,
}

impl Persistent for ProvisioningRequest {
    type Id = ProvisioningRequestId;
    const KIND: ObjectKind = ObjectKind::ProvisioningRequest;

    fn id(&self) -> ProvisioningRequestId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity" => self.identity.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Identity, self.identity)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_references_cover_relationships() {
        let mut identity = Identity::new("alice");
        identity.manager = Some(IdentityId::new());
        identity.links.push(LinkId::new());
        identity.workgroups.push(IdentityId::new());
        identity.scorecard = Some(ScorecardId::new());

        let refs = identity.references();
        assert_eq!(refs.len(), 4);
        assert!(refs.iter().any(|r| r.kind == ObjectKind::Scorecard));
    }

    #[test]
    fn test_link_properties() {
        let link = Link::new(IdentityId::new(), ApplicationId::new(), "u1");
        assert_eq!(link.property("native_identity"), PropertyValue::text("u1"));
        assert!(link.property("last_refresh").is_null());
        assert!(link.property("unknown").is_null());
    }
}

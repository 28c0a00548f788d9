//! Roles, policies and the rows that reference them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::*;
use crate::object::{ObjectKind, ObjectRef, Persistent, PropertyValue, References};

/// A role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub id: BundleId,
    pub name: String,
    pub owner: Option<IdentityId>,
    #[serde(default)]
    pub inheritance: Vec<BundleId>,
    #[serde(default)]
    pub permits: Vec<BundleId>,
    #[serde(default)]
    pub requirements: Vec<BundleId>,
    pub selector_rule: Option<RuleId>,
    pub scorecard: Option<RoleScorecardId>,
}

impl Bundle {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: BundleId::new(),
            name: name.into(),
            owner: None,
            inheritance: Vec::new(),
            permits: Vec::new(),
            requirements: Vec::new(),
            selector_rule: None,
            scorecard: None,
        }
    }
}

impl Persistent for Bundle {
    type Id = BundleId;
    const KIND: ObjectKind = ObjectKind::Bundle;

    fn id(&self) -> BundleId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "owner" => self.owner.into(),
            "inheritance" => PropertyValue::ids(&self.inheritance),
            "permits" => PropertyValue::ids(&self.permits),
            "requirements" => PropertyValue::ids(&self.requirements),
            "selector_rule" => self.selector_rule.into(),
            "scorecard" => self.scorecard.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, self.owner)
            .many(ObjectKind::Bundle, &self.inheritance)
            .many(ObjectKind::Bundle, &self.permits)
            .many(ObjectKind::Bundle, &self.requirements)
            .one(ObjectKind::Rule, self.selector_rule)
            .one(ObjectKind::RoleScorecard, self.scorecard)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleScorecard {
    pub id: RoleScorecardId,
    pub role: BundleId,
}

impl Persistent for RoleScorecard {
    type Id = RoleScorecardId;
    const KIND: ObjectKind = ObjectKind::RoleScorecard;

    fn id(&self) -> RoleScorecardId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "role" => self.role.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Bundle, self.role)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleIndex {
    pub id: RoleIndexId,
    pub bundle: BundleId,
    pub assigned_count: u32,
}

impl Persistent for RoleIndex {
    type Id = RoleIndexId;
    const KIND: ObjectKind = ObjectKind::RoleIndex;

    fn id(&self) -> RoleIndexId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "bundle" => self.bundle.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Bundle, self.bundle)]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleArchive {
    pub id: BundleArchiveId,
    pub source_id: BundleId,
    pub version: u32,
    pub created: DateTime<Utc>,
}

impl Persistent for BundleArchive {
    type Id = BundleArchiveId;
    const KIND: ObjectKind = ObjectKind::BundleArchive;

    fn id(&self) -> BundleArchiveId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "source_id" => self.source_id.into(),
            _ => PropertyValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub name: String,
    pub owner: Option<IdentityId>,
    pub violation_owner: Option<IdentityId>,
    pub violation_rule: Option<RuleId>,
}

impl Persistent for Policy {
    type Id = PolicyId;
    const KIND: ObjectKind = ObjectKind::Policy;

    fn id(&self) -> PolicyId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "owner" => self.owner.into(),
            "violation_owner" => self.violation_owner.into(),
            "violation_rule" => self.violation_rule.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, self.owner)
            .one(ObjectKind::Identity, self.violation_owner)
            .one(ObjectKind::Rule, self.violation_rule)
            .build()
    }
}

/// A separation-of-duties rule between two role sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SodConstraint {
    pub id: SodConstraintId,
    pub name: String,
    pub policy: Option<PolicyId>,
    pub owner: Option<IdentityId>,
    pub violation_owner: Option<IdentityId>,
    #[serde(default)]
    pub left_bundles: Vec<BundleId>,
    #[serde(default)]
    pub right_bundles: Vec<BundleId>,
}

impl Persistent for SodConstraint {
    type Id = SodConstraintId;
    const KIND: ObjectKind = ObjectKind::SodConstraint;

    fn id(&self) -> SodConstraintId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "policy" => self.policy.into(),
            "owner" => self.owner.into(),
            "violation_owner" => self.violation_owner.into(),
            "left_bundles" => PropertyValue::ids(&self.left_bundles),
            "right_bundles" => PropertyValue::ids(&self.right_bundles),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Policy, self.policy)
            .one(ObjectKind::Identity, self.owner)
            .one(ObjectKind::Identity, self.violation_owner)
            .many(ObjectKind::Bundle, &self.left_bundles)
            .many(ObjectKind::Bundle, &self.right_bundles)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub id: PolicyViolationId,
    pub identity: IdentityId,
    pub policy: Option<PolicyId>,
    pub owner: Option<IdentityId>,
    pub description: Option<String>,
}

impl Persistent for PolicyViolation {
    type Id = PolicyViolationId;
    const KIND: ObjectKind = ObjectKind::PolicyViolation;

    fn id(&self) -> PolicyViolationId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "identity" => self.identity.into(),
            "policy" => self.policy.into(),
            "owner" => self.owner.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, Some(self.identity))
            .one(ObjectKind::Policy, self.policy)
            .one(ObjectKind::Identity, self.owner)
            .build()
    }
}

/// Provisioning integration settings, including role synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationConfig {
    pub id: IntegrationConfigId,
    pub name: String,
    pub application: Option<ApplicationId>,
    #[serde(default)]
    pub synchronized_roles: Vec<BundleId>,
    pub role_sync_container: Option<BundleId>,
    pub plan_initializer: Option<RuleId>,
}

impl Persistent for IntegrationConfig {
    type Id = IntegrationConfigId;
    const KIND: ObjectKind = ObjectKind::IntegrationConfig;

    fn id(&self) -> IntegrationConfigId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "application" => self.application.into(),
            "synchronized_roles" => PropertyValue::ids(&self.synchronized_roles),
            "role_sync_container" => self.role_sync_container.into(),
            "plan_initializer" => self.plan_initializer.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Application, self.application)
            .many(ObjectKind::Bundle, &self.synchronized_roles)
            .one(ObjectKind::Bundle, self.role_sync_container)
            .one(ObjectKind::Rule, self.plan_initializer)
            .build()
    }
}

//! Rules, work items, tasks and system-wide configuration rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Attributes;
use crate::ids::*;
use crate::object::{ObjectKind, ObjectRef, Persistent, PropertyValue, References};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    #[serde(default)]
    pub referenced_rules: Vec<RuleId>,
    #[serde(default)]
    pub source: String,
}

impl Rule {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: RuleId::new(),
            name: name.into(),
            referenced_rules: Vec::new(),
            source: String::new(),
        }
    }
}

impl Persistent for Rule {
    type Id = RuleId;
    const KIND: ObjectKind = ObjectKind::Rule;

    fn id(&self) -> RuleId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "referenced_rules" => PropertyValue::ids(&self.referenced_rules),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .many(ObjectKind::Rule, &self.referenced_rules)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub rule_libraries: Vec<RuleId>,
}

impl Persistent for Workflow {
    type Id = WorkflowId;
    const KIND: ObjectKind = ObjectKind::Workflow;

    fn id(&self) -> WorkflowId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "rule_libraries" => PropertyValue::ids(&self.rule_libraries),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .many(ObjectKind::Rule, &self.rule_libraries)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDataSource {
    pub id: ActivityDataSourceId,
    pub name: String,
    pub correlation_rule: Option<RuleId>,
    pub transformation_rule: Option<RuleId>,
}

impl Persistent for ActivityDataSource {
    type Id = ActivityDataSourceId;
    const KIND: ObjectKind = ObjectKind::ActivityDataSource;

    fn id(&self) -> ActivityDataSourceId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "correlation_rule" => self.correlation_rule.into(),
            "transformation_rule" => self.transformation_rule.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Rule, self.correlation_rule)
            .one(ObjectKind::Rule, self.transformation_rule)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub owner: Option<IdentityId>,
    pub assignee: Option<IdentityId>,
    pub requester: Option<IdentityId>,
    pub description: Option<String>,
    pub created: DateTime<Utc>,
}

impl WorkItem {
    #[must_use]
    pub fn new(owner: IdentityId) -> Self {
        Self {
            id: WorkItemId::new(),
            owner: Some(owner),
            assignee: None,
            requester: None,
            description: None,
            created: Utc::now(),
        }
    }
}

impl Persistent for WorkItem {
    type Id = WorkItemId;
    const KIND: ObjectKind = ObjectKind::WorkItem;

    fn id(&self) -> WorkItemId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "owner" => self.owner.into(),
            "assignee" => self.assignee.into(),
            "requester" => self.requester.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, self.owner)
            .one(ObjectKind::Identity, self.assignee)
            .one(ObjectKind::Identity, self.requester)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItemConfig {
    pub id: WorkItemConfigId,
    pub name: String,
    #[serde(default)]
    pub owners: Vec<IdentityId>,
}

impl Persistent for WorkItemConfig {
    type Id = WorkItemConfigId;
    const KIND: ObjectKind = ObjectKind::WorkItemConfig;

    fn id(&self) -> WorkItemConfigId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "owners" => PropertyValue::ids(&self.owners),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .many(ObjectKind::Identity, &self.owners)
            .build()
    }
}

/// Population scope used by self-service requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicScope {
    pub id: DynamicScopeId,
    pub name: String,
    #[serde(default)]
    pub inclusions: Vec<IdentityId>,
    #[serde(default)]
    pub exclusions: Vec<IdentityId>,
}

impl Persistent for DynamicScope {
    type Id = DynamicScopeId;
    const KIND: ObjectKind = ObjectKind::DynamicScope;

    fn id(&self) -> DynamicScopeId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "inclusions" => PropertyValue::ids(&self.inclusions),
            "exclusions" => PropertyValue::ids(&self.exclusions),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .many(ObjectKind::Identity, &self.inclusions)
            .many(ObjectKind::Identity, &self.exclusions)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskDefinitionId,
    pub name: String,
    pub owner: Option<IdentityId>,
}

impl Persistent for TaskDefinition {
    type Id = TaskDefinitionId;
    const KIND: ObjectKind = ObjectKind::TaskDefinition;

    fn id(&self) -> TaskDefinitionId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "owner" => self.owner.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new().one(ObjectKind::Identity, self.owner).build()
    }
}

/// Outcome of a task execution. Also carries state shared across the phases
/// of a partitioned run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub id: TaskResultId,
    pub name: String,
    pub owner: Option<IdentityId>,
    pub definition: Option<TaskDefinitionId>,
    #[serde(default)]
    pub attributes: Attributes,
    pub launched: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl TaskResult {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskResultId::new(),
            name: name.into(),
            owner: None,
            definition: None,
            attributes: Attributes::new(),
            launched: Utc::now(),
            completed: None,
        }
    }
}

impl Persistent for TaskResult {
    type Id = TaskResultId;
    const KIND: ObjectKind = ObjectKind::TaskResult;

    fn id(&self) -> TaskResultId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "owner" => self.owner.into(),
            "definition" => self.definition.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, self.owner)
            .one(ObjectKind::TaskDefinition, self.definition)
            .build()
    }
}

/// A pending access request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub name: String,
    pub owner: Option<IdentityId>,
}

impl Persistent for Request {
    type Id = RequestId;
    const KIND: ObjectKind = ObjectKind::Request;

    fn id(&self) -> RequestId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "owner" => self.owner.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new().one(ObjectKind::Identity, self.owner).build()
    }
}

/// A named system configuration object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: ConfigurationId,
    pub name: String,
    /// Applications consulted for login pass-through, by id or by name.
    #[serde(default)]
    pub pass_through_applications: Vec<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Configuration {
    pub const SYSTEM: &'static str = "SystemConfiguration";
}

impl Persistent for Configuration {
    type Id = ConfigurationId;
    const KIND: ObjectKind = ObjectKind::Configuration;

    fn id(&self) -> ConfigurationId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "pass_through_applications" => PropertyValue::texts(&self.pass_through_applications),
            _ => PropertyValue::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificationDefinition {
    pub id: CertificationDefinitionId,
    pub name: String,
    pub owner: Option<IdentityId>,
}

impl Persistent for CertificationDefinition {
    type Id = CertificationDefinitionId;
    const KIND: ObjectKind = ObjectKind::CertificationDefinition;

    fn id(&self) -> CertificationDefinitionId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "owner" => self.owner.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new().one(ObjectKind::Identity, self.owner).build()
    }
}

/// Localized text describing another object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalizedAttribute {
    pub id: LocalizedAttributeId,
    /// Weak reference to the described object.
    pub target_id: uuid::Uuid,
    pub attribute: String,
    pub locale: String,
    pub value: String,
}

impl Persistent for LocalizedAttribute {
    type Id = LocalizedAttributeId;
    const KIND: ObjectKind = ObjectKind::LocalizedAttribute;

    fn id(&self) -> LocalizedAttributeId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "target_id" => self.target_id.into(),
            "locale" => PropertyValue::text(&self.locale),
            _ => PropertyValue::Null,
        }
    }
}

//! Applications, their schemas and application-scoped rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::*;
use crate::object::{ObjectKind, ObjectRef, Persistent, PropertyValue, References};

/// A connected target system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
    pub owner: Option<IdentityId>,
    /// The aggregating application when this one is fed by multiplexing.
    pub proxy: Option<ApplicationId>,
    /// Created on demand while aggregating a proxy.
    #[serde(default)]
    pub generated: bool,
    pub account_schema: Schema,
    #[serde(default)]
    pub group_schemas: Vec<Schema>,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub dependencies: Vec<ApplicationId>,
    pub scorecard: Option<ApplicationScorecardId>,
    pub correlation_rule: Option<RuleId>,
    pub creation_rule: Option<RuleId>,
    pub customization_rule: Option<RuleId>,
    pub managed_attribute_customization_rule: Option<RuleId>,
    pub created: DateTime<Utc>,
}

/// Connector capabilities that change how aggregation behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Features {
    #[serde(default)]
    pub no_random_access: bool,
    /// Group membership is listed on the group object instead of the account.
    #[serde(default)]
    pub group_membership_on_group: bool,
    #[serde(default)]
    pub delta: bool,
    #[serde(default)]
    pub recycle_bin: bool,
}

impl Application {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ApplicationId::new(),
            name: name.into(),
            owner: None,
            proxy: None,
            generated: false,
            account_schema: Schema::new(Schema::ACCOUNT),
            group_schemas: Vec::new(),
            features: Features::default(),
            dependencies: Vec::new(),
            scorecard: None,
            correlation_rule: None,
            creation_rule: None,
            customization_rule: None,
            managed_attribute_customization_rule: None,
            created: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_account_schema(mut self, schema: Schema) -> Self {
        self.account_schema = schema;
        self
    }

    #[must_use]
    pub fn with_group_schema(mut self, schema: Schema) -> Self {
        self.group_schemas.push(schema);
        self
    }

    /// A proxied child of `proxy`, generated on demand.
    #[must_use]
    pub fn generated_proxy(name: impl Into<String>, proxy: &Application) -> Self {
        Self {
            proxy: Some(proxy.id),
            generated: true,
            account_schema: proxy.account_schema.clone(),
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn group_schema(&self, object_type: &str) -> Option<&Schema> {
        self.group_schemas
            .iter()
            .find(|s| s.object_type == object_type)
    }

    #[must_use]
    pub fn schema(&self, object_type: &str) -> Option<&Schema> {
        if self.account_schema.object_type == object_type {
            Some(&self.account_schema)
        } else {
            self.group_schema(object_type)
        }
    }

    /// The account attribute whose values reference groups of `object_type`.
    ///
    /// Falls back to the object type name when no account attribute declares
    /// the reference.
    #[must_use]
    pub fn group_attribute_for(&self, object_type: &str) -> String {
        self.account_schema
            .attributes
            .iter()
            .find(|a| a.schema_object_type.as_deref() == Some(object_type))
            .map_or_else(|| object_type.to_string(), |a| a.name.clone())
    }

    fn rules(&self) -> Vec<RuleId> {
        let mut rules: Vec<RuleId> = [
            self.correlation_rule,
            self.creation_rule,
            self.customization_rule,
            self.managed_attribute_customization_rule,
        ]
        .into_iter()
        .flatten()
        .collect();
        rules.extend(self.account_schema.rules());
        for schema in &self.group_schemas {
            rules.extend(schema.rules());
        }
        rules
    }
}

impl Persistent for Application {
    type Id = ApplicationId;
    const KIND: ObjectKind = ObjectKind::Application;

    fn id(&self) -> ApplicationId {
        self.id
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "owner" => self.owner.into(),
            "proxy" => self.proxy.into(),
            "generated" => self.generated.into(),
            "dependencies" => PropertyValue::ids(&self.dependencies),
            "scorecard" => self.scorecard.into(),
            "rules" => PropertyValue::ids(&self.rules()),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Identity, self.owner)
            .one(ObjectKind::Application, self.proxy)
            .many(ObjectKind::Application, &self.dependencies)
            .one(ObjectKind::ApplicationScorecard, self.scorecard)
            .many(ObjectKind::Rule, &self.rules())
            .build()
    }
}

/// The shape of one object type on an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub object_type: String,
    pub native_object_type: Option<String>,
    pub identity_attribute: Option<String>,
    pub display_attribute: Option<String>,
    /// Attribute listing a group's parents.
    pub hierarchy_attribute: Option<String>,
    /// Attribute listing a group's members when membership lives on the group.
    pub member_attribute: Option<String>,
    #[serde(default)]
    pub attributes: Vec<AttributeDefinition>,
    pub creation_rule: Option<RuleId>,
    pub customization_rule: Option<RuleId>,
    pub refresh_rule: Option<RuleId>,
}

impl Schema {
    pub const ACCOUNT: &'static str = "account";
    pub const GROUP: &'static str = "group";

    #[must_use]
    pub fn new(object_type: impl Into<String>) -> Self {
        Self {
            object_type: object_type.into(),
            native_object_type: None,
            identity_attribute: None,
            display_attribute: None,
            hierarchy_attribute: None,
            member_attribute: None,
            attributes: Vec::new(),
            creation_rule: None,
            customization_rule: None,
            refresh_rule: None,
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, attribute: AttributeDefinition) -> Self {
        self.attributes.push(attribute);
        self
    }

    #[must_use]
    pub fn with_hierarchy_attribute(mut self, name: impl Into<String>) -> Self {
        self.hierarchy_attribute = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_member_attribute(mut self, name: impl Into<String>) -> Self {
        self.member_attribute = Some(name.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeDefinition> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn managed_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.managed)
    }

    pub fn entitlement_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.entitlement)
    }

    pub fn external_attributes(&self) -> impl Iterator<Item = &AttributeDefinition> {
        self.attributes.iter().filter(|a| a.external)
    }

    #[must_use]
    pub fn rules(&self) -> Vec<RuleId> {
        [self.creation_rule, self.customization_rule, self.refresh_rule]
            .into_iter()
            .flatten()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub name: String,
    #[serde(default)]
    pub multi: bool,
    /// Values are promoted to managed attributes during account aggregation.
    #[serde(default)]
    pub managed: bool,
    /// Values are recorded in the entitlement index.
    #[serde(default)]
    pub entitlement: bool,
    /// Values are mirrored into external attribute rows.
    #[serde(default)]
    pub external: bool,
    /// The group object type this attribute's values reference.
    pub schema_object_type: Option<String>,
    /// Slot among the managed attribute correlation keys.
    pub correlation_key: Option<u8>,
}

impl AttributeDefinition {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            multi: false,
            managed: false,
            entitlement: false,
            external: false,
            schema_object_type: None,
            correlation_key: None,
        }
    }

    /// A multi-valued group reference that is both managed and an entitlement.
    #[must_use]
    pub fn group_reference(name: impl Into<String>, object_type: impl Into<String>) -> Self {
        Self {
            multi: true,
            managed: true,
            entitlement: true,
            schema_object_type: Some(object_type.into()),
            ..Self::new(name)
        }
    }

    #[must_use]
    pub fn multi(mut self) -> Self {
        self.multi = true;
        self
    }

    #[must_use]
    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    #[must_use]
    pub fn correlation_key(mut self, slot: u8) -> Self {
        self.correlation_key = Some(slot);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ProfileId,
    pub name: String,
    pub application: ApplicationId,
    pub owner: Option<IdentityId>,
}

impl Persistent for Profile {
    type Id = ProfileId;
    const KIND: ObjectKind = ObjectKind::Profile;

    fn id(&self) -> ProfileId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "application" => self.application.into(),
            "owner" => self.owner.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Application, Some(self.application))
            .one(ObjectKind::Identity, self.owner)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationScorecard {
    pub id: ApplicationScorecardId,
    pub application: ApplicationId,
    pub composite_score: u32,
}

impl Persistent for ApplicationScorecard {
    type Id = ApplicationScorecardId;
    const KIND: ObjectKind = ObjectKind::ApplicationScorecard;

    fn id(&self) -> ApplicationScorecardId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "application" => self.application.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Application, self.application)]
    }
}

/// A resource (share, folder, table) on an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub id: TargetId,
    pub name: String,
    pub application: Option<ApplicationId>,
}

impl Persistent for Target {
    type Id = TargetId;
    const KIND: ObjectKind = ObjectKind::Target;

    fn id(&self) -> TargetId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "name" => PropertyValue::text(&self.name),
            "application" => self.application.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Application, self.application)
            .build()
    }
}

/// Rights a role or managed attribute grants on a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAssociation {
    pub id: TargetAssociationId,
    pub owner: ObjectRef,
    pub target: Option<TargetId>,
    #[serde(default)]
    pub rights: Vec<String>,
}

impl Persistent for TargetAssociation {
    type Id = TargetAssociationId;
    const KIND: ObjectKind = ObjectKind::TargetAssociation;

    fn id(&self) -> TargetAssociationId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "owner_id" => self.owner.id.into(),
            "target" => self.target.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .object(self.owner)
            .one(ObjectKind::Target, self.target)
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    pub name: String,
    pub application: Option<ApplicationId>,
}

impl Persistent for Form {
    type Id = FormId;
    const KIND: ObjectKind = ObjectKind::Form;

    fn id(&self) -> FormId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "application" => self.application.into(),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        References::new()
            .one(ObjectKind::Application, self.application)
            .build()
    }
}

/// Recycle-bin ledger entry for an object deleted from an application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedObject {
    pub id: DeletedObjectId,
    pub application: ApplicationId,
    pub object_type: String,
    pub native_identity: String,
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub deleted: DateTime<Utc>,
}

impl DeletedObject {
    #[must_use]
    pub fn new(
        application: ApplicationId,
        object_type: impl Into<String>,
        native_identity: impl Into<String>,
        uuid: Option<String>,
    ) -> Self {
        Self {
            id: DeletedObjectId::new(),
            application,
            object_type: object_type.into(),
            native_identity: native_identity.into(),
            uuid,
            name: None,
            deleted: Utc::now(),
        }
    }
}

impl Persistent for DeletedObject {
    type Id = DeletedObjectId;
    const KIND: ObjectKind = ObjectKind::DeletedObject;

    fn id(&self) -> DeletedObjectId {
        self.id
    }

    fn property(&self, name: &str) -> PropertyValue {
        match name {
            "application" => self.application.into(),
            "object_type" => PropertyValue::text(&self.object_type),
            "native_identity" => PropertyValue::text(&self.native_identity),
            "uuid" => PropertyValue::opt_text(self.uuid.as_deref()),
            _ => PropertyValue::Null,
        }
    }

    fn references(&self) -> Vec<ObjectRef> {
        vec![ObjectRef::new(ObjectKind::Application, self.application)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_attribute_for_prefers_account_reference() {
        let app = Application::new("ad").with_account_schema(
            Schema::new(Schema::ACCOUNT)
                .with_attribute(AttributeDefinition::group_reference("memberOf", "group")),
        );
        assert_eq!(app.group_attribute_for("group"), "memberOf");
        assert_eq!(app.group_attribute_for("role"), "role");
    }

    #[test]
    fn test_application_rule_references_include_schemas() {
        let mut app = Application::new("ldap");
        app.correlation_rule = Some(RuleId::new());
        app.account_schema.refresh_rule = Some(RuleId::new());
        let refs = app.references();
        assert_eq!(
            refs.iter().filter(|r| r.kind == ObjectKind::Rule).count(),
            2
        );
    }

    #[test]
    fn test_generated_proxy_inherits_schema() {
        let parent = Application::new("hub").with_account_schema(
            Schema::new(Schema::ACCOUNT).with_attribute(AttributeDefinition::new("mail")),
        );
        let child = Application::generated_proxy("spoke", &parent);
        assert!(child.generated);
        assert_eq!(child.proxy, Some(parent.id));
        assert!(child.account_schema.attribute("mail").is_some());
    }
}

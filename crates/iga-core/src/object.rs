//! The persisted-object abstraction.
//!
//! Every entity kind is a variant of the [`Object`] tagged union and
//! implements [`Persistent`]. Stores operate on `Persistent` types and
//! evaluate queries through [`Persistent::property`], so the query layer never
//! needs to know concrete struct layouts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;
use uuid::Uuid;

use crate::ids::IdentityId;
use crate::model::*;

/// A queryable property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Text(String),
    Texts(Vec<String>),
    Id(Uuid),
    Ids(Vec<Uuid>),
    Timestamp(DateTime<Utc>),
}

impl PropertyValue {
    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    #[must_use]
    pub fn opt_text(value: Option<&str>) -> Self {
        value.map_or(Self::Null, Self::text)
    }

    #[must_use]
    pub fn texts(values: &[String]) -> Self {
        Self::Texts(values.to_vec())
    }

    #[must_use]
    pub fn ids<I: Into<Uuid> + Copy>(ids: &[I]) -> Self {
        Self::Ids(ids.iter().map(|id| (*id).into()).collect())
    }

    #[must_use]
    pub fn timestamp(value: Option<DateTime<Utc>>) -> Self {
        value.map_or(Self::Null, Self::Timestamp)
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Collection membership: an id inside `Ids`, or a string inside `Texts`.
    #[must_use]
    pub fn contains(&self, needle: &PropertyValue) -> bool {
        match (self, needle) {
            (Self::Ids(ids), Self::Id(id)) => ids.contains(id),
            (Self::Texts(values), Self::Text(value)) => values.contains(value),
            _ => false,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Uuid> for PropertyValue {
    fn from(value: Uuid) -> Self {
        Self::Id(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// A typed pointer at a persisted object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: ObjectKind,
    pub id: Uuid,
}

impl ObjectRef {
    #[must_use]
    pub fn new(kind: ObjectKind, id: impl Into<Uuid>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Collects the hard references an object holds.
#[derive(Debug, Default)]
pub struct References(Vec<ObjectRef>);

impl References {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn one<I: Into<Uuid>>(mut self, kind: ObjectKind, id: Option<I>) -> Self {
        if let Some(id) = id {
            self.0.push(ObjectRef::new(kind, id));
        }
        self
    }

    #[must_use]
    pub fn many<I: Into<Uuid> + Copy>(mut self, kind: ObjectKind, ids: &[I]) -> Self {
        self.0
            .extend(ids.iter().map(|id| ObjectRef::new(kind, *id)));
        self
    }

    #[must_use]
    pub fn object(mut self, reference: ObjectRef) -> Self {
        self.0.push(reference);
        self
    }

    #[must_use]
    pub fn build(self) -> Vec<ObjectRef> {
        self.0
    }
}

/// An entity that can be stored in a persistence context.
pub trait Persistent:
    Clone + Debug + Send + Sync + Into<Object> + TryFrom<Object, Error = Object> + 'static
{
    type Id: Copy + Eq + Hash + Debug + Display + Into<Uuid> + From<Uuid> + Send + Sync + 'static;

    const KIND: ObjectKind;

    fn id(&self) -> Self::Id;

    /// Unique name, for kinds that are looked up by name.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Resolves a named property for query evaluation. Unknown names are `Null`.
    fn property(&self, name: &str) -> PropertyValue;

    /// Hard references to other objects. A store enforcing referential
    /// integrity refuses to remove an object while any of these point at it.
    fn references(&self) -> Vec<ObjectRef> {
        Vec::new()
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(Self::KIND, self.id())
    }
}

/// Entities with a single owning identity.
pub trait Owned: Persistent {
    fn owner(&self) -> Option<IdentityId>;
    fn set_owner(&mut self, owner: Option<IdentityId>);
}

macro_rules! define_objects {
    ($($name:ident => $label:literal),+ $(,)?) => {
        /// Every persisted entity kind.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum ObjectKind {
            $($name),+
        }

        impl ObjectKind {
            pub const ALL: &'static [ObjectKind] = &[$(ObjectKind::$name),+];

            #[must_use]
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ObjectKind::$name => $label),+
                }
            }
        }

        impl std::str::FromStr for ObjectKind {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($label => Ok(ObjectKind::$name),)+
                    _ => Err(format!("Unknown object kind: {s}")),
                }
            }
        }

        /// A persisted object of any kind.
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(tag = "kind", rename_all = "snake_case")]
        pub enum Object {
            $($name($name)),+
        }

        impl Object {
            #[must_use]
            pub fn kind(&self) -> ObjectKind {
                match self {
                    $(Object::$name(_) => ObjectKind::$name),+
                }
            }

            #[must_use]
            pub fn id(&self) -> Uuid {
                match self {
                    $(Object::$name(object) => Persistent::id(object).into()),+
                }
            }

            #[must_use]
            pub fn name(&self) -> Option<&str> {
                match self {
                    $(Object::$name(object) => Persistent::name(object)),+
                }
            }

            #[must_use]
            pub fn property(&self, name: &str) -> PropertyValue {
                match self {
                    $(Object::$name(object) => Persistent::property(object, name)),+
                }
            }

            #[must_use]
            pub fn references(&self) -> Vec<ObjectRef> {
                match self {
                    $(Object::$name(object) => Persistent::references(object)),+
                }
            }

            #[must_use]
            pub fn object_ref(&self) -> ObjectRef {
                ObjectRef::new(self.kind(), self.id())
            }
        }

        $(
            impl From<$name> for Object {
                fn from(object: $name) -> Self {
                    Object::$name(object)
                }
            }

            impl TryFrom<Object> for $name {
                type Error = Object;

                fn try_from(object: Object) -> Result<Self, Object> {
                    match object {
                        Object::$name(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

define_objects! {
    Identity => "identity",
    Link => "link",
    Application => "application",
    ManagedAttribute => "managed_attribute",
    Bundle => "bundle",
    Rule => "rule",
    WorkItem => "work_item",
    Policy => "policy",
    SodConstraint => "sod_constraint",
    PolicyViolation => "policy_violation",
    Scorecard => "scorecard",
    ApplicationScorecard => "application_scorecard",
    RoleScorecard => "role_scorecard",
    IdentitySnapshot => "identity_snapshot",
    IdentityHistoryItem => "identity_history_item",
    IdentityEntitlement => "identity_entitlement",
    ExternalAttribute => "external_attribute",
    IdentityArchive => "identity_archive",
    BundleArchive => "bundle_archive",
    Profile => "profile",
    TaskResult => "task_result",
    TaskDefinition => "task_definition",
    Request => "request",
    IntegrationConfig => "integration_config",
    RoleIndex => "role_index",
    Workflow => "workflow",
    TargetAssociation => "target_association",
    Target => "target",
    DeletedObject => "deleted_object",
    Configuration => "configuration",
    WorkItemConfig => "work_item_config",
    DynamicScope => "dynamic_scope",
    ProvisioningRequest => "provisioning_request",
    ActivityDataSource => "activity_data_source",
    CertificationDefinition => "certification_definition",
    Form => "form",
    LocalizedAttribute => "localized_attribute",
}

impl Display for ObjectKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

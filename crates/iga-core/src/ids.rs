//! Strongly Typed Identifiers
//!
//! Every persisted entity kind has its own identifier newtype over a UUID.
//! Relationship fields in the model hold these ids rather than object
//! references, so a deletion is "remove the id, sweep the referencing rows".
//!
//! # Example
//!
//! ```
//! use iga_core::{IdentityId, LinkId};
//!
//! let identity = IdentityId::new();
//! let link = LinkId::new();
//!
//! fn requires_identity(id: IdentityId) -> String {
//!     id.to_string()
//! }
//!
//! let result = requires_identity(identity);
//! // requires_identity(link); // does not compile
//! ```

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

use crate::object::PropertyValue;

/// Error type for ID parsing failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIdError {
    /// The type of ID that failed to parse
    pub id_type: &'static str,
    /// The underlying UUID parse error message
    pub message: String,
}

impl Display for ParseIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to parse {}: {}", self.id_type, self.message)
    }
}

impl std::error::Error for ParseIdError {}

/// Defines a strongly-typed entity identifier.
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random ID using UUID v4.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an ID from an existing UUID.
            #[must_use]
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns a reference to the underlying UUID.
            #[must_use]
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| ParseIdError {
                        id_type: stringify!($name),
                        message: e.to_string(),
                    })
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl From<$name> for PropertyValue {
            fn from(id: $name) -> Self {
                PropertyValue::Id(id.0)
            }
        }

        impl From<Option<$name>> for PropertyValue {
            fn from(id: Option<$name>) -> Self {
                id.map_or(PropertyValue::Null, |id| PropertyValue::Id(id.0))
            }
        }
    };
}

define_id!(
    /// Identifier for an identity (a person or a workgroup).
    IdentityId
);
define_id!(
    /// Identifier for a link, the account an identity holds on an application.
    LinkId
);
define_id!(
    /// Identifier for an application (a connected target system).
    ApplicationId
);
define_id!(
    /// Identifier for a managed attribute (group or entitlement value).
    ManagedAttributeId
);
define_id!(
    /// Identifier for a bundle (role).
    BundleId
);
define_id!(
    /// Identifier for a rule.
    RuleId
);
define_id!(WorkItemId);
define_id!(PolicyId);
define_id!(SodConstraintId);
define_id!(PolicyViolationId);
define_id!(ScorecardId);
define_id!(ApplicationScorecardId);
define_id!(RoleScorecardId);
define_id!(IdentitySnapshotId);
define_id!(IdentityHistoryItemId);
define_id!(
    /// Identifier for a row of the entitlement index.
    IdentityEntitlementId
);
define_id!(ExternalAttributeId);
define_id!(IdentityArchiveId);
define_id!(BundleArchiveId);
define_id!(ProfileId);
define_id!(
    /// Identifier for a task result, which also carries persisted run state.
    TaskResultId
);
define_id!(TaskDefinitionId);
define_id!(RequestId);
define_id!(IntegrationConfigId);
define_id!(RoleIndexId);
define_id!(WorkflowId);
define_id!(TargetAssociationId);
define_id!(TargetId);
define_id!(DeletedObjectId);
define_id!(ConfigurationId);
define_id!(WorkItemConfigId);
define_id!(DynamicScopeId);
define_id!(ProvisioningRequestId);
define_id!(ActivityDataSourceId);
define_id!(CertificationDefinitionId);
define_id!(FormId);
define_id!(LocalizedAttributeId);

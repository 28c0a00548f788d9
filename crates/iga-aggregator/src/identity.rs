//! The identity completion contract and its bundled implementation.
//!
//! ```text
//! correlate ──▶ Option<Identity> ──(none)──▶ create
//!                     │
//!               refresh_link  (link + entitlement index, pending)
//!                     │
//!                  refresh    ──▶ RefreshOutcome { deleted, committed }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use iga_core::{Application, ApplicationId, Identity, IdentityEntitlement, Link};
use iga_store::{Filter, PersistenceContext, StoreError};
use iga_terminator::{Terminator, TerminatorError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::record::ResourceObject;

/// Errors raised by an identity service.
#[derive(Debug, Clone, Error)]
pub enum IdentityServiceError {
    #[error("Persistence error: {0}")]
    Store(#[from] StoreError),

    #[error("Deletion error: {0}")]
    Terminator(#[from] TerminatorError),

    #[error("Correlation failed: {0}")]
    Correlation(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Record rejected: {0}")]
    Rejected(String),
}

impl IdentityServiceError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Terminator(e) => e.is_transient(),
            Self::Transient(_) => true,
            Self::Correlation(_) | Self::Rejected(_) => false,
        }
    }
}

pub type IdentityServiceResult<T> = Result<T, IdentityServiceError>;

/// What [`IdentityService::refresh`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshOutcome {
    /// The identity was removed, typically because it lost its last link.
    pub deleted: bool,
    /// Pending changes were committed.
    pub committed: bool,
}

/// Binds records to identities and recomputes what derives from them.
///
/// Implementations stage writes in the shared persistence context; the
/// aggregator decides when to commit.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Finds the identity a record belongs to.
    ///
    /// With an existing link and `allow_reparent` unset, the link's holder
    /// wins.
    async fn correlate(
        &self,
        application: &Application,
        record: &ResourceObject,
        existing: Option<&Link>,
        allow_reparent: bool,
    ) -> IdentityServiceResult<Option<Identity>>;

    async fn create(
        &self,
        application: &Application,
        record: &ResourceObject,
    ) -> IdentityServiceResult<Identity>;

    /// Creates or updates the record's link on `identity`.
    async fn refresh_link(
        &self,
        identity: &mut Identity,
        application: &Application,
        record: &ResourceObject,
    ) -> IdentityServiceResult<Link>;

    async fn refresh(&self, identity: Identity) -> IdentityServiceResult<RefreshOutcome>;
}

/// Filter selecting the link for an account.
#[must_use]
pub fn account_filter(application: ApplicationId, native_identity: &str, instance: Option<&str>) -> Filter {
    Filter::and([
        Filter::eq("application", application),
        Filter::eq("native_identity", native_identity),
        match instance {
            Some(instance) => Filter::eq("instance", instance),
            None => Filter::is_null("instance"),
        },
    ])
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleIdentitizerConfig {
    /// Record attribute matched against identity names. The native identity
    /// is used when unset.
    #[serde(default)]
    pub correlation_attribute: Option<String>,

    /// Delete identities left without any link.
    #[serde(default)]
    pub prune_empty_identities: bool,
}

/// Name-correlating identity service.
pub struct SimpleIdentitizer<C: PersistenceContext> {
    ctx: Arc<C>,
    terminator: Terminator<C>,
    config: SimpleIdentitizerConfig,
}

impl<C: PersistenceContext> SimpleIdentitizer<C> {
    #[must_use]
    pub fn new(ctx: Arc<C>) -> Self {
        Self {
            terminator: Terminator::new(Arc::clone(&ctx)),
            ctx,
            config: SimpleIdentitizerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: SimpleIdentitizerConfig) -> Self {
        self.config = config;
        self
    }

    fn correlation_value(&self, record: &ResourceObject) -> Option<String> {
        match &self.config.correlation_attribute {
            Some(attribute) => record.string_attribute(attribute),
            None => record.native().map(str::to_string),
        }
    }

    async fn reindex_entitlements(
        &self,
        identity: &Identity,
        application: &Application,
        link: &Link,
    ) -> IdentityServiceResult<()> {
        self.ctx
            .remove_where::<IdentityEntitlement>(&Filter::and([
                Filter::eq("application", application.id),
                Filter::eq("native_identity", link.native_identity.as_str()),
            ]))
            .await?;
        for attribute in application.account_schema.entitlement_attributes() {
            let Some(value) = link.attributes.get(&attribute.name) else {
                continue;
            };
            for value in iga_core::values_as_strings(value) {
                self.ctx
                    .save(IdentityEntitlement::for_link(link, identity.id, &attribute.name, &value))
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<C: PersistenceContext> IdentityService for SimpleIdentitizer<C> {
    async fn correlate(
        &self,
        _application: &Application,
        record: &ResourceObject,
        existing: Option<&Link>,
        allow_reparent: bool,
    ) -> IdentityServiceResult<Option<Identity>> {
        let holder = existing.and_then(|link| link.identity);
        if let (Some(holder), false) = (holder, allow_reparent) {
            return Ok(self.ctx.get::<Identity>(holder).await?);
        }

        let found = match self.correlation_value(record) {
            Some(value) => {
                self.ctx
                    .find_one::<Identity>(Filter::and([
                        Filter::eq_ignore_case("name", value),
                        Filter::eq("workgroup", false),
                    ]))
                    .await?
            }
            None => None,
        };
        match (found, holder) {
            (Some(identity), _) => Ok(Some(identity)),
            (None, Some(holder)) => Ok(self.ctx.get::<Identity>(holder).await?),
            (None, None) => Ok(None),
        }
    }

    async fn create(
        &self,
        application: &Application,
        record: &ResourceObject,
    ) -> IdentityServiceResult<Identity> {
        let name = self.correlation_value(record).ok_or_else(|| {
            IdentityServiceError::Correlation(format!(
                "record on {} carries no correlation value",
                application.name
            ))
        })?;
        let mut identity = Identity::new(name);
        identity.display_name = record.display_name.clone();
        identity.needs_refresh = true;
        self.ctx.save(identity.clone()).await?;
        debug!(identity = %identity.name, application = %application.name, "Identity created");
        Ok(identity)
    }

    async fn refresh_link(
        &self,
        identity: &mut Identity,
        application: &Application,
        record: &ResourceObject,
    ) -> IdentityServiceResult<Link> {
        let native = record
            .native()
            .ok_or_else(|| IdentityServiceError::Rejected("record has no native identity".to_string()))?;

        let existing = self
            .ctx
            .find_one::<Link>(account_filter(application.id, native, record.instance.as_deref()))
            .await?;

        let mut link = match existing {
            Some(mut link) => {
                if let Some(previous) = link.identity.filter(|p| *p != identity.id) {
                    if let Some(mut holder) = self.ctx.get::<Identity>(previous).await? {
                        holder.links.retain(|l| *l != link.id);
                        holder.needs_refresh = true;
                        self.ctx.save(holder).await?;
                    }
                    debug!(native_identity = %native, from = %previous, to = %identity.id, "Account moved");
                }
                link.identity = Some(identity.id);
                link
            }
            None => {
                let mut link = Link::new(identity.id, application.id, native);
                link.instance = record.instance.clone();
                link
            }
        };

        if record.is_partial() {
            for (name, value) in &record.attributes {
                if record.remove {
                    remove_values(&mut link.attributes, name, value);
                } else if record.incremental {
                    add_values(&mut link.attributes, name, value);
                } else {
                    link.attributes.insert(name.clone(), value.clone());
                }
            }
        } else {
            link.attributes = record.attributes.clone();
        }
        if record.display_name.is_some() {
            link.display_name = record.display_name.clone();
        }
        if record.uuid.is_some() {
            link.uuid = record.uuid.clone();
        }
        let now = Utc::now();
        link.last_refresh = Some(now);
        link.modified = Some(now);

        if !identity.links.contains(&link.id) {
            identity.links.push(link.id);
        }
        if identity.display_name.is_none() {
            identity.display_name = record.display_name.clone();
        }
        identity.needs_refresh = true;

        self.ctx.save(link.clone()).await?;
        self.reindex_entitlements(identity, application, &link).await?;
        self.ctx.save(identity.clone()).await?;
        Ok(link)
    }

    async fn refresh(&self, mut identity: Identity) -> IdentityServiceResult<RefreshOutcome> {
        if self.config.prune_empty_identities
            && identity.links.is_empty()
            && !identity.workgroup
            && !identity.protected
        {
            debug!(identity = %identity.name, "Pruning identity without accounts");
            self.terminator.delete(identity).await?;
            return Ok(RefreshOutcome {
                deleted: true,
                committed: true,
            });
        }
        identity.needs_refresh = false;
        identity.modified = Some(Utc::now());
        self.ctx.save(identity).await?;
        Ok(RefreshOutcome::default())
    }
}

fn items(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

fn add_values(attributes: &mut iga_core::Attributes, name: &str, incoming: &Value) {
    let mut merged = attributes.get(name).map(items).unwrap_or_default();
    for value in items(incoming) {
        if !merged.contains(&value) {
            merged.push(value);
        }
    }
    attributes.insert(name.to_string(), Value::Array(merged));
}

fn remove_values(attributes: &mut iga_core::Attributes, name: &str, removed: &Value) {
    let Some(current) = attributes.get(name) else {
        return;
    };
    let removed = items(removed);
    let remaining: Vec<Value> = items(current)
        .into_iter()
        .filter(|v| !removed.contains(v))
        .collect();
    if remaining.is_empty() {
        attributes.remove(name);
    } else {
        attributes.insert(name.to_string(), Value::Array(remaining));
    }
}

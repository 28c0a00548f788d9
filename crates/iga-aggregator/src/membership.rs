//! Delta membership reconciliation.
//!
//! Applications that report membership on the group send changed groups, not
//! changed accounts. After the delta account pass, each changed group's
//! member list is compared with the entitlement index and the accounts whose
//! membership moved are fetched and aggregated individually.

use std::collections::BTreeSet;

use iga_core::{Application, ApplicationId, IdentityEntitlement};
use iga_store::{Filter, PersistenceContext, QueryOptions, StoreResult};
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::error::AggregationResult;
use crate::run::{ApplicationRun, RunContext};
use crate::source::IterateOptions;
use crate::statistics::RecordOutcome;

/// Accounts whose membership in one group changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub joiners: BTreeSet<String>,
    pub leavers: BTreeSet<String>,
}

impl MembershipDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.joiners.is_empty() && self.leavers.is_empty()
    }
}

/// Compares persisted and reported members. Leavers already aggregated in
/// this pass are dropped since their record carried the change. A deleted
/// group reports no members, so every persisted member leaves.
#[must_use]
pub fn diff(old: &BTreeSet<String>, new: &BTreeSet<String>, seen: &BTreeSet<String>) -> MembershipDiff {
    MembershipDiff {
        joiners: new.difference(old).cloned().collect(),
        leavers: old
            .difference(new)
            .filter(|native| !seen.contains(*native))
            .cloned()
            .collect(),
    }
}

/// Native identities holding `attribute = value` according to the
/// entitlement index.
pub async fn persisted_members<C: PersistenceContext>(
    ctx: &C,
    application: ApplicationId,
    attribute: &str,
    value: &str,
) -> StoreResult<BTreeSet<String>> {
    let rows = ctx
        .search::<IdentityEntitlement>(&QueryOptions::filter(Filter::and([
            Filter::eq("application", application),
            Filter::eq("name", attribute),
            Filter::eq("value", value),
        ])))
        .await?;
    Ok(rows.into_iter().filter_map(|row| row.native_identity).collect())
}

impl<C: PersistenceContext> Aggregator<C> {
    pub(crate) async fn reconcile_delta_membership(
        &self,
        run: &mut RunContext<C>,
        application: &Application,
    ) -> AggregationResult<()> {
        if application.features.no_random_access {
            warn!(application = %application.name, "Membership changes need random access, skipped");
            run.state.messages.warn(format!(
                "{}: group membership changes not applied, accounts cannot be fetched individually",
                application.name
            ));
            return Ok(());
        }

        let seen = run.seen.get(&application.name).cloned().unwrap_or_default();
        let account_type = application.account_schema.object_type.clone();
        let mut app_run = ApplicationRun::new(
            application.clone(),
            account_type.as_str(),
            format!("{}:membership", application.name),
            &self.config,
            None,
        );
        let mut missing = BTreeSet::new();

        for schema in &application.group_schemas {
            let Some(member_attribute) = &schema.member_attribute else {
                continue;
            };
            let attribute = application.group_attribute_for(&schema.object_type);
            let options = IterateOptions {
                delta: true,
                include_membership: true,
                ..IterateOptions::default()
            };
            let mut stream = self
                .source
                .iterate(application, &schema.object_type, &options)
                .await?;
            while !self.is_terminated() {
                let Some(record) = stream.next().await? else {
                    break;
                };
                let Some(native) = record.native().map(str::to_string) else {
                    continue;
                };
                // A deleted group reports no members, so all persisted members leave.
                let reports_members =
                    record.is_delete() || record.attributes.contains_key(member_attribute);
                let old = if reports_members {
                    persisted_members(self.ctx.as_ref(), application.id, &attribute, &native).await?
                } else {
                    BTreeSet::new()
                };
                if let Err(e) = self.reconcile_group(run, &mut app_run, &record).await {
                    if e.is_fatal() {
                        return Err(e);
                    }
                    warn!(application = %application.name, group = %native, error = %e, "Group refresh failed");
                    run.state
                        .messages
                        .error(format!("{}: group {}: {}", application.name, native, e));
                    run.state.check_deleted_cancelled = true;
                    continue;
                }
                if !reports_members {
                    continue;
                }
                let new: BTreeSet<String> = if record.is_delete() {
                    BTreeSet::new()
                } else {
                    record.values(member_attribute).into_iter().collect()
                };
                let changes = diff(&old, &new, &seen);
                if !changes.is_empty() {
                    debug!(
                        group = %native,
                        joiners = changes.joiners.len(),
                        leavers = changes.leavers.len(),
                        "Membership changed"
                    );
                    app_run.stats.membership_updates += 1;
                    missing.extend(changes.joiners);
                    missing.extend(changes.leavers);
                }
            }
            if let Err(e) = stream.close().await {
                warn!(application = %application.name, error = %e, "Failed to close group stream");
            }
        }

        app_run.stats.missing_accounts += u32::try_from(missing.len()).unwrap_or(u32::MAX);
        info!(application = %application.name, accounts = missing.len(), "Aggregating accounts with changed membership");
        for native in missing {
            if self.is_terminated() {
                break;
            }
            match self.source.get_object(application, &account_type, &native).await {
                Ok(record) => self.process_record(run, &mut app_run, record).await?,
                Err(e) if e.is_not_found() => {
                    warn!(application = %application.name, native_identity = %native, "Member account no longer exists");
                    app_run.count(&application.name, &account_type, RecordOutcome::Ignored);
                }
                Err(e) => {
                    warn!(application = %application.name, native_identity = %native, error = %e, "Member account fetch failed");
                    run.state
                        .messages
                        .error(format!("{}: {}: {}", application.name, native, e));
                    run.state.check_deleted_cancelled = true;
                    app_run.stats.errors += 1;
                }
            }
        }
        self.flush_open_identity(run, &mut app_run).await?;
        self.flush_touch(&mut app_run).await?;
        run.state.statistics.merge(&app_run.stats);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| (*v).to_string()).collect()
    }

    #[test]
    fn test_diff_joiners_and_leavers() {
        let changes = diff(&set(&["a", "b"]), &set(&["b", "c"]), &set(&[]));
        assert_eq!(changes.joiners, set(&["c"]));
        assert_eq!(changes.leavers, set(&["a"]));
    }

    #[test]
    fn test_seen_leavers_are_dropped() {
        let changes = diff(&set(&["a", "b"]), &set(&["b", "c"]), &set(&["a", "c"]));
        assert_eq!(changes.joiners, set(&["c"]));
        assert!(changes.leavers.is_empty());
    }

    #[test]
    fn test_deleted_group_loses_every_member() {
        let changes = diff(&set(&["a", "b"]), &BTreeSet::new(), &set(&["b"]));
        assert!(changes.joiners.is_empty());
        assert_eq!(changes.leavers, set(&["a"]));
    }

    #[test]
    fn test_unchanged_membership_is_empty() {
        assert!(diff(&set(&["a"]), &set(&["a"]), &set(&[])).is_empty());
    }
}

//! Application deletion.

use iga_core::{
    Application, ApplicationId, ApplicationScorecard, Configuration, DeletedObject,
    Form, IdentityEntitlement, IntegrationConfig, Link, LocalizedAttribute, ManagedAttribute,
    Profile, Target, TargetAssociation,
};
use iga_store::{Filter, PersistenceContext, ProjectionIterator, QueryOptions};
use tracing::{debug, instrument};

use crate::error::TerminatorResult;
use crate::terminator::Terminator;

impl<C: PersistenceContext> Terminator<C> {
    #[instrument(skip(self, application), fields(application_id = %application.id, application = %application.name))]
    pub(crate) async fn visit_application(&self, application: Application) -> TerminatorResult<()> {
        let id = application.id;

        if let Some(mut current) = self.ctx.get::<Application>(id).await? {
            if current.scorecard.take().is_some() {
                self.ctx.save(current).await?;
                self.ctx.commit().await?;
            }
        }

        let proxied = self
            .update_each::<Application, _>(Filter::eq("proxy", id), |a| a.proxy = None)
            .await?;
        if proxied > 0 {
            debug!(proxied, "Proxied applications detached");
        }
        self.update_each::<Application, _>(Filter::contains("dependencies", id), move |a| {
            a.dependencies.retain(|d| *d != id)
        })
        .await?;

        self.delete_where::<Profile>(Filter::eq("application", id)).await?;
        self.update_identities(Filter::contains("exception_applications", id), None, move |i| {
            i.exceptions.retain(|e| e.application != id)
        })
        .await?;

        let links = self.delete_where::<Link>(Filter::eq("application", id)).await?;
        debug!(links, "Application links deleted");

        self.delete_where::<ApplicationScorecard>(Filter::eq("application", id)).await?;
        self.delete_where::<ManagedAttribute>(Filter::eq("application", id)).await?;
        self.delete_where::<Target>(Filter::eq("application", id)).await?;
        self.update_each::<Form, _>(Filter::eq("application", id), |f| f.application = None)
            .await?;
        self.update_each::<IntegrationConfig, _>(Filter::eq("application", id), |c| {
            c.application = None
        })
        .await?;

        self.prune_pass_through(id, &application.name).await?;

        self.remove_where::<IdentityEntitlement>(Filter::eq("application", id)).await?;
        self.remove_where::<DeletedObject>(Filter::eq("application", id)).await?;
        self.remove_where::<LocalizedAttribute>(Filter::eq("target_id", id)).await?;
        self.remove_where::<TargetAssociation>(Filter::eq("owner_id", id)).await?;

        self.inner_delete::<Application>(id).await
    }

    /// Removes the application from every pass-through list. Entries may be
    /// ids or names, and a single entry may hold a comma separated list.
    async fn prune_pass_through(&self, id: ApplicationId, name: &str) -> TerminatorResult<usize> {
        let id_text = id.to_string();
        let mut configs =
            ProjectionIterator::<Configuration>::query(self.ctx.as_ref(), &QueryOptions::new())
                .await?;
        let mut changed = 0usize;
        while let Some(mut config) = configs.fetch_next(self.ctx.as_ref()).await? {
            let pruned = prune_csv_entries(&config.pass_through_applications, &[&id_text, name]);
            if pruned == config.pass_through_applications {
                continue;
            }
            config.pass_through_applications = pruned;
            self.ctx.save(config).await?;
            self.ctx.commit().await?;
            changed += 1;
        }
        Ok(changed)
    }
}

fn prune_csv_entries(entries: &[String], remove: &[&str]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.split(',').map(str::trim).collect();
            if !parts.iter().any(|part| remove.contains(part)) {
                return Some(entry.clone());
            }
            let kept: Vec<&str> = parts
                .into_iter()
                .filter(|part| !part.is_empty() && !remove.contains(part))
                .collect();
            (!kept.is_empty()).then(|| kept.join(","))
        })
        .collect()
}

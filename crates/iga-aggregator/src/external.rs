//! External attribute writes.
//!
//! Multi-valued attributes flagged `external` are mirrored into one row per
//! value. Writes happen inline in the aggregation session or on a background
//! task with its own session, fed through a bounded channel.
//!
//! ```text
//! aggregator ──send──▶ [mpsc, bounded] ──recv──▶ writer task (own session)
//!     close: drop sender, join with timeout
//! ```

use std::sync::Arc;
use std::time::Duration;

use iga_core::{values_as_strings, Application, ExternalAttribute, ExternalOwner, Link};
use iga_store::{Filter, PersistenceContext, StoreResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Replacement value set for one attribute of one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAttributeUpdate {
    pub owner_kind: ExternalOwner,
    pub object_id: Uuid,
    pub attribute: String,
    pub values: Vec<String>,
}

impl ExternalAttributeUpdate {
    /// Updates for every external attribute of the link's schema.
    #[must_use]
    pub fn for_link(application: &Application, link: &Link) -> Vec<Self> {
        application
            .account_schema
            .external_attributes()
            .map(|attribute| Self {
                owner_kind: ExternalOwner::Link,
                object_id: link.id.into(),
                attribute: attribute.name.clone(),
                values: link
                    .attributes
                    .get(&attribute.name)
                    .map(values_as_strings)
                    .unwrap_or_default(),
            })
            .collect()
    }
}

/// Replaces the rows for one attribute. Does not commit.
pub async fn apply_external_update<C: PersistenceContext>(
    ctx: &C,
    update: &ExternalAttributeUpdate,
) -> StoreResult<()> {
    ctx.remove_where::<ExternalAttribute>(&Filter::and([
        Filter::eq("owner_kind", update.owner_kind.as_str()),
        Filter::eq("object_id", update.object_id),
        Filter::eq("attribute_name", update.attribute.as_str()),
    ]))
    .await?;
    for value in &update.values {
        ctx.save(ExternalAttribute::new(
            update.owner_kind,
            update.object_id,
            update.attribute.clone(),
            value.clone(),
        ))
        .await?;
    }
    Ok(())
}

/// Background writer with its own session.
#[derive(Debug)]
pub struct ExternalAttributeWriter {
    tx: Option<mpsc::Sender<ExternalAttributeUpdate>>,
    handle: Option<JoinHandle<usize>>,
    wait: Duration,
}

impl ExternalAttributeWriter {
    /// Opens a session and starts the writer task.
    pub async fn spawn<C: PersistenceContext>(ctx: &C, capacity: usize, wait: Duration) -> StoreResult<Self> {
        let session = ctx.new_session().await?;
        let (tx, mut rx) = mpsc::channel::<ExternalAttributeUpdate>(capacity.max(1));

        let handle = tokio::spawn(async move {
            info!("External attribute writer started");
            let mut written = 0usize;
            while let Some(update) = rx.recv().await {
                let result = match apply_external_update(&session, &update).await {
                    Ok(()) => session.commit().await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => written += 1,
                    Err(e) => {
                        warn!(object_id = %update.object_id, attribute = %update.attribute, error = %e, "External attribute write failed");
                        if let Err(e) = session.rollback().await {
                            warn!(error = %e, "External attribute rollback failed");
                        }
                    }
                }
            }
            info!(written, "External attribute writer stopped");
            written
        });

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
            wait,
        })
    }

    /// Queues an update, waiting for room. Returns `false` once closed.
    pub async fn send(&self, update: ExternalAttributeUpdate) -> bool {
        match &self.tx {
            Some(tx) => tx.send(update).await.is_ok(),
            None => false,
        }
    }

    /// Stops accepting updates and waits for the queue to drain.
    ///
    /// Returns the number of updates written, or `None` when the task did not
    /// finish in time or failed.
    pub async fn close(&mut self) -> Option<usize> {
        self.tx.take();
        let handle = self.handle.take()?;
        match tokio::time::timeout(self.wait, handle).await {
            Ok(Ok(written)) => Some(written),
            Ok(Err(e)) => {
                warn!(error = %e, "External attribute writer failed");
                None
            }
            Err(_) => {
                warn!(wait_secs = self.wait.as_secs(), "Timed out waiting for external attribute writer");
                None
            }
        }
    }
}

/// Where external attribute updates go.
pub enum ExternalAttributeSink<C: PersistenceContext> {
    /// Staged in the aggregation session, committed with the record.
    Inline(Arc<C>),
    /// Sent to the writer task after the record commits.
    Background(ExternalAttributeWriter),
}

impl<C: PersistenceContext> ExternalAttributeSink<C> {
    /// Stages updates in the aggregation session so they commit with the
    /// record. Background updates wait for [`Self::publish`].
    pub async fn stage(&self, updates: &[ExternalAttributeUpdate]) -> StoreResult<()> {
        if let Self::Inline(ctx) = self {
            for update in updates {
                apply_external_update(ctx.as_ref(), update).await?;
            }
        }
        Ok(())
    }

    /// Hands updates to the background writer. Call only once the owning
    /// record has committed.
    pub async fn publish(&self, updates: Vec<ExternalAttributeUpdate>) {
        let Self::Background(writer) = self else {
            return;
        };
        for update in updates {
            let object_id = update.object_id;
            if !writer.send(update).await {
                warn!(object_id = %object_id, "External attribute writer is closed, update dropped");
            }
        }
    }

    pub async fn close(&mut self) {
        if let Self::Background(writer) = self {
            if let Some(written) = writer.close().await {
                debug!(written, "External attribute writer joined");
            }
        }
    }
}

impl<C: PersistenceContext> std::fmt::Debug for ExternalAttributeSink<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inline(_) => f.write_str("ExternalAttributeSink::Inline"),
            Self::Background(writer) => f.debug_tuple("ExternalAttributeSink::Background").field(writer).finish(),
        }
    }
}

//! Managed attribute (group) reconciliation.

mod hierarchy;
mod promotion;
mod reconciler;

use async_trait::async_trait;
use iga_core::{Application, ManagedAttribute};

use crate::error::AggregationResult;
use crate::record::ResourceObject;

pub use hierarchy::prune_cycles;
pub use promotion::PromotionCache;
pub use reconciler::group_filter;

/// Post-processing applied to a refreshed group before it is saved.
///
/// The returned object replaces the refreshed one.
#[async_trait]
pub trait GroupRefreshHook: Send + Sync {
    async fn refresh(
        &self,
        application: &Application,
        group: ManagedAttribute,
        record: &ResourceObject,
    ) -> AggregationResult<ManagedAttribute>;
}

//! Discovery interface - the source of initial work items.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::item::DiscoveredUrl;

/// Supplies the initial set of product URLs for an execution.
///
/// Discovery failing entirely (or returning zero items) is pipeline-fatal;
/// there is nothing for any later stage to do.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Discover product URLs on the target, up to `max_items` if set.
    async fn discover(
        &self,
        target: &str,
        max_items: Option<usize>,
    ) -> Result<Vec<DiscoveredUrl>>;
}

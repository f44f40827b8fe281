use crate::{types::Context, utils::cache};
use std::sync::Arc;
use std::time::Duration;

const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Background upkeep for the in-process widget cache. Nothing runs when the
/// context uses another cache backend.
pub fn monitor(ctx: Arc<Context>) -> Option<tokio::task::JoinHandle<()>> {
    ctx.memory_cache
        .clone()
        .map(|memory_cache| cache::spawn_sweeper(memory_cache, CACHE_SWEEP_INTERVAL))
}

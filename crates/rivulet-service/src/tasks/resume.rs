//! Periodic resume data requests.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, trace};

use crate::service::ServiceState;

/// Ask the engine for resume data of every torrent that changed since its last save.
/// The data itself arrives later as an alert.
pub(super) async fn run(state: Arc<ServiceState>) {
    let period = state
        .ctx
        .settings
        .session_save_interval()
        .max(Duration::from_secs(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = state.ctx.closing.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let registry = state.registry.read().await;
        for torrent in &registry.torrents {
            let handle = torrent.handle();
            if !handle.is_valid() {
                continue;
            }
            let status = handle.status();
            if status.has_metadata && status.need_save_resume {
                trace!(info_hash = %torrent.info_hash(), "requesting resume data");
                handle.save_resume_data();
            }
        }
    }
    debug!("resume persister stopped");
}

//! Progress monitor tick.

use std::sync::Arc;
use std::time::Duration;

use rivulet_config::Settings;
use rivulet_events::{Event, PauseReason};
use rivulet_torrent_core::HandleStatus;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::file::BufferCheck;
use crate::service::ServiceState;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

pub(super) async fn run(state: Arc<ServiceState>) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = state.ctx.closing.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if state.ctx.engine.is_paused() {
            continue;
        }
        tick(&state).await;
    }
    debug!("progress monitor stopped");
}

/// One pass over the active torrents with the registry write lock held: finish buffers,
/// sum rates and progress, enforce the seeding limits.
async fn tick(state: &ServiceState) {
    let settings = &state.ctx.settings;
    let mut registry = state.registry.write().await;
    let mut buffer_completed = false;
    let mut still_buffering = false;
    let mut download_rate = 0;
    let mut upload_rate = 0;
    let mut samples = Vec::with_capacity(registry.torrents.len());

    for torrent in &registry.torrents {
        let handle = torrent.handle();
        if torrent.is_paused() || !handle.is_valid() || !torrent.has_metadata() {
            continue;
        }

        for file in torrent.files() {
            match file.check_buffer() {
                BufferCheck::Completed => {
                    buffer_completed = true;
                    state.ctx.events.publish(Event::BufferingCompleted {
                        info_hash: torrent.info_hash().to_hex(),
                        file_index: file.id(),
                    });
                }
                BufferCheck::Pending => still_buffering = true,
                BufferCheck::Idle => {}
            }
        }

        let status = handle.status();
        download_rate += status.download_rate;
        upload_rate += status.upload_rate;
        samples.push((status.progress, status.total_wanted));
        if status.progress < 1.0 {
            continue;
        }

        if let Some(reason) = seed_limit(settings, &status) {
            warn!(info_hash = %torrent.info_hash(), ?reason, "seeding limit reached, pausing");
            torrent.pause_for(reason);
        }
    }

    if buffer_completed && !still_buffering {
        state.ctx.set_buffering_rate_limit(true);
    }

    registry.download_rate = download_rate;
    registry.upload_rate = upload_rate;
    registry.progress = aggregate_progress(&samples);
}

/// Completion percentage weighted by wanted size over the incomplete torrents only.
/// `samples` holds `(progress in 0..=1, wanted bytes)`; 100 when nothing is incomplete.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn aggregate_progress(samples: &[(f64, u64)]) -> f64 {
    let (done, size) = samples
        .iter()
        .filter(|(progress, _)| *progress < 1.0)
        .fold((0.0, 0_u64), |(done, size), (progress, wanted)| {
            (done + progress * *wanted as f64, size + wanted)
        });
    if size == 0 {
        100.0
    } else {
        100.0 * done / size as f64
    }
}

/// First seeding limit a complete torrent has reached: seed time, then seed time relative
/// to download time, then share ratio.
pub(crate) fn seed_limit(settings: &Settings, status: &HandleStatus) -> Option<PauseReason> {
    let mut seeding = status.seeding_time.as_secs();
    if seeding == 0 {
        seeding = status.finished_time.as_secs();
    }

    if settings.seed_time_limit > 0 && seeding >= settings.seed_time_limit {
        return Some(PauseReason::SeedTimeLimit);
    }
    if settings.seed_time_ratio_limit > 0 {
        let download_time = status.active_time.as_secs().saturating_sub(seeding);
        if download_time > 1
            && seeding.saturating_mul(100) / download_time
                >= u64::from(settings.seed_time_ratio_limit)
        {
            return Some(PauseReason::SeedTimeRatioLimit);
        }
    }
    if settings.share_ratio_limit > 0
        && status.all_time_download > 0
        && status.all_time_upload.saturating_mul(100) / status.all_time_download
            >= u64::from(settings.share_ratio_limit)
    {
        return Some(PauseReason::ShareRatioLimit);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close_to(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-9
    }

    #[test]
    fn progress_weights_incomplete_torrents_by_size() {
        assert!(close_to(aggregate_progress(&[(0.5, 1_000), (0.1, 3_000)]), 20.0));
    }

    #[test]
    fn complete_torrents_are_left_out_of_the_average() {
        assert!(close_to(aggregate_progress(&[(0.25, 1_000), (1.0, 5_000)]), 25.0));
        assert!(close_to(aggregate_progress(&[(1.0, 1_000), (1.0, 10)]), 100.0));
        assert!(close_to(aggregate_progress(&[]), 100.0));
    }

    fn seeded(seeding: u64, active: u64) -> HandleStatus {
        HandleStatus {
            progress: 1.0,
            seeding_time: Duration::from_secs(seeding),
            active_time: Duration::from_secs(active),
            ..HandleStatus::default()
        }
    }

    #[test]
    fn seed_time_limit_trips_first() {
        let settings = Settings {
            seed_time_limit: 60,
            seed_time_ratio_limit: 10,
            ..Settings::default()
        };
        assert_eq!(
            seed_limit(&settings, &seeded(60, 120)),
            Some(PauseReason::SeedTimeLimit)
        );
        assert_eq!(
            seed_limit(&settings, &seeded(30, 120)),
            Some(PauseReason::SeedTimeRatioLimit)
        );
        assert_eq!(seed_limit(&Settings::default(), &seeded(1_000, 2_000)), None);
    }

    #[test]
    fn finished_time_stands_in_for_missing_seed_time() {
        let settings = Settings {
            seed_time_limit: 60,
            ..Settings::default()
        };
        let status = HandleStatus {
            finished_time: Duration::from_secs(90),
            ..seeded(0, 100)
        };
        assert_eq!(seed_limit(&settings, &status), Some(PauseReason::SeedTimeLimit));
    }

    #[test]
    fn seed_ratio_needs_some_download_time() {
        let settings = Settings {
            seed_time_ratio_limit: 50,
            ..Settings::default()
        };
        assert_eq!(seed_limit(&settings, &seeded(10, 11)), None);
        assert_eq!(
            seed_limit(&settings, &seeded(10, 30)),
            Some(PauseReason::SeedTimeRatioLimit)
        );
    }

    #[test]
    fn share_ratio_uses_lifetime_counters() {
        let settings = Settings {
            share_ratio_limit: 150,
            ..Settings::default()
        };
        let mut status = seeded(0, 0);
        status.all_time_download = 1_000;
        status.all_time_upload = 1_400;
        assert_eq!(seed_limit(&settings, &status), None);
        status.all_time_upload = 1_500;
        assert_eq!(seed_limit(&settings, &status), Some(PauseReason::ShareRatioLimit));
        status.all_time_download = 0;
        assert_eq!(seed_limit(&settings, &status), None);
    }
}

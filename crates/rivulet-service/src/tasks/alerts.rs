//! Alert pump: persists resume data and metadata, triggers the space check and logs every
//! alert by category.

use std::borrow::Cow;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use rivulet_events::Event;
use rivulet_torrent_core::{Alert, AlertCategory, AlertKind, InfoHash, NativeState};
use tracing::{debug, error, info, warn};

use crate::service::ServiceState;
use crate::torrent::SpaceCheck;

/// Longest single wait for the next alert batch.
const ALERT_WAIT: Duration = Duration::from_secs(1);

static ADDRESS_OCTETS: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\.\d+").ok());

pub(super) async fn run(state: Arc<ServiceState>) {
    info!("consuming alerts");
    loop {
        let alerts = tokio::select! {
            () = state.ctx.closing.cancelled() => break,
            alerts = state.ctx.engine.wait_for_alerts(ALERT_WAIT) => alerts,
        };
        for alert in alerts {
            dispatch(&state, &alert).await;
            log_alert(&alert);
        }
    }
    debug!("alert pump stopped");
}

async fn dispatch(state: &ServiceState, alert: &Alert) {
    match &alert.kind {
        AlertKind::ResumeDataReady { info_hash, payload } => {
            on_resume_data(state, info_hash, payload).await;
        }
        AlertKind::MetadataReceived { info_hash } => on_metadata(state, info_hash).await,
        AlertKind::StateChanged {
            info_hash,
            state: NativeState::Downloading,
            ..
        } => {
            if let Some(torrent) = state.find(info_hash).await {
                if torrent.check_available_space() == SpaceCheck::Insufficient {
                    warn!(info_hash = %info_hash, "torrent paused for lack of space");
                }
            }
        }
        AlertKind::StateChanged { .. } | AlertKind::ExternalAddress | AlertKind::Other { .. } => {}
    }
}

/// Persist resume data only when the engine can read it back and the torrent is still
/// active. Sidecars are written under the registry lock, never after a removal.
async fn on_resume_data(state: &ServiceState, info_hash: &InfoHash, payload: &[u8]) {
    let registry = state.registry.read().await;
    if registry.find(info_hash).is_none() {
        debug!(info_hash = %info_hash, "dropping resume data of a removed torrent");
        return;
    }
    match state.ctx.engine.read_resume_data(payload) {
        Ok(_) => {
            state.persist.save_fastresume(info_hash, payload);
            drop(registry);
            state.ctx.events.publish(Event::ResumeDataSaved {
                info_hash: info_hash.to_hex(),
            });
        }
        Err(err) => warn!(
            info_hash = %info_hash,
            bytes = payload.len(),
            error = %err,
            "resume data corrupted, skipping"
        ),
    }
}

async fn on_metadata(state: &ServiceState, info_hash: &InfoHash) {
    let registry = state.registry.read().await;
    let Some(torrent) = registry.find(info_hash) else {
        return;
    };
    if torrent.populate_files() {
        let info = torrent.info();
        state.ctx.events.publish(Event::MetadataReceived {
            info_hash: info_hash.to_hex(),
            name: info.name,
            files: torrent.files().len(),
        });
    }

    info!(info_hash = %info_hash, "saving torrent file");
    match state.ctx.engine.generate_metainfo(info_hash) {
        Ok(bytes) => {
            state.persist.save_torrent(info_hash, &bytes);
            state.persist.delete_magnet(info_hash);
        }
        Err(err) => error!(info_hash = %info_hash, error = %err, "failed to generate torrent file"),
    }
}

/// Log at a level picked from the alert category.
fn log_alert(alert: &Alert) {
    let what = alert.kind.what();
    let message = match alert.kind {
        AlertKind::ExternalAddress => mask_addresses(&alert.message),
        _ => Cow::Borrowed(alert.message.as_str()),
    };
    let category = alert.category;
    if category.contains(AlertCategory::ERROR) {
        error!(alert = what, "{message}");
    } else if category.contains(AlertCategory::CONNECT) {
        debug!(alert = what, "{message}");
    } else if category.contains(AlertCategory::PERFORMANCE) {
        warn!(alert = what, "{message}");
    } else {
        info!(alert = what, "{message}");
    }
}

/// Replace every dotted number after the first octet with `.XX`.
fn mask_addresses(message: &str) -> Cow<'_, str> {
    match ADDRESS_OCTETS.as_ref() {
        Some(pattern) => pattern.replace_all(message, ".XX"),
        None => Cow::Borrowed(message),
    }
}

//! Background tasks: alert pump, progress monitor and resume persister. Each runs until
//! the session closing token is cancelled.

mod alerts;
mod progress;
mod resume;

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::service::ServiceState;

pub(crate) fn spawn_all(state: &Arc<ServiceState>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(resume::run(Arc::clone(state))),
        tokio::spawn(alerts::run(Arc::clone(state))),
        tokio::spawn(progress::run(Arc::clone(state))),
    ]
}

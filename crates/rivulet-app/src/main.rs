#![forbid(unsafe_code)]
#![warn(
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Binary entrypoint that boots the streaming daemon and blocks until interrupted.

use rivulet_app::{AppResult, run_app};

/// Boots the daemon and waits for Ctrl-C.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}

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

//! Rivulet daemon bootstrap wiring.
//!
//! Layout: `bootstrap.rs` (environment, logging, service lifecycle), `error.rs`.

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error type.
pub mod error;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};

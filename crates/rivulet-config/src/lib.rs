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

//! File-backed daemon settings.
//!
//! Layout: `model.rs` (typed settings), `defaults.rs`, `validate.rs` (field checks),
//! `loader.rs` (load, update and save of the JSON document).

mod defaults;
pub mod error;
mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use model::{EncryptionPolicy, Settings};

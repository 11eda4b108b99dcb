pub mod action;
pub mod classifier;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event;
pub mod executor;
pub mod format;
pub mod history;
pub mod job;
pub mod reconcile;
pub mod record;
pub mod source;
pub mod step;

pub use error::{RenderwatchError, Result};

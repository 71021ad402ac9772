//! Channel archiver: incremental, deduplicated archiving of channel message
//! history pulled from a rate-limited, paginated upstream API.

pub mod api;
pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod logging;
pub mod trigger;

pub use error::{Error, Result};

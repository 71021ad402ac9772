//! HTTP query API over the archive.
//!
//! Serves archived messages per channel, channel registration, file export,
//! and a manual archiving trigger. All routes live under `/api`.

mod archive;
mod channels;
mod server;
mod state;

pub use server::{router, start_http_server};
pub use state::ApiState;

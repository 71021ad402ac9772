//! Incremental channel archiving: data model, storage and the archiver.

pub mod archiver;
pub mod store;
pub mod types;

pub use archiver::{Archiver, ArchiverConfig, ChannelOutcome, FinalState, RunSummary};
pub use store::ArchiveStore;
pub use types::{Channel, Message, Position, QueryLimit};

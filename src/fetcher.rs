//! Upstream page retrieval: the fetcher trait and its dynamic companion.

pub mod slack;

pub use slack::SlackFetcher;

use crate::archive::{Message, Position};
use crate::error::FetchError;
use std::future::Future;
use std::pin::Pin;

pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Display metadata for an upstream channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel_id: String,
    pub display_name: String,
}

/// One bounded batch of messages, ascending by position.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub messages: Vec<Message>,
    /// Upstream has nothing beyond what this page returned.
    pub reached_end: bool,
}

impl Page {
    /// Build a page from upstream messages in any order, capped at
    /// `max_page_size`.
    pub fn from_unordered(mut messages: Vec<Message>, max_page_size: u16) -> Self {
        messages.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });
        let reached_end = messages.len() < usize::from(max_page_size);
        messages.truncate(usize::from(max_page_size));
        Self {
            messages,
            reached_end,
        }
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.messages.last().map(|message| &message.position)
    }

    /// Drop anything at or before `cursor`; the lower bound is exclusive.
    pub fn retain_after(&mut self, cursor: Option<&Position>) -> usize {
        let Some(cursor) = cursor else {
            return 0;
        };
        let before = self.messages.len();
        self.messages.retain(|message| &message.position > cursor);
        before - self.messages.len()
    }
}

/// Static trait for upstream history sources.
/// Use this for type-safe implementations.
pub trait Fetcher: Send + Sync + 'static {
    /// Unique name for this upstream.
    fn name(&self) -> &str;

    /// Look up display metadata for a channel.
    fn resolve_channel(
        &self,
        channel_id: &str,
    ) -> impl Future<Output = FetchResult<ChannelInfo>> + Send;

    /// Fetch up to `max_page_size` messages with position strictly greater
    /// than `since` (or from the beginning when `since` is `None`).
    fn fetch_page(
        &self,
        channel_id: &str,
        since: Option<&Position>,
        max_page_size: u16,
    ) -> impl Future<Output = FetchResult<Page>> + Send;
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn FetcherDyn>`.
pub trait FetcherDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn resolve_channel<'a>(
        &'a self,
        channel_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = FetchResult<ChannelInfo>> + Send + 'a>>;

    fn fetch_page<'a>(
        &'a self,
        channel_id: &'a str,
        since: Option<&'a Position>,
        max_page_size: u16,
    ) -> Pin<Box<dyn Future<Output = FetchResult<Page>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing Fetcher automatically implements FetcherDyn.
impl<T: Fetcher> FetcherDyn for T {
    fn name(&self) -> &str {
        Fetcher::name(self)
    }

    fn resolve_channel<'a>(
        &'a self,
        channel_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = FetchResult<ChannelInfo>> + Send + 'a>> {
        Box::pin(Fetcher::resolve_channel(self, channel_id))
    }

    fn fetch_page<'a>(
        &'a self,
        channel_id: &'a str,
        since: Option<&'a Position>,
        max_page_size: u16,
    ) -> Pin<Box<dyn Future<Output = FetchResult<Page>> + Send + 'a>> {
        Box::pin(Fetcher::fetch_page(self, channel_id, since, max_page_size))
    }
}

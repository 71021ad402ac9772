//! Slack history fetcher using slack-morphism.
//!
//! Pages come from `conversations.history` with `oldest` set to the channel
//! cursor and `inclusive = false`. Slack message timestamps (`ts`) serve as
//! both message id and position; they are unique within a channel.

use crate::archive::{Message, Position};
use crate::error::FetchError;
use crate::fetcher::{ChannelInfo, FetchResult, Fetcher, Page};

use anyhow::Context as _;
use slack_morphism::errors::SlackClientError;
use slack_morphism::prelude::*;
use std::sync::Arc;

/// Slack history fetcher.
pub struct SlackFetcher {
    /// Shared HTTP client; holds the hyper connection pool.
    client: Arc<SlackHyperClient>,
    token: SlackApiToken,
}

impl SlackFetcher {
    pub fn new(bot_token: impl Into<String>) -> anyhow::Result<Self> {
        let client = Arc::new(SlackClient::new(
            SlackClientHyperConnector::new().context("failed to create slack HTTP connector")?,
        ));
        let token = SlackApiToken::new(SlackApiTokenValue(bot_token.into()));
        Ok(Self { client, token })
    }

    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.token)
    }
}

impl Fetcher for SlackFetcher {
    fn name(&self) -> &str {
        "slack"
    }

    async fn resolve_channel(&self, channel_id: &str) -> FetchResult<ChannelInfo> {
        let request = SlackApiConversationsInfoRequest::new(SlackChannelId(channel_id.to_string()));
        let response = self
            .session()
            .conversations_info(&request)
            .await
            .map_err(|error| map_slack_error(channel_id, error))?;

        let display_name = response
            .channel
            .name
            .unwrap_or_else(|| channel_id.to_string());

        Ok(ChannelInfo {
            channel_id: channel_id.to_string(),
            display_name,
        })
    }

    async fn fetch_page(
        &self,
        channel_id: &str,
        since: Option<&Position>,
        max_page_size: u16,
    ) -> FetchResult<Page> {
        let mut request = SlackApiConversationsHistoryRequest::new()
            .with_channel(SlackChannelId(channel_id.to_string()))
            .with_limit(max_page_size)
            .with_inclusive(false);
        if let Some(since) = since {
            request = request.with_oldest(SlackTs(since.as_str().to_string()));
        }

        let response = self
            .session()
            .conversations_history(&request)
            .await
            .map_err(|error| map_slack_error(channel_id, error))?;

        let has_more = response.has_more.unwrap_or(false);
        let messages: Vec<Message> = response
            .messages
            .into_iter()
            .map(|message| {
                let ts = message.origin.ts.0;
                Message {
                    message_id: ts.clone(),
                    channel_id: channel_id.to_string(),
                    position: Position::new(ts),
                    author: message.sender.user.map(|user| user.0),
                    body: message.content.text.unwrap_or_default(),
                }
            })
            .collect();

        let mut page = Page::from_unordered(messages, max_page_size);
        if !has_more {
            page.reached_end = true;
        }

        tracing::debug!(
            channel_id,
            since = since.map(Position::as_str),
            count = page.messages.len(),
            reached_end = page.reached_end,
            "fetched slack history page"
        );

        Ok(page)
    }
}

fn map_slack_error(channel_id: &str, error: SlackClientError) -> FetchError {
    match error {
        SlackClientError::RateLimitError(rate_limit) => FetchError::RateLimited {
            retry_after: rate_limit.retry_after,
        },
        SlackClientError::ApiError(api_error) => classify_api_error(channel_id, &api_error.code),
        other => FetchError::UpstreamUnavailable(other.to_string()),
    }
}

fn classify_api_error(channel_id: &str, code: &str) -> FetchError {
    match code {
        "channel_not_found" => FetchError::ChannelNotFound {
            channel_id: channel_id.to_string(),
        },
        "ratelimited" => FetchError::RateLimited { retry_after: None },
        "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout" => {
            FetchError::UpstreamUnavailable(code.to_string())
        }
        other => FetchError::Rejected {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_codes_map_to_fetch_errors() {
        assert!(matches!(
            classify_api_error("C1", "channel_not_found"),
            FetchError::ChannelNotFound { channel_id } if channel_id == "C1"
        ));
        assert!(matches!(
            classify_api_error("C1", "ratelimited"),
            FetchError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            classify_api_error("C1", "internal_error"),
            FetchError::UpstreamUnavailable(_)
        ));
        assert!(matches!(
            classify_api_error("C1", "not_in_channel"),
            FetchError::Rejected { reason } if reason == "not_in_channel"
        ));
    }
}

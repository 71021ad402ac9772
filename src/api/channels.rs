use super::state::ApiState;

use crate::archive::{Channel, Message, QueryLimit};
use crate::error::{Error, FetchError};
use crate::export;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const DEFAULT_MESSAGE_LIMIT: u32 = 100;
const MAX_MESSAGE_LIMIT: u32 = 1000;

#[derive(Serialize)]
pub(super) struct ChannelResponse {
    channel_id: String,
    display_name: String,
    cursor: Option<String>,
    message_count: u64,
    registered_at: String,
    updated_at: String,
}

impl ChannelResponse {
    fn new(channel: Channel, message_count: u64) -> Self {
        Self {
            channel_id: channel.channel_id,
            display_name: channel.display_name,
            cursor: channel.cursor.map(|cursor| cursor.as_str().to_string()),
            message_count,
            registered_at: channel.registered_at.to_rfc3339(),
            updated_at: channel.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub(super) struct ChannelsResponse {
    channels: Vec<ChannelResponse>,
}

#[derive(Deserialize)]
pub(super) struct RegisterChannelRequest {
    channel_id: String,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Deserialize)]
pub(super) struct MessagesQuery {
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    offset: u64,
    /// Return every message, ignoring `limit`.
    #[serde(default)]
    all: bool,
}

impl MessagesQuery {
    fn query_limit(&self) -> QueryLimit {
        if self.all {
            QueryLimit::Unbounded
        } else {
            QueryLimit::Bounded(
                self.limit
                    .unwrap_or(DEFAULT_MESSAGE_LIMIT)
                    .clamp(1, MAX_MESSAGE_LIMIT),
            )
        }
    }
}

#[derive(Serialize)]
pub(super) struct MessagesResponse {
    channel_id: String,
    offset: u64,
    total_count: usize,
    messages: Vec<Message>,
}

#[derive(Serialize)]
pub(super) struct ExportResponse {
    message: String,
    path: String,
    total_count: usize,
}

/// List registered channels with their archiving progress.
pub(super) async fn list_channels(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ChannelsResponse>, StatusCode> {
    let store = state.store();
    let channels = store.list_channels().await.map_err(|error| {
        tracing::warn!(%error, "failed to list channels");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut responses = Vec::with_capacity(channels.len());
    for channel in channels {
        let count = store
            .message_count(&channel.channel_id)
            .await
            .map_err(|error| {
                tracing::warn!(%error, channel_id = %channel.channel_id, "failed to count messages");
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
        responses.push(ChannelResponse::new(channel, count));
    }

    Ok(Json(ChannelsResponse {
        channels: responses,
    }))
}

/// Register a channel for archiving, resolving its name upstream when absent.
pub(super) async fn register_channel(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<RegisterChannelRequest>,
) -> Result<(StatusCode, Json<ChannelResponse>), StatusCode> {
    let channel_id = request.channel_id.trim();
    if channel_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let channel = state
        .archiver
        .register_channel(channel_id, request.display_name.as_deref())
        .await
        .map_err(|error| {
            tracing::warn!(%error, channel_id, "failed to register channel");
            match error {
                Error::Fetch(FetchError::ChannelNotFound { .. }) => StatusCode::NOT_FOUND,
                Error::Fetch(_) => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        })?;

    let count = state
        .store()
        .message_count(channel_id)
        .await
        .map_err(|error| {
            tracing::warn!(%error, channel_id, "failed to count messages");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok((StatusCode::CREATED, Json(ChannelResponse::new(channel, count))))
}

/// Archived messages for a channel, ordered by position.
pub(super) async fn channel_messages(
    State(state): State<Arc<ApiState>>,
    Path(channel_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, StatusCode> {
    let store = state.store();
    store
        .get_channel(&channel_id)
        .await
        .map_err(|error| {
            tracing::warn!(%error, %channel_id, "failed to load channel");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::NOT_FOUND)?;

    let messages = store
        .query_messages(&channel_id, query.query_limit(), query.offset)
        .await
        .map_err(|error| {
            tracing::warn!(%error, %channel_id, "failed to query messages");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(MessagesResponse {
        channel_id,
        offset: query.offset,
        total_count: messages.len(),
        messages,
    }))
}

/// Export a channel's full archive to the configured export directory.
pub(super) async fn export_channel(
    State(state): State<Arc<ApiState>>,
    Path(channel_id): Path<String>,
) -> Result<Json<ExportResponse>, StatusCode> {
    let path = export::export_path(&state.export_dir, &channel_id);
    let total_count = export::export_channel(state.store(), &channel_id, &path)
        .await
        .map_err(|error| {
            tracing::warn!(%error, %channel_id, "failed to export channel");
            match error {
                Error::Store(ref store) if store.is_not_found() => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        })?;

    Ok(Json(ExportResponse {
        message: format!("messages have been exported to {}", path.display()),
        path: path.display().to_string(),
        total_count,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::tests::{message, setup_store};
    use crate::archive::{Archiver, ArchiverConfig};
    use crate::fetcher::testing::FakeUpstream;
    use tokio_util::sync::CancellationToken;

    async fn setup_state(export_dir: std::path::PathBuf) -> (Arc<ApiState>, Arc<FakeUpstream>) {
        let store = setup_store().await;
        let upstream = Arc::new(FakeUpstream::new());
        let archiver = Arc::new(Archiver::new(
            store,
            upstream.clone(),
            ArchiverConfig::default(),
        ));
        let state = Arc::new(ApiState::new(
            archiver,
            export_dir,
            CancellationToken::new(),
        ));
        (state, upstream)
    }

    #[tokio::test]
    async fn messages_for_unknown_channel_is_404() {
        let (state, _upstream) = setup_state(std::env::temp_dir()).await;
        let result = channel_messages(
            State(state),
            Path("C404".to_string()),
            Query(MessagesQuery {
                limit: None,
                offset: 0,
                all: false,
            }),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn messages_are_paged_in_order() {
        let (state, _upstream) = setup_state(std::env::temp_dir()).await;
        state
            .store()
            .register_channel("C1", "general")
            .await
            .expect("register");
        state
            .store()
            .upsert_messages_and_advance_cursor(
                "C1",
                &[
                    message("C1", "m3", "30"),
                    message("C1", "m1", "10"),
                    message("C1", "m2", "20"),
                ],
                &"30".into(),
            )
            .await
            .expect("upsert");

        let Json(response) = channel_messages(
            State(state.clone()),
            Path("C1".to_string()),
            Query(MessagesQuery {
                limit: Some(2),
                offset: 1,
                all: false,
            }),
        )
        .await
        .expect("query should succeed");
        let ids: Vec<&str> = response
            .messages
            .iter()
            .map(|m| m.message_id.as_str())
            .collect();
        assert_eq!(ids, vec!["m2", "m3"]);

        let Json(everything) = channel_messages(
            State(state),
            Path("C1".to_string()),
            Query(MessagesQuery {
                limit: Some(1),
                offset: 0,
                all: true,
            }),
        )
        .await
        .expect("query should succeed");
        assert_eq!(everything.total_count, 3);
    }

    #[tokio::test]
    async fn registering_unknown_upstream_channel_is_404() {
        let (state, _upstream) = setup_state(std::env::temp_dir()).await;
        let result = register_channel(
            State(state),
            Json(RegisterChannelRequest {
                channel_id: "C404".to_string(),
                display_name: None,
            }),
        )
        .await;
        assert_eq!(result.err(), Some(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn registering_resolves_display_name() {
        let (state, upstream) = setup_state(std::env::temp_dir()).await;
        upstream.add_channel("C1", "general");

        let (status, Json(channel)) = register_channel(
            State(state),
            Json(RegisterChannelRequest {
                channel_id: "C1".to_string(),
                display_name: None,
            }),
        )
        .await
        .expect("register should succeed");

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(channel.display_name, "general");
        assert!(channel.cursor.is_none());
    }

    #[tokio::test]
    async fn export_writes_file_in_export_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (state, _upstream) = setup_state(dir.path().to_path_buf()).await;
        state
            .store()
            .register_channel("C1", "general")
            .await
            .expect("register");
        state
            .store()
            .upsert_messages_and_advance_cursor("C1", &[message("C1", "m1", "10")], &"10".into())
            .await
            .expect("upsert");

        let Json(response) = export_channel(State(state), Path("C1".to_string()))
            .await
            .expect("export should succeed");

        assert_eq!(response.total_count, 1);
        assert!(dir.path().join("C1_messages.jsonl").exists());
    }
}

use super::state::ApiState;

use crate::archive::RunSummary;
use crate::error::{ArchiveError, Error};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
pub(super) struct ArchiveStatusResponse {
    running: bool,
}

/// Run `archive_all` now and return its summary. Rejected with 409 while
/// another run (scheduled or manual) is in progress.
pub(super) async fn run_archive(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<RunSummary>, StatusCode> {
    let summary = state
        .archiver
        .archive_all(&state.shutdown)
        .await
        .map_err(|error| match error {
            Error::Archive(ArchiveError::AlreadyRunning) => StatusCode::CONFLICT,
            other => {
                tracing::error!(error = %other, "manual archiving run failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        })?;

    Ok(Json(summary))
}

pub(super) async fn archive_status(
    State(state): State<Arc<ApiState>>,
) -> Json<ArchiveStatusResponse> {
    Json(ArchiveStatusResponse {
        running: state.archiver.is_running(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::store::tests::setup_store;
    use crate::archive::{Archiver, ArchiverConfig, FinalState};
    use crate::fetcher::testing::FakeUpstream;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn manual_run_returns_summary() {
        let store = setup_store().await;
        let upstream = Arc::new(FakeUpstream::new());
        upstream.add_channel("C1", "general");
        upstream.post("C1", "m1", "10");
        let archiver = Arc::new(Archiver::new(
            store,
            upstream.clone(),
            ArchiverConfig::default(),
        ));
        archiver.register_channel("C1", None).await.expect("register");
        let state = Arc::new(ApiState::new(
            archiver,
            std::env::temp_dir(),
            CancellationToken::new(),
        ));

        let Json(summary) = run_archive(State(state.clone()))
            .await
            .expect("run should succeed");

        assert_eq!(summary.channels["C1"].final_state, FinalState::Done);
        assert_eq!(summary.messages_added(), 1);

        let Json(status) = archive_status(State(state)).await;
        assert!(!status.running);
    }
}

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::{
    handler::{ApiJsonResult, ApiResult, AppState},
    sink::SaveNotice,
};

pub fn clip_router(state: AppState) -> Router {
    Router::new()
        .route("/save", post(save_clip))
        .route("/game", put(set_game).get(get_game))
        .route("/last", get(last_save))
        .with_state(state)
}

#[derive(Debug, Serialize, Deserialize)]
struct SaveResponse {
    accepted: bool,
    reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GameLabel {
    label: Option<String>,
}

async fn save_clip(State(state): State<AppState>) -> ApiResult<Response> {
    let recorder = Arc::clone(&state.recorder);
    let response = match tokio::task::spawn_blocking(move || recorder.save_clip()).await? {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(SaveResponse {
                accepted: true,
                reason: None,
            }),
        ),
        Err(rejected) => {
            log::info!("save request rejected: {}", rejected);
            (
                StatusCode::CONFLICT,
                Json(SaveResponse {
                    accepted: false,
                    reason: Some(rejected.to_string()),
                }),
            )
        }
    };
    Ok(response.into_response())
}

async fn set_game(
    State(state): State<AppState>,
    Json(req): Json<GameLabel>,
) -> ApiJsonResult<GameLabel> {
    state.recorder.set_context_label(req.label);
    Ok(Json(GameLabel {
        label: state.recorder.context_label(),
    }))
}

async fn get_game(State(state): State<AppState>) -> Json<GameLabel> {
    Json(GameLabel {
        label: state.recorder.context_label(),
    })
}

async fn last_save(State(state): State<AppState>) -> Json<Option<SaveNotice>> {
    Json(state.notices.last())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use replay_bus::engine::OutputSignal;

    use super::*;
    use crate::handler::testing::{app, body_json};

    #[tokio::test]
    async fn test_save_rejected_when_inactive() -> anyhow::Result<()> {
        let app = app()?;

        let response = save_clip(State(app.state.clone())).await.map_err(|e| e.0)?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await?;
        assert_eq!(body["accepted"], false);
        assert_eq!(body["reason"], "replay buffer not active");
        Ok(())
    }

    #[tokio::test]
    async fn test_save_accepted_then_pending() -> anyhow::Result<()> {
        let app = app()?;
        app.state.recorder.open()?;

        let response = save_clip(State(app.state.clone())).await.map_err(|e| e.0)?;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let response = save_clip(State(app.state.clone())).await.map_err(|e| e.0)?;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await?["reason"], "save already in progress");

        app.state.recorder.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_last_save_reports_outcome() -> anyhow::Result<()> {
        let app = app()?;
        app.state.recorder.open()?;
        assert!(last_save(State(app.state.clone())).await.0.is_none());

        let clip = app.dir.path().join("2024-05-01_12-00-00.mp4");
        std::fs::write(&clip, b"clip")?;
        save_clip(State(app.state.clone())).await.map_err(|e| e.0)?;
        let output = app.engine.outputs()[0];
        app.engine.emit(output, OutputSignal::Saved { path: Some(clip.clone()) });

        let notice = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(notice) = app.state.notices.last() {
                    return notice;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await?;
        assert!(notice.success);
        assert_eq!(notice.path, clip);

        let Json(last) = last_save(State(app.state.clone())).await;
        assert_eq!(last, Some(notice));
        app.state.recorder.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_set_game_label() -> anyhow::Result<()> {
        let app = app()?;

        let Json(res) = set_game(
            State(app.state.clone()),
            Json(GameLabel {
                label: Some("Valorant".to_string()),
            }),
        )
        .await
        .map_err(|e| e.0)?;
        assert_eq!(res.label.as_deref(), Some("Valorant"));

        let Json(res) = set_game(
            State(app.state.clone()),
            Json(GameLabel {
                label: Some("   ".to_string()),
            }),
        )
        .await
        .map_err(|e| e.0)?;
        assert_eq!(res.label, None);
        assert_eq!(get_game(State(app.state.clone())).await.0.label, None);
        Ok(())
    }
}

use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use replay_bus::Recorder;

use crate::sink::NotifySink;

pub mod clip;
pub mod system;

pub type ApiResult<T> = Result<T, ApiError>;
pub type ApiJsonResult<T> = ApiResult<Json<T>>;

#[derive(Clone)]
pub struct AppState {
    pub recorder: Arc<Recorder>,
    pub notices: Arc<NotifySink>,
}

pub struct ApiError(anyhow::Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        log::error!("api error: {:#}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "recorder went wrong because of an inner error".to_string(),
        )
            .into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{sync::Arc, time::Duration};

    use replay_bus::{
        Recorder, RecorderConfig, engine::ReplayOutputSettings, fake::FakeEngine,
    };

    use super::AppState;
    use crate::sink::NotifySink;

    pub struct TestApp {
        pub engine: Arc<FakeEngine>,
        pub state: AppState,
        pub dir: tempfile::TempDir,
    }

    pub fn app() -> anyhow::Result<TestApp> {
        let dir = tempfile::tempdir()?;
        let engine = Arc::new(FakeEngine::new());
        let config = RecorderConfig {
            health_interval: Duration::ZERO,
            save_drain_timeout: Duration::from_millis(100),
            replay: ReplayOutputSettings {
                directory: dir.path().to_path_buf(),
                ..Default::default()
            },
            ..Default::default()
        };
        let notices = Arc::new(NotifySink::new());
        let recorder = Recorder::new(engine.clone(), config, notices.clone(), None)?;
        Ok(TestApp {
            engine,
            state: AppState {
                recorder: Arc::new(recorder),
                notices,
            },
            dir,
        })
    }

    pub async fn body_json(response: axum::response::Response) -> anyhow::Result<serde_json::Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use vigil_core::ids::TaskId;
use vigil_core::{ScoreOutput, ScoreRequest, Scorer, ScorerError};

/// Pre-programmed per-task behaviour.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Score { score: f64, confidence: f64 },
    Fail(String),
    /// Sleep, then answer with the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never completes.
    Hang,
}

impl MockResponse {
    pub fn score(score: f64, confidence: f64) -> Self {
        Self::Score { score, confidence }
    }
}

/// Scorer returning scripted responses, for deterministic tests.
pub struct MockScorer {
    responses: Mutex<HashMap<TaskId, MockResponse>>,
    fallback: MockResponse,
    call_count: AtomicUsize,
}

impl MockScorer {
    /// Every task without a scripted response gets `fallback`.
    pub fn new(fallback: MockResponse) -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            fallback,
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with(self, task_id: &str, response: MockResponse) -> Self {
        self.set(task_id, response);
        self
    }

    pub fn set(&self, task_id: &str, response: MockResponse) {
        self.responses.lock().insert(TaskId::from_raw(task_id), response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    async fn respond(response: MockResponse) -> Result<ScoreOutput, ScorerError> {
        let mut response = response;
        loop {
            match response {
                MockResponse::Score { score, confidence } => return Ok(ScoreOutput::new(score, confidence)),
                MockResponse::Fail(reason) => return Err(ScorerError::Unavailable(reason)),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                MockResponse::Hang => return std::future::pending().await,
            }
        }
    }
}

#[async_trait]
impl Scorer for MockScorer {
    fn version(&self) -> &str {
        "mock-v1"
    }

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutput, ScorerError> {
        let _ = self.call_count.fetch_add(1, Ordering::Relaxed);
        let response = self
            .responses
            .lock()
            .get(request.task_id)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone());
        Self::respond(response).await
    }
}

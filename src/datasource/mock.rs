//! Scripted transport for tests.

use super::{GraphSource, SourceError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Replays a queue of scripted responses and records every request.
#[derive(Default)]
pub struct MockGraphSource {
    responses: Mutex<VecDeque<Result<String, SourceError>>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockGraphSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(self, body: impl Into<String>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(body.into()));
        self
    }

    pub fn with_error(self, err: SourceError) -> Self {
        self.responses.lock().unwrap().push_back(Err(err));
        self
    }

    /// All `(target, body)` pairs seen so far.
    pub fn requests(&self) -> Vec<(String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GraphSource for MockGraphSource {
    async fn post(&self, target: &str, body: String) -> Result<String, SourceError> {
        self.requests
            .lock()
            .unwrap()
            .push((target.to_string(), body));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(SourceError::Network("no scripted response".to_string())))
    }
}

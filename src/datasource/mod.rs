//! GraphQL transport layer.

pub mod graphql;
pub mod mock;

pub use graphql::SubgraphClient;
pub use mock::MockGraphSource;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum SourceError {
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP error {status}")]
    Http { status: u16 },
}

/// A POST transport to a GraphQL gateway. `target` is the request path,
/// `body` the serialized `{query}` document.
#[async_trait]
pub trait GraphSource: Send + Sync {
    async fn post(&self, target: &str, body: String) -> Result<String, SourceError>;
}

/// Request path for a subgraph behind the gateway.
pub fn build_target(subgraph_id: &str) -> String {
    format!("/api/subgraphs/id/{}", subgraph_id)
}

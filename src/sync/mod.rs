//! Incremental sync: per-entity executors fanned out per source, driven in
//! periodic rounds by the coordinator, plus the token-id filler job.

pub mod coordinator;
pub mod executor;
pub mod scheduler;
pub mod token_filler;

pub use coordinator::SyncCoordinator;
pub use executor::EntityExecutor;
pub use scheduler::SourceScheduler;
pub use token_filler::TokenFiller;

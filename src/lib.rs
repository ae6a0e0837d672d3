pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod entities;
pub mod error;
pub mod rebuild;
pub mod replay;
pub mod stats;
pub mod sync;

pub use config::Config;
pub use db::Store;
pub use error::AppError;
pub use rebuild::RebuildEngine;
pub use stats::StatsRegistry;

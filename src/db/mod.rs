//! Columnar store adapter.
//!
//! Wraps the embedded analytical engine behind a narrow contract: DDL/DML
//! execution, cursor reads, atomic insert-with-cursor transactions, JSON row
//! queries, and column-chunk scans for the rebuild engine. No other module
//! touches the native library.

pub mod store;

pub use store::{Chunk, Store, StoreError, StoreReader, StoreResult, SyncCursor};

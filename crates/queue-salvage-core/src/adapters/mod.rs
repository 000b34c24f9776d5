//! # Infrastructure Adapters
//!
//! Storage implementations of the staging, session and audit interfaces.

pub mod filesystem_store;
pub mod jsonl_audit;
pub mod memory_store;

pub use filesystem_store::FilesystemStagingStore;
pub use jsonl_audit::JsonLinesAuditWriter;
pub use memory_store::InMemoryStagingStore;

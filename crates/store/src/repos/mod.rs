//! Repository traits for store operations.

pub mod documents;
pub mod jobs;

pub use documents::{BatchReport, DocumentFilter, DocumentRepo, Page, UpsertOutcome};
pub use jobs::JobCacheRepo;

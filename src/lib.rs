//! Kotoba - batch novel translation with consistent names and tone.
//!
//! This library provides functionality for:
//! - Splitting chapters into size-bounded chunks and reassembling them
//! - Translating through an OpenAI-compatible chat API with retries
//! - Keeping character and place names consistent across chapters
//! - Checking that each translated chunk keeps the tone of its source

pub mod archive;
pub mod backend;
pub mod chunker;
pub mod config;
pub mod console;
pub mod emotion;
pub mod error;
pub mod glossary;
pub mod inference;
pub mod job;
pub mod language;
pub mod orchestrator;
pub mod pipeline;
pub mod store;
pub mod terms;
pub mod utils;

// Re-export commonly used types
pub use archive::SourceFile;
pub use backend::ChatBackend;
pub use config::Config;
pub use console::Console;
pub use emotion::EmotionReconciler;
pub use error::{ArchiveError, ChunkError, ConfigError, GlossaryError, InferenceError, StoreError};
pub use glossary::{Glossary, GlossaryEntry, SharedGlossary};
pub use inference::{InferenceBackend, InferenceGateway, RetryPolicy, TranslateRequest};
pub use job::{ChapterStatus, JobHandle, JobStatus, TranslationJob, Warning};
pub use orchestrator::{Document, NovelOrchestrator, OrchestratorOptions};
pub use pipeline::ChapterPipeline;
pub use store::JobStore;
pub use terms::TermReconciler;

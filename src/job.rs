//! Job, chapter and chunk records shared by the pipeline stages.
//!
//! A [`TranslationJob`] is the root aggregate for one translation request.
//! Observers read it through [`Progress`] snapshots; only the orchestrator
//! mutates it.

use crate::glossary::SharedGlossary;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use uuid::Uuid;

/// Classified emotion of a piece of text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionReading {
    /// Label as produced by the classifier (lowercased).
    pub label: String,
    /// Confidence in `label`, 0.0 to 1.0.
    pub score: f32,
}

impl EmotionReading {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into().trim().to_lowercase(),
            score: score.clamp(0.0, 1.0),
        }
    }
}

/// A glossary rewrite applied to a chunk translation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Substitution {
    pub from: String,
    pub to: String,
}

/// A bounded slice of chapter text sent to the model as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Position in the chapter; reassembly never reorders.
    pub index: usize,
    pub source: String,
    /// Text between this chunk and the next one in the original chapter.
    pub separator: String,
    pub translated: Option<String>,
    pub source_emotion: Option<EmotionReading>,
    pub translated_emotion: Option<EmotionReading>,
    pub substitutions: Vec<Substitution>,
}

impl Chunk {
    pub fn new(index: usize, source: String, separator: String) -> Self {
        Self {
            index,
            source,
            separator,
            translated: None,
            source_emotion: None,
            translated_emotion: None,
            substitutions: Vec::new(),
        }
    }

    /// The translation if one was produced, otherwise the source text.
    pub fn final_text(&self) -> &str {
        self.translated.as_deref().unwrap_or(&self.source)
    }
}

/// A recorded, non-fatal degradation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Warning {
    GlossaryConflict {
        term: String,
        chapter: usize,
        chunk: usize,
        rejected: String,
        kept: String,
    },
    EmotionDrift {
        chapter: usize,
        chunk_index: usize,
        source_label: String,
        translated_label: String,
    },
    EmotionUnchecked {
        chapter: usize,
        chunk_index: usize,
        reason: String,
    },
    ChunkUntranslated {
        chapter: usize,
        chunk_index: usize,
        reason: String,
    },
    ChapterFailed {
        chapter: usize,
        reason: String,
    },
    ChapterSkipped {
        chapter: usize,
        reason: String,
    },
}

impl Warning {
    /// Short machine-readable type name.
    pub fn kind(&self) -> &'static str {
        match self {
            Warning::GlossaryConflict { .. } => "glossary_conflict",
            Warning::EmotionDrift { .. } => "emotion_drift",
            Warning::EmotionUnchecked { .. } => "emotion_unchecked",
            Warning::ChunkUntranslated { .. } => "chunk_untranslated",
            Warning::ChapterFailed { .. } => "chapter_failed",
            Warning::ChapterSkipped { .. } => "chapter_skipped",
        }
    }

    pub fn chapter(&self) -> usize {
        match self {
            Warning::GlossaryConflict { chapter, .. }
            | Warning::EmotionDrift { chapter, .. }
            | Warning::EmotionUnchecked { chapter, .. }
            | Warning::ChunkUntranslated { chapter, .. }
            | Warning::ChapterFailed { chapter, .. }
            | Warning::ChapterSkipped { chapter, .. } => *chapter,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::GlossaryConflict {
                term,
                chapter,
                chunk,
                rejected,
                kept,
            } => write!(
                f,
                "chapter {} chunk {}: kept '{}' for '{}', rejected '{}'",
                chapter + 1,
                chunk,
                kept,
                term,
                rejected
            ),
            Warning::EmotionDrift {
                chapter,
                chunk_index,
                source_label,
                translated_label,
            } => write!(
                f,
                "chapter {} chunk {}: tone drifted from {} to {}",
                chapter + 1,
                chunk_index,
                source_label,
                translated_label
            ),
            Warning::EmotionUnchecked {
                chapter,
                chunk_index,
                reason,
            } => write!(
                f,
                "chapter {} chunk {}: tone not checked ({})",
                chapter + 1,
                chunk_index,
                reason
            ),
            Warning::ChunkUntranslated {
                chapter,
                chunk_index,
                reason,
            } => write!(
                f,
                "chapter {} chunk {}: left untranslated ({})",
                chapter + 1,
                chunk_index,
                reason
            ),
            Warning::ChapterFailed { chapter, reason } => {
                write!(f, "chapter {} failed: {}", chapter + 1, reason)
            }
            Warning::ChapterSkipped { chapter, reason } => {
                write!(f, "chapter {} skipped: {}", chapter + 1, reason)
            }
        }
    }
}

/// Coarse chapter status visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Processing,
    Done,
    Failed,
    Skipped,
}

/// Fine-grained position of a chapter in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStage {
    Pending,
    Chunking,
    Translating,
    GlossaryPass,
    EmotionPass,
    Reassembling,
    Done,
    Failed,
    Skipped,
}

/// One chapter of a document and everything produced for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    /// Position in natural file-name order.
    pub index: usize,
    pub name: String,
    /// Raw source; `None` when the file could not be decoded.
    pub source: Option<String>,
    pub chunks: Vec<Chunk>,
    pub translated: Option<String>,
    pub status: ChapterStatus,
    pub stage: ChapterStage,
    pub warnings: Vec<Warning>,
    pub error: Option<String>,
}

impl Chapter {
    pub fn new(index: usize, name: impl Into<String>, source: Option<String>) -> Self {
        Self {
            index,
            name: name.into(),
            source,
            chunks: Vec::new(),
            translated: None,
            status: ChapterStatus::Pending,
            stage: ChapterStage::Pending,
            warnings: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn set_stage(&mut self, stage: ChapterStage) {
        self.stage = stage;
        self.status = match stage {
            ChapterStage::Pending => ChapterStatus::Pending,
            ChapterStage::Done => ChapterStatus::Done,
            ChapterStage::Failed => ChapterStatus::Failed,
            ChapterStage::Skipped => ChapterStatus::Skipped,
            _ => ChapterStatus::Processing,
        };
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.warnings.push(Warning::ChapterFailed {
            chapter: self.index,
            reason: reason.clone(),
        });
        self.error = Some(reason);
        self.set_stage(ChapterStage::Failed);
    }

    pub(crate) fn skip(&mut self, reason: impl Into<String>) {
        self.warnings.push(Warning::ChapterSkipped {
            chapter: self.index,
            reason: reason.into(),
        });
        self.translated = None;
        self.set_stage(ChapterStage::Skipped);
    }
}

/// Overall job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompletedWithWarnings,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithWarnings | JobStatus::Failed
        )
    }
}

/// Why a job ended in [`JobStatus::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Cancelled,
    AllChaptersFailed,
    CorruptArchive,
    NoChapters,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::Cancelled => "cancelled",
            FailureReason::AllChaptersFailed => "all chapters failed",
            FailureReason::CorruptArchive => "corrupt archive",
            FailureReason::NoChapters => "no chapters",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
struct JobState {
    status: JobStatus,
    failure_reason: Option<FailureReason>,
    current_chapter: Option<String>,
}

/// Live progress counters, safe for concurrent writers.
#[derive(Debug)]
pub struct Progress {
    chunks_completed: AtomicUsize,
    chunks_total: AtomicUsize,
    chapters_completed: AtomicUsize,
    chapters_total: AtomicUsize,
    state: Mutex<JobState>,
}

impl Default for Progress {
    fn default() -> Self {
        Self {
            chunks_completed: AtomicUsize::new(0),
            chunks_total: AtomicUsize::new(0),
            chapters_completed: AtomicUsize::new(0),
            chapters_total: AtomicUsize::new(0),
            state: Mutex::new(JobState {
                status: JobStatus::Pending,
                failure_reason: None,
                current_chapter: None,
            }),
        }
    }
}

impl Progress {
    pub(crate) fn set_chapters_total(&self, n: usize) {
        self.chapters_total.store(n, Ordering::SeqCst);
    }

    pub(crate) fn add_chunks_total(&self, n: usize) {
        self.chunks_total.fetch_add(n, Ordering::SeqCst);
    }

    pub(crate) fn chunk_done(&self) {
        self.chunks_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn chapter_done(&self) {
        self.chapters_completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn set_status(&self, status: JobStatus, reason: Option<FailureReason>) {
        let mut state = self.state.lock();
        state.status = status;
        state.failure_reason = reason;
    }

    pub(crate) fn set_current_chapter(&self, name: Option<String>) {
        self.state.lock().current_chapter = name;
    }

    /// Immutable view for observers.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let state = self.state.lock().clone();
        ProgressSnapshot {
            status: state.status,
            failure_reason: state.failure_reason,
            current_chapter: state.current_chapter,
            chunks_completed: self.chunks_completed.load(Ordering::SeqCst),
            chunks_total: self.chunks_total.load(Ordering::SeqCst),
            chapters_completed: self.chapters_completed.load(Ordering::SeqCst),
            chapters_total: self.chapters_total.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of a job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub current_chapter: Option<String>,
    pub chunks_completed: usize,
    /// Grows as chapters are chunked.
    pub chunks_total: usize,
    pub chapters_completed: usize,
    pub chapters_total: usize,
}

impl ProgressSnapshot {
    /// Completed chapters as a percentage.
    pub fn percent(&self) -> f64 {
        if self.chapters_total == 0 {
            return 0.0;
        }
        (self.chapters_completed as f64 / self.chapters_total as f64) * 100.0
    }
}

/// Cooperative cancellation flag, checked between chunks.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Read-only handle for callers observing or cancelling a running job.
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub(crate) progress: Arc<Progress>,
    pub(crate) cancel: CancelToken,
}

impl JobHandle {
    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// The root aggregate of one translation request.
#[derive(Debug)]
pub struct TranslationJob {
    pub id: Uuid,
    /// File name or title of the input.
    pub document: String,
    pub source_lang: String,
    pub target_lang: String,
    pub chapters: Vec<Chapter>,
    pub glossary: SharedGlossary,
    pub status: JobStatus,
    pub failure_reason: Option<FailureReason>,
    pub progress: Arc<Progress>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TranslationJob {
    /// Every warning in chapter order.
    pub fn warnings(&self) -> impl Iterator<Item = &Warning> {
        self.chapters.iter().flat_map(|c| c.warnings.iter())
    }

    pub fn chapter(&self, name: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.name == name)
    }

    /// Downloadable `(file name, text)` pairs in chapter order.
    ///
    /// Done chapters yield their translation. Failed chapters yield their
    /// source when `keep_failed_source` is set. Skipped chapters yield nothing.
    pub fn outputs(&self, keep_failed_source: bool) -> Vec<(String, String)> {
        self.chapters
            .iter()
            .filter_map(|c| match (c.status, &c.translated, &c.source) {
                (ChapterStatus::Done, Some(text), _) => Some((c.name.clone(), text.clone())),
                (ChapterStatus::Failed, _, Some(source)) if keep_failed_source => {
                    Some((c.name.clone(), source.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn count_status(&self, status: ChapterStatus) -> usize {
        self.chapters.iter().filter(|c| c.status == status).count()
    }
}

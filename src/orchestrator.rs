//! Drives every chapter of a document through the pipeline.
//!
//! Chapters are processed in natural file-name order. With one worker each
//! chapter sees every glossary commitment of the chapters before it; with more
//! workers chapters overlap and the glossary only guarantees first-writer-wins.

use crate::archive::{self, SourceFile};
use crate::config::{ArchiveConfig, Config};
use crate::emotion::EmotionReconciler;
use crate::error::ArchiveError;
use crate::glossary::{ExtractionRules, Glossary, SharedGlossary};
use crate::inference::InferenceGateway;
use crate::job::{
    CancelToken, Chapter, ChapterStage, ChapterStatus, FailureReason, JobHandle, JobStatus,
    Progress, TranslationJob,
};
use crate::language::{self, HeuristicDetector, LanguageDetector};
use crate::pipeline::{ChapterPipeline, PipelineContext};
use crate::store::{JobStore, Manifest};
use crate::utils::natural_cmp;
use chrono::Utc;
use futures::StreamExt;
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Leading readable chapters that vote on the source language.
const LANGUAGE_SAMPLE_CHAPTERS: usize = 3;

/// Input to a job: a named document and its chapter files.
#[derive(Debug, Clone)]
pub struct Document {
    pub name: String,
    pub files: Vec<SourceFile>,
}

/// Whether `path` names a zip archive rather than a single chapter.
pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

impl Document {
    /// Read a zip of chapter files, or a single chapter file.
    pub fn open(path: &Path, config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let files = if is_archive(path) {
            archive::read_zip(path, config)?
        } else {
            vec![archive::read_text_file(path, config)?]
        };
        Ok(Self { name, files })
    }
}

/// Job-level knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub target_lang: String,
    /// Declared source language; detected from the leading chapters when `None`.
    pub source_lang: Option<String>,
    pub default_source_lang: String,
    pub detection_threshold: f32,
    pub max_chunk_chars: usize,
    /// Chapters in flight at once. Forced to 1 for serial backends.
    pub workers: usize,
    /// Wall-clock budget for the whole job.
    pub deadline: Option<Duration>,
}

impl OrchestratorOptions {
    pub fn new(target_lang: impl Into<String>) -> Self {
        Self {
            target_lang: target_lang.into(),
            source_lang: None,
            default_source_lang: "ja".to_string(),
            detection_threshold: 0.5,
            max_chunk_chars: 2000,
            workers: 1,
            deadline: None,
        }
    }

    pub fn from_config(config: &Config, target_lang: impl Into<String>) -> Self {
        Self {
            target_lang: target_lang.into(),
            source_lang: None,
            default_source_lang: config.language.default_source.clone(),
            detection_threshold: config.language.detection_threshold,
            max_chunk_chars: config.translation.chunk_size_chars,
            workers: config.job.workers,
            deadline: config.job.deadline_sec.map(Duration::from_secs),
        }
    }
}

pub struct NovelOrchestrator {
    gateway: InferenceGateway,
    emotion: Option<EmotionReconciler>,
    detector: Box<dyn LanguageDetector>,
    glossary: SharedGlossary,
    store: Option<JobStore>,
    options: OrchestratorOptions,
    progress: Arc<Progress>,
    cancel: CancelToken,
}

impl NovelOrchestrator {
    /// Orchestrator with an empty glossary, tone checking on (two
    /// re-translations) and the heuristic language detector.
    pub fn new(gateway: InferenceGateway, options: OrchestratorOptions) -> Self {
        Self {
            emotion: Some(EmotionReconciler::new(gateway.clone(), 2)),
            gateway,
            detector: Box::new(HeuristicDetector),
            glossary: Glossary::default().into_shared(),
            store: None,
            options,
            progress: Arc::new(Progress::default()),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the emotion reconciler; `None` disables the emotion pass.
    pub fn with_emotion(mut self, emotion: Option<EmotionReconciler>) -> Self {
        self.emotion = emotion;
        self
    }

    pub fn with_detector(mut self, detector: Box<dyn LanguageDetector>) -> Self {
        self.detector = detector;
        self
    }

    /// Start from an existing (for example seeded) glossary.
    pub fn with_glossary(mut self, glossary: Glossary) -> Self {
        self.glossary = glossary.into_shared();
        self
    }

    /// Persist progress after every chapter and resume from it.
    pub fn with_store(mut self, store: JobStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Handle for observing progress or cancelling from another task.
    pub fn handle(&self) -> JobHandle {
        JobHandle {
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn glossary(&self) -> SharedGlossary {
        self.glossary.clone()
    }

    fn rules(&self) -> ExtractionRules {
        self.glossary.lock().rules()
    }

    /// Translate every chapter of `document`.
    ///
    /// Never returns an error: per-chapter problems become warnings and
    /// job-level problems become [`JobStatus::Failed`] with a reason.
    pub async fn run(&self, document: Document) -> TranslationJob {
        let created_at = Utc::now();
        let mut files = document.files;
        files.sort_by(|a, b| natural_cmp(&a.name, &b.name));

        let samples: Vec<&str> = files
            .iter()
            .filter_map(|f| f.text.as_deref())
            .take(LANGUAGE_SAMPLE_CHAPTERS)
            .collect();
        let source_lang = language::resolve_source_language(
            self.options.source_lang.as_deref(),
            &samples,
            self.detector.as_ref(),
            self.options.detection_threshold,
            &self.options.default_source_lang,
        );
        let target_lang = self.options.target_lang.clone();

        let mut job = TranslationJob {
            id: Uuid::new_v4(),
            document: document.name,
            source_lang,
            target_lang,
            chapters: files
                .into_iter()
                .enumerate()
                .map(|(i, f)| Chapter::new(i, f.name, f.text))
                .collect(),
            glossary: self.glossary.clone(),
            status: JobStatus::Running,
            failure_reason: None,
            progress: self.progress.clone(),
            created_at,
            started_at: Some(Utc::now()),
            finished_at: None,
        };
        self.progress.set_status(JobStatus::Running, None);
        self.progress.set_chapters_total(job.chapters.len());

        if job.chapters.is_empty() {
            warn!("{} has no chapters", job.document);
            return self.finish(job, JobStatus::Failed, Some(FailureReason::NoChapters));
        }
        info!(
            "Translating {} ({} chapters) from {} to {}",
            job.document,
            job.chapters.len(),
            language::display_name(&job.source_lang),
            language::display_name(&job.target_lang)
        );

        if language::same_language(&job.source_lang, &job.target_lang) {
            info!(
                "{} is already in {}, passing chapters through",
                job.document,
                language::display_name(&job.target_lang)
            );
            for chapter in &mut job.chapters {
                match chapter.source.clone() {
                    Some(text) => {
                        chapter.translated = Some(text);
                        chapter.set_stage(ChapterStage::Done);
                    }
                    None => chapter.fail("not valid UTF-8 text"),
                }
                self.progress.chapter_done();
            }
            let (status, reason) = final_status(&job, false);
            return self.finish(job, status, reason);
        }

        let mut manifest = self.resume(&mut job);

        let workers = if self.gateway.is_concurrent() {
            self.options.workers.max(1)
        } else {
            if self.options.workers > 1 {
                info!(
                    "Backend {} is not concurrency-safe, using one worker",
                    self.gateway.backend_name()
                );
            }
            1
        };

        let ctx = PipelineContext {
            gateway: self.gateway.clone(),
            glossary: self.glossary.clone(),
            emotion: self.emotion.clone(),
            cancel: self.cancel.clone(),
            deadline: self.options.deadline.map(|d| Instant::now() + d),
            progress: self.progress.clone(),
            source_lang: job.source_lang.clone(),
            target_lang: job.target_lang.clone(),
            max_chunk_chars: self.options.max_chunk_chars,
        };
        let pipeline = ChapterPipeline::new(Arc::new(ctx));

        let (done, pending): (Vec<Chapter>, Vec<Chapter>) = std::mem::take(&mut job.chapters)
            .into_iter()
            .partition(|c| c.status == ChapterStatus::Done);

        let mut chapters = done;
        let mut results = futures::stream::iter(pending.into_iter().map(|c| pipeline.run(c)))
            .buffered(workers);
        while let Some(chapter) = results.next().await {
            match chapter.status {
                ChapterStatus::Done | ChapterStatus::Failed => self.progress.chapter_done(),
                _ => {}
            }
            info!(
                "Chapter {} ({}) {:?} with {} warnings",
                chapter.index + 1,
                chapter.name,
                chapter.status,
                chapter.warnings.len()
            );
            if let (Some(store), Some(manifest)) = (&self.store, manifest.as_mut()) {
                let glossary = self.glossary.lock();
                if let Err(e) = store.save_chapter(manifest, &chapter, &glossary) {
                    warn!("Could not persist chapter {}: {}", chapter.name, e);
                }
            }
            chapters.push(chapter);
        }

        chapters.sort_by_key(|c| c.index);
        job.chapters = chapters;

        let (status, reason) = final_status(&job, self.cancel.is_cancelled());
        self.finish(job, status, reason)
    }

    /// A job that failed before any chapter could be read.
    pub fn rejected(&self, document: &str, reason: FailureReason) -> TranslationJob {
        let now = Utc::now();
        let job = TranslationJob {
            id: Uuid::new_v4(),
            document: document.to_string(),
            source_lang: self
                .options
                .source_lang
                .clone()
                .unwrap_or_else(|| self.options.default_source_lang.clone()),
            target_lang: self.options.target_lang.clone(),
            chapters: Vec::new(),
            glossary: self.glossary.clone(),
            status: JobStatus::Pending,
            failure_reason: None,
            progress: self.progress.clone(),
            created_at: now,
            started_at: Some(now),
            finished_at: None,
        };
        self.finish(job, JobStatus::Failed, Some(reason))
    }

    /// Load prior state from the store, if any, and mark finished chapters.
    ///
    /// Returns the manifest to keep updating, or `None` without a store.
    fn resume(&self, job: &mut TranslationJob) -> Option<Manifest> {
        let store = self.store.as_ref()?;

        let previous = match store.load_manifest() {
            Ok(m) => m,
            Err(e) => {
                warn!("Ignoring unreadable job state: {}", e);
                None
            }
        };

        let Some(manifest) = previous.filter(|m| {
            m.matches(&job.document, &job.source_lang, &job.target_lang)
        }) else {
            if let Err(e) = store.reset() {
                warn!("Could not clear job state: {}", e);
            }
            return Some(Manifest::new(
                job.id,
                &job.document,
                &job.source_lang,
                &job.target_lang,
            ));
        };

        match store.load_glossary(self.rules()) {
            Ok(Some(restored)) => {
                info!("Restored glossary with {} terms", restored.len());
                *self.glossary.lock() = restored;
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring unreadable glossary snapshot: {}", e),
        }

        job.id = manifest.job_id;
        let mut resumed = 0;
        for chapter in &mut job.chapters {
            let Some(record) = manifest.record(&chapter.name) else {
                continue;
            };
            if record.status != ChapterStatus::Done {
                continue;
            }
            match store.load_chapter(&chapter.name) {
                Ok(Some(text)) => {
                    chapter.translated = Some(text);
                    chapter.warnings = record.warnings.clone();
                    chapter.set_stage(ChapterStage::Done);
                    self.progress.chapter_done();
                    resumed += 1;
                }
                Ok(None) => debug!("No stored text for {}, translating again", chapter.name),
                Err(e) => warn!("Could not read stored {}: {}", chapter.name, e),
            }
        }
        if resumed > 0 {
            info!("Resuming: {} of {} chapters already done", resumed, job.chapters.len());
        }
        Some(manifest)
    }

    fn finish(
        &self,
        mut job: TranslationJob,
        status: JobStatus,
        reason: Option<FailureReason>,
    ) -> TranslationJob {
        job.status = status;
        job.failure_reason = reason;
        job.finished_at = Some(Utc::now());
        self.progress.set_current_chapter(None);
        self.progress.set_status(status, reason);
        match reason {
            Some(reason) => warn!("Job {} failed: {}", job.id, reason),
            None => info!("Job {} finished: {:?}", job.id, status),
        }
        job
    }
}

/// Terminal status once every chapter has been attempted.
fn final_status(job: &TranslationJob, cancelled: bool) -> (JobStatus, Option<FailureReason>) {
    if cancelled {
        return (JobStatus::Failed, Some(FailureReason::Cancelled));
    }
    if job.count_status(ChapterStatus::Failed) == job.chapters.len() {
        return (JobStatus::Failed, Some(FailureReason::AllChaptersFailed));
    }
    if job.warnings().next().is_some() {
        (JobStatus::CompletedWithWarnings, None)
    } else {
        (JobStatus::Completed, None)
    }
}

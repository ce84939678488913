//! The per-chapter stage machine:
//! chunk, translate, reconcile glossary terms, check tone, reassemble.
//!
//! A chunk that cannot be translated keeps its source text and the chapter
//! carries on. Only an unreadable or empty chapter fails outright.

use crate::chunker;
use crate::emotion::EmotionReconciler;
use crate::glossary::SharedGlossary;
use crate::inference::{InferenceGateway, TranslateRequest};
use crate::job::{CancelToken, Chapter, ChapterStage, Progress, Warning};
use crate::terms::TermReconciler;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Everything a chapter needs from its job.
pub struct PipelineContext {
    pub gateway: InferenceGateway,
    pub glossary: SharedGlossary,
    /// `None` skips the emotion pass.
    pub emotion: Option<EmotionReconciler>,
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
    pub progress: Arc<Progress>,
    pub source_lang: String,
    pub target_lang: String,
    pub max_chunk_chars: usize,
}

/// Why a chapter stopped early.
fn interruption(ctx: &PipelineContext) -> Option<&'static str> {
    if ctx.cancel.is_cancelled() {
        return Some("cancelled");
    }
    match ctx.deadline {
        Some(deadline) if Instant::now() >= deadline => Some("deadline reached"),
        _ => None,
    }
}

/// Runs chapters through the stages.
pub struct ChapterPipeline {
    ctx: Arc<PipelineContext>,
}

impl ChapterPipeline {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    fn request(&self, text: &str) -> TranslateRequest {
        TranslateRequest::new(text, &self.ctx.source_lang, &self.ctx.target_lang)
    }

    /// Take a chapter from `Pending` to `Done`, `Failed` or `Skipped`.
    pub async fn run(&self, mut chapter: Chapter) -> Chapter {
        let ctx = &self.ctx;
        ctx.progress.set_current_chapter(Some(chapter.name.clone()));

        if let Some(reason) = interruption(ctx) {
            chapter.skip(reason);
            return chapter;
        }

        // Chunking
        chapter.set_stage(ChapterStage::Chunking);
        let Some(source) = chapter.source.as_deref() else {
            warn!("Chapter {} is not readable text", chapter.name);
            chapter.fail("not valid UTF-8 text");
            return chapter;
        };
        match chunker::split(source, ctx.max_chunk_chars) {
            Ok(chunks) => chapter.chunks = chunks,
            Err(e) => {
                warn!("Chapter {} cannot be chunked: {}", chapter.name, e);
                chapter.fail(e.to_string());
                return chapter;
            }
        }
        ctx.progress.add_chunks_total(chapter.chunks.len());
        info!(
            "Chapter {} ({}): {} chunks",
            chapter.index + 1,
            chapter.name,
            chapter.chunks.len()
        );

        // Chunks that reached the glossary pass with a translation
        let mut translated = vec![false; chapter.chunks.len()];

        chapter.set_stage(ChapterStage::Translating);
        for (i, chunk) in chapter.chunks.iter_mut().enumerate() {
            if let Some(reason) = interruption(ctx) {
                chapter.skip(reason);
                return chapter;
            }
            if chunk.source.trim().is_empty() {
                chunk.translated = Some(chunk.source.clone());
                ctx.progress.chunk_done();
                continue;
            }
            match ctx.gateway.translate(&self.request(&chunk.source)).await {
                Ok(text) => {
                    chunk.translated = Some(text);
                    translated[i] = true;
                }
                Err(e) => {
                    warn!(
                        "Chapter {} chunk {} left untranslated: {}",
                        chapter.index + 1,
                        i,
                        e
                    );
                    chapter.warnings.push(Warning::ChunkUntranslated {
                        chapter: chapter.index,
                        chunk_index: i,
                        reason: e.to_string(),
                    });
                    ctx.progress.chunk_done();
                }
            }
        }

        chapter.set_stage(ChapterStage::GlossaryPass);
        let terms = TermReconciler::new(ctx.gateway.clone(), ctx.glossary.clone());
        for i in 0..chapter.chunks.len() {
            if !translated[i] {
                continue;
            }
            if let Some(reason) = interruption(ctx) {
                chapter.skip(reason);
                return chapter;
            }
            let chunk = &mut chapter.chunks[i];
            let translation = chunk.translated.take().unwrap_or_default();
            let pass = terms
                .reconcile_chunk(&self.request(&chunk.source), &translation, chapter.index, i)
                .await;
            chunk.translated = Some(pass.text);
            chunk.substitutions = pass.substitutions;
            chapter.warnings.extend(pass.warnings);
        }

        chapter.set_stage(ChapterStage::EmotionPass);
        for i in 0..chapter.chunks.len() {
            if !translated[i] {
                continue;
            }
            if let Some(reason) = interruption(ctx) {
                chapter.skip(reason);
                return chapter;
            }
            if let Some(reconciler) = &ctx.emotion {
                let chunk = &mut chapter.chunks[i];
                let text = chunk.translated.clone().unwrap_or_default();
                let outcome = reconciler
                    .reconcile(
                        chapter.index,
                        i,
                        &self.request(&chunk.source),
                        text,
                        std::mem::take(&mut chunk.substitutions),
                        &terms,
                    )
                    .await;
                chapter.warnings.extend(outcome.term_warnings);
                chunk.translated = Some(outcome.text);
                chunk.substitutions = outcome.substitutions;
                chunk.source_emotion = outcome.source;
                chunk.translated_emotion = outcome.translated;
                if let Some(warning) = outcome.warning {
                    chapter.warnings.push(warning);
                }
            }
            ctx.progress.chunk_done();
        }

        chapter.set_stage(ChapterStage::Reassembling);
        chapter.translated = Some(chunker::reassemble(&chapter.chunks));
        chapter.set_stage(ChapterStage::Done);
        debug!(
            "Chapter {} done with {} warnings",
            chapter.name,
            chapter.warnings.len()
        );
        chapter
    }
}

//! Kotoba CLI - translate a novel archive chapter by chapter.

use anyhow::{Context, Result};
use clap::Parser;
use kotoba::archive;
use kotoba::config::Config;
use kotoba::console::Console;
use kotoba::emotion::EmotionReconciler;
use kotoba::error::ArchiveError;
use kotoba::glossary::{ExtractionRules, Glossary};
use kotoba::job::{FailureReason, JobHandle, JobStatus, TranslationJob};
use kotoba::orchestrator::{self, Document, NovelOrchestrator, OrchestratorOptions};
use kotoba::store::JobStore;
use kotoba::{ChatBackend, InferenceGateway, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Translate a zip of chapter files (or a single text file) with consistent
/// names and tone.
#[derive(Parser, Debug)]
#[command(name = "kotoba")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Zip archive of chapter files, or a single .txt/.md chapter.
    input: PathBuf,

    /// Target language (ISO 639-1 or 639-3 code).
    #[arg(short, long)]
    target: String,

    /// Source language; detected from the first chapter when omitted.
    #[arg(short, long)]
    source: Option<String>,

    /// Output file (defaults to <output_directory>/<name>_<target>.<ext>).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// JSON file of {"term": "translation"} seeds.
    #[arg(long)]
    glossary: Option<PathBuf>,

    /// Where to write the final glossary.
    #[arg(long)]
    glossary_out: Option<PathBuf>,

    /// Directory for resumable job state.
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Start from scratch instead of resuming.
    #[arg(long)]
    no_resume: bool,

    /// Chapters translated at once.
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    workers: Option<u32>,

    /// Stop starting new work after this many seconds.
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Skip the tone check.
    #[arg(long)]
    no_emotion: bool,

    /// Include the source text of failed chapters in the output.
    #[arg(long)]
    keep_failed_source: bool,

    /// Config file (defaults to the platform config directory).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&args.log_level))
        .init();
    let console = Console::new();

    console.section("Kotoba - Novel Translator");

    console.step("Loading configuration...");
    let mut config = match &args.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    if !config.api.is_configured() {
        let config_path = match &args.config {
            Some(path) => path.clone(),
            None => Config::config_path()?,
        };
        console.warning(&format!(
            "API key not configured. Please edit: {}",
            config_path.display()
        ));
        console.info("Set your OpenAI-compatible API key in the config file and run again.");
        return Ok(());
    }

    if let Some(workers) = args.workers {
        config.job.workers = workers as usize;
    }
    if let Some(secs) = args.deadline_secs {
        config.job.deadline_sec = Some(secs);
    }
    if args.no_emotion {
        config.emotion.enabled = false;
    }
    config.validate().context("Invalid configuration")?;
    console.success("Configuration loaded");

    console.step(&format!("Reading {}...", args.input.display()));
    let name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.input.display().to_string());
    let loaded = match Document::open(&args.input, &config.archive) {
        Ok(document) => {
            console.success(&format!(
                "Found {} chapters",
                console.count(document.files.len())
            ));
            Ok(document)
        }
        Err(ArchiveError::Io(e)) => {
            return Err(e).with_context(|| format!("Failed to read {}", args.input.display()));
        }
        Err(ArchiveError::NoChapters) => Err(FailureReason::NoChapters),
        Err(e) => {
            console.error(&e.to_string());
            Err(FailureReason::CorruptArchive)
        }
    };

    let backend = ChatBackend::from_config(&config).context("Failed to set up the API client")?;
    let gateway = InferenceGateway::new(
        Arc::new(backend),
        RetryPolicy::from_config(&config.translation),
    );

    let mut glossary = Glossary::new(ExtractionRules::from(&config.glossary));
    if let Some(seed) = args.glossary.as_ref().or(config.glossary.seed_file.as_ref()) {
        let n = glossary
            .load_seed_file(seed)
            .with_context(|| format!("Failed to load glossary seeds from {}", seed.display()))?;
        console.info(&format!("Seeded {} glossary terms", n));
    }

    let mut options = OrchestratorOptions::from_config(&config, &args.target);
    options.source_lang = args.source.clone();

    let mut orchestrator = NovelOrchestrator::new(gateway.clone(), options)
        .with_emotion(EmotionReconciler::from_config(gateway, &config.emotion))
        .with_glossary(glossary);

    if !args.no_resume && loaded.is_ok() {
        let state_dir = match &args.state_dir {
            Some(dir) => dir.clone(),
            None => config.state_dir()?,
        };
        let store = JobStore::for_document(&state_dir, &name)
            .context("Failed to open job state directory")?;
        console.info(&format!(
            "Job state: {}",
            console.muted(&store.root().display().to_string())
        ));
        orchestrator = orchestrator.with_store(store);
    }

    let handle = orchestrator.handle();
    let cancel = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted, finishing in-flight work");
            cancel.cancel();
        }
    });
    let reporter = tokio::spawn(report_progress(handle, Console::new()));

    let job = match loaded {
        Ok(document) => {
            console.step("Translating...");
            let job = orchestrator.run(document).await;
            console.clear_line();
            println!();
            job
        }
        Err(reason) => orchestrator.rejected(&name, reason),
    };
    reporter.abort();

    console.report(&job);
    write_outputs(&console, &args, &config, &job, &name)?;

    if job.status == JobStatus::Failed {
        let reason = job
            .failure_reason
            .map(|r| r.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        anyhow::bail!("Translation failed: {}", reason);
    }

    console.section("Done!");
    Ok(())
}

async fn report_progress(handle: JobHandle, console: Console) {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        let snapshot = handle.progress();
        if snapshot.status.is_terminal() {
            break;
        }
        console.progress_update(&console.progress_line(&snapshot));
    }
}

fn write_outputs(
    console: &Console,
    args: &Args,
    config: &Config,
    job: &TranslationJob,
    name: &str,
) -> Result<()> {
    let stem = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let out_dir = &config.paths.output_directory;

    let outputs = job.outputs(config.job.keep_failed_source || args.keep_failed_source);
    if outputs.is_empty() {
        console.warning("No chapters to write");
    } else if orchestrator::is_archive(&args.input) {
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| out_dir.join(format!("{}_{}.zip", stem, job.target_lang)));
        archive::write_zip(&path, &outputs)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        console.success(&format!("Wrote {}", path.display()));
    } else {
        let ext = Path::new(name)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "txt".to_string());
        let path = args
            .output
            .clone()
            .unwrap_or_else(|| out_dir.join(format!("{}_{}.{}", stem, job.target_lang, ext)));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let text: String = outputs.into_iter().map(|(_, text)| text).collect();
        std::fs::write(&path, text)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        console.success(&format!("Wrote {}", path.display()));
    }

    let glossary_path = args
        .glossary_out
        .clone()
        .unwrap_or_else(|| out_dir.join(format!("{}_{}.glossary.json", stem, job.target_lang)));
    let glossary = job.glossary.lock();
    if !glossary.is_empty() {
        glossary
            .save_to(&glossary_path)
            .with_context(|| format!("Failed to write {}", glossary_path.display()))?;
        let stats = glossary.stats();
        console.info(&format!(
            "Glossary: {} terms, {} conflicted -> {}",
            console.count(stats.total_terms),
            stats.conflicted_terms,
            glossary_path.display()
        ));
    }
    Ok(())
}

//! Console output formatting with ANSI color support.
//!
//! Provides styled terminal output with automatic TTY detection
//! and respect for the NO_COLOR environment variable.

use crate::job::{Chapter, ChapterStatus, JobStatus, ProgressSnapshot, TranslationJob};
use std::collections::BTreeMap;
use std::io::{self, IsTerminal, Write};

/// ANSI style codes for terminal formatting.
#[derive(Debug, Clone, Copy)]
pub enum Style {
    Bold,
    Dim,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    Gray,
}

impl Style {
    fn code(self) -> &'static str {
        match self {
            Style::Bold => "1",
            Style::Dim => "2",
            Style::Red => "31",
            Style::Green => "32",
            Style::Yellow => "33",
            Style::Blue => "34",
            Style::Magenta => "35",
            Style::Cyan => "36",
            Style::Gray => "90",
        }
    }
}

const RESET: &str = "\x1b[0m";

/// Console output handler with color support detection.
#[derive(Debug)]
pub struct Console {
    colors_enabled: bool,
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl Console {
    /// Colors are disabled when `NO_COLOR` is set or stdout is not a TTY.
    pub fn new() -> Self {
        let colors_enabled = std::env::var("NO_COLOR").is_err() && io::stdout().is_terminal();

        Self { colors_enabled }
    }

    pub fn with_colors(enabled: bool) -> Self {
        Self {
            colors_enabled: enabled,
        }
    }

    /// Applies ANSI styles to text if colors are enabled.
    pub fn style(&self, text: &str, styles: &[Style]) -> String {
        if !self.colors_enabled || styles.is_empty() {
            return text.to_string();
        }

        let codes: Vec<&str> = styles.iter().map(|s| s.code()).collect();
        format!("\x1b[{}m{}{}", codes.join(";"), text, RESET)
    }

    /// Creates a colored label like `[INFO]`.
    pub fn label(&self, label: &str, color: Style) -> String {
        let styled = self.style(label, &[color, Style::Bold]);
        format!("[{}]", styled)
    }

    pub fn info(&self, message: &str) {
        println!("{} {}", self.label("INFO", Style::Blue), message);
    }

    pub fn success(&self, message: &str) {
        println!("{} {}", self.label("OK", Style::Green), message);
    }

    pub fn warning(&self, message: &str) {
        println!("{} {}", self.label("WARN", Style::Yellow), message);
    }

    pub fn error(&self, message: &str) {
        eprintln!("{} {}", self.label("ERROR", Style::Red), message);
    }

    pub fn step(&self, message: &str) {
        println!("{} {}", self.label("STEP", Style::Cyan), message);
    }

    /// Prints a section header in magenta bold.
    pub fn section(&self, message: &str) {
        println!();
        println!("{}", self.style(message, &[Style::Magenta, Style::Bold]));
    }

    pub fn muted(&self, text: &str) -> String {
        self.style(text, &[Style::Gray, Style::Dim])
    }

    /// Clears the current line (for progress updates).
    pub fn clear_line(&self) {
        if self.colors_enabled {
            print!("\r\x1b[2K");
            let _ = io::stdout().flush();
        }
    }

    /// Prints a progress update on the same line.
    pub fn progress_update(&self, message: &str) {
        self.clear_line();
        print!("{} {}", self.label("..", Style::Cyan), message);
        let _ = io::stdout().flush();
    }

    pub fn count(&self, n: usize) -> String {
        self.style(&n.to_string(), &[Style::Green, Style::Bold])
    }

    /// One-line summary of a progress snapshot.
    pub fn progress_line(&self, snapshot: &ProgressSnapshot) -> String {
        let mut line = format!(
            "{:>5.1}% chapters {}/{} chunks {}/{}",
            snapshot.percent(),
            snapshot.chapters_completed,
            snapshot.chapters_total,
            snapshot.chunks_completed,
            snapshot.chunks_total
        );
        if let Some(current) = &snapshot.current_chapter {
            line.push(' ');
            line.push_str(&self.muted(current));
        }
        line
    }

    /// Final state of one chapter, e.g. `[OK] ch1.txt (2 warnings)`.
    pub fn chapter_line(&self, chapter: &Chapter) -> String {
        let label = match chapter.status {
            ChapterStatus::Done => self.label("OK", Style::Green),
            ChapterStatus::Failed => self.label("FAILED", Style::Red),
            ChapterStatus::Skipped => self.label("SKIPPED", Style::Yellow),
            ChapterStatus::Pending | ChapterStatus::Processing => self.label("..", Style::Gray),
        };
        let mut line = format!("{} {}", label, chapter.name);
        match (chapter.status, &chapter.error) {
            (ChapterStatus::Failed, Some(error)) => {
                line.push_str(&format!(" {}", self.muted(&format!("({})", error))));
            }
            _ if !chapter.warnings.is_empty() => {
                let n = chapter.warnings.len();
                let text = format!("({} warning{})", n, if n == 1 { "" } else { "s" });
                line.push_str(&format!(" {}", self.muted(&text)));
            }
            _ => {}
        }
        line
    }

    /// Warning counts by kind, e.g. `glossary_conflict: 3`.
    pub fn warning_summary(&self, job: &TranslationJob) -> Vec<String> {
        let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
        for warning in job.warnings() {
            *counts.entry(warning.kind()).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .map(|(kind, n)| format!("{}: {}", kind, self.count(n)))
            .collect()
    }

    /// Prints per-chapter results, the warning summary and the job status.
    pub fn report(&self, job: &TranslationJob) {
        self.section("Chapters");
        for chapter in &job.chapters {
            println!("{}", self.chapter_line(chapter));
        }

        let summary = self.warning_summary(job);
        if !summary.is_empty() {
            self.section("Warnings");
            for line in summary {
                println!("  {}", line);
            }
        }

        let done = job.count_status(ChapterStatus::Done);
        let total = job.chapters.len();
        match job.status {
            JobStatus::Completed => {
                self.success(&format!("Translated {}/{} chapters", done, total))
            }
            JobStatus::CompletedWithWarnings => self.warning(&format!(
                "Translated {}/{} chapters with warnings",
                done, total
            )),
            JobStatus::Failed => {
                let reason = job
                    .failure_reason
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                self.error(&format!(
                    "Job failed ({}); {}/{} chapters translated",
                    reason, done, total
                ))
            }
            JobStatus::Pending | JobStatus::Running => {}
        }
    }
}

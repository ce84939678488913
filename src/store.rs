//! Resumable job state on disk.
//!
//! Layout of a job directory:
//!
//! ```text
//! <root>/manifest.json   job identity, languages, per-chapter status
//! <root>/glossary.json   glossary snapshot after the last finished chapter
//! <root>/chapters/<name> translated chapter text
//! ```
//!
//! Every write goes to a temporary file that is then renamed over the target,
//! so a crash never leaves a half-written file behind.

use crate::error::StoreError;
use crate::glossary::{ExtractionRules, Glossary};
use crate::job::{Chapter, ChapterStatus, Warning};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const GLOSSARY_FILE: &str = "glossary.json";
const CHAPTERS_DIR: &str = "chapters";

/// Persisted status of one chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChapterRecord {
    pub index: usize,
    pub name: String,
    pub status: ChapterStatus,
    #[serde(default)]
    pub warnings: Vec<Warning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Job-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub job_id: Uuid,
    pub document: String,
    pub source_lang: String,
    pub target_lang: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub chapters: Vec<ChapterRecord>,
}

impl Manifest {
    pub fn new(job_id: Uuid, document: &str, source_lang: &str, target_lang: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id,
            document: document.to_string(),
            source_lang: source_lang.to_string(),
            target_lang: target_lang.to_string(),
            created_at: now,
            updated_at: now,
            chapters: Vec::new(),
        }
    }

    /// Whether this manifest describes the same document and language pair.
    pub fn matches(&self, document: &str, source_lang: &str, target_lang: &str) -> bool {
        self.document == document && self.source_lang == source_lang && self.target_lang == target_lang
    }

    pub fn record(&self, name: &str) -> Option<&ChapterRecord> {
        self.chapters.iter().find(|c| c.name == name)
    }

    /// Insert or replace the record for `chapter`.
    pub fn upsert(&mut self, chapter: &Chapter) {
        let record = ChapterRecord {
            index: chapter.index,
            name: chapter.name.clone(),
            status: chapter.status,
            warnings: chapter.warnings.clone(),
            error: chapter.error.clone(),
        };
        match self.chapters.iter_mut().find(|c| c.name == chapter.name) {
            Some(existing) => *existing = record,
            None => {
                self.chapters.push(record);
                self.chapters.sort_by_key(|c| c.index);
            }
        }
        self.updated_at = Utc::now();
    }
}

/// File name safe for the chapters directory.
///
/// Percent-escapes `%` and both path separators so distinct chapter names
/// always map to distinct files.
fn chapter_file_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            '%' => escaped.push_str("%25"),
            '/' => escaped.push_str("%2F"),
            '\\' => escaped.push_str("%5C"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Write `content` to `path` via a sibling temp file and rename.
fn write_atomic(path: &Path, content: &[u8]) -> Result<(), StoreError> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Directory-backed store for one job.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open (creating if needed) the job directory at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(root.join(CHAPTERS_DIR))?;
        Ok(Self { root })
    }

    /// Store for `document` under a shared state directory.
    pub fn for_document(state_dir: &Path, document: &str) -> Result<Self, StoreError> {
        let stem = Path::new(document)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| document.to_string());
        Self::open(state_dir.join(chapter_file_name(&stem)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chapter_path(&self, name: &str) -> PathBuf {
        self.root.join(CHAPTERS_DIR).join(chapter_file_name(name))
    }

    pub fn load_manifest(&self) -> Result<Option<Manifest>, StoreError> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(manifest)?;
        write_atomic(&self.root.join(MANIFEST_FILE), content.as_bytes())
    }

    pub fn load_chapter(&self, name: &str) -> Result<Option<String>, StoreError> {
        let path = self.chapter_path(name);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    pub fn load_glossary(&self, rules: ExtractionRules) -> Result<Option<Glossary>, StoreError> {
        let path = self.root.join(GLOSSARY_FILE);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(Glossary::load_from(&path, rules)?))
    }

    /// Persist one finished chapter together with the glossary as it stands.
    ///
    /// The chapter text is written first and the manifest last, so a manifest
    /// entry marked done always has its text on disk.
    pub fn save_chapter(
        &self,
        manifest: &mut Manifest,
        chapter: &Chapter,
        glossary: &Glossary,
    ) -> Result<(), StoreError> {
        if chapter.status == ChapterStatus::Done {
            if let Some(text) = &chapter.translated {
                write_atomic(&self.chapter_path(&chapter.name), text.as_bytes())?;
            }
        }

        let snapshot = serde_json::to_string_pretty(&glossary.snapshot())?;
        write_atomic(&self.root.join(GLOSSARY_FILE), snapshot.as_bytes())?;

        manifest.upsert(chapter);
        self.save_manifest(manifest)?;
        debug!("Persisted chapter {} ({:?})", chapter.name, chapter.status);
        Ok(())
    }

    /// Remove all stored state, e.g. when the manifest belongs to another job.
    pub fn reset(&self) -> Result<(), StoreError> {
        info!("Clearing stale job state in {}", self.root.display());
        for file in [MANIFEST_FILE, GLOSSARY_FILE] {
            let path = self.root.join(file);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        let chapters = self.root.join(CHAPTERS_DIR);
        if chapters.exists() {
            std::fs::remove_dir_all(&chapters)?;
        }
        std::fs::create_dir_all(chapters)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ChapterStage;
    use tempfile::TempDir;

    fn done_chapter(index: usize, name: &str, text: &str) -> Chapter {
        let mut chapter = Chapter::new(index, name, Some("source".to_string()));
        chapter.translated = Some(text.to_string());
        chapter.set_stage(ChapterStage::Done);
        chapter
    }

    #[test]
    fn test_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path().join("job")).unwrap();
        assert!(store.load_manifest().unwrap().is_none());
        assert!(store.load_chapter("ch1.txt").unwrap().is_none());
        assert!(store.load_glossary(ExtractionRules::default()).unwrap().is_none());
    }

    #[test]
    fn test_save_chapter_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let mut manifest = Manifest::new(Uuid::new_v4(), "novel.zip", "ja", "en");

        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);

        let chapter = done_chapter(0, "vol1/ch1.txt", "Aria smiled.");
        store.save_chapter(&mut manifest, &chapter, &glossary).unwrap();

        let loaded = store.load_manifest().unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.record("vol1/ch1.txt").unwrap().status, ChapterStatus::Done);
        assert_eq!(
            store.load_chapter("vol1/ch1.txt").unwrap().as_deref(),
            Some("Aria smiled.")
        );

        let restored = store.load_glossary(ExtractionRules::default()).unwrap().unwrap();
        assert_eq!(restored.committed("aria"), Some("Aria"));

        // No temp files left behind
        assert!(!dir.path().join("manifest.json.tmp").exists());
    }

    #[test]
    fn test_chapter_file_names_do_not_collide() {
        assert_eq!(chapter_file_name("vol1/ch1.txt"), "vol1%2Fch1.txt");
        assert_ne!(chapter_file_name("a/b.txt"), chapter_file_name("a__b.txt"));
        assert_ne!(chapter_file_name("a/b.txt"), chapter_file_name("a%2Fb.txt"));
        assert_ne!(chapter_file_name("a\\b.txt"), chapter_file_name("a/b.txt"));

        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let mut manifest = Manifest::new(Uuid::new_v4(), "novel.zip", "ja", "en");
        let glossary = Glossary::default();
        store
            .save_chapter(&mut manifest, &done_chapter(0, "a/b.txt", "nested"), &glossary)
            .unwrap();
        store
            .save_chapter(&mut manifest, &done_chapter(1, "a__b.txt", "flat"), &glossary)
            .unwrap();

        assert_eq!(store.load_chapter("a/b.txt").unwrap().as_deref(), Some("nested"));
        assert_eq!(store.load_chapter("a__b.txt").unwrap().as_deref(), Some("flat"));
    }

    #[test]
    fn test_failed_chapter_has_no_text() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::open(dir.path()).unwrap();
        let mut manifest = Manifest::new(Uuid::new_v4(), "novel.zip", "ja", "en");

        let mut chapter = Chapter::new(1, "ch2.txt", None);
        chapter.fail("unreadable");
        store
            .save_chapter(&mut manifest, &chapter, &Glossary::default())
            .unwrap();

        assert!(store.load_chapter("ch2.txt").unwrap().is_none());
        let record = manifest.record("ch2.txt").unwrap();
        assert_eq!(record.status, ChapterStatus::Failed);
        assert_eq!(record.warnings.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_and_orders() {
        let mut manifest = Manifest::new(Uuid::new_v4(), "novel.zip", "ja", "en");
        manifest.upsert(&done_chapter(2, "ch3.txt", "c"));
        manifest.upsert(&done_chapter(0, "ch1.txt", "a"));

        let mut failed = Chapter::new(2, "ch3.txt", None);
        failed.fail("boom");
        manifest.upsert(&failed);

        let names: Vec<&str> = manifest.chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ch1.txt", "ch3.txt"]);
        assert_eq!(manifest.chapters[1].status, ChapterStatus::Failed);
    }

    #[test]
    fn test_manifest_matches() {
        let manifest = Manifest::new(Uuid::new_v4(), "novel.zip", "ja", "en");
        assert!(manifest.matches("novel.zip", "ja", "en"));
        assert!(!manifest.matches("novel.zip", "ja", "fr"));
    }

    #[test]
    fn test_for_document_and_reset() {
        let dir = TempDir::new().unwrap();
        let store = JobStore::for_document(dir.path(), "My Novel.zip").unwrap();
        assert!(store.root().ends_with("My Novel"));

        let mut manifest = Manifest::new(Uuid::new_v4(), "My Novel.zip", "ja", "en");
        store
            .save_chapter(&mut manifest, &done_chapter(0, "ch1.txt", "x"), &Glossary::default())
            .unwrap();
        store.reset().unwrap();

        assert!(store.load_manifest().unwrap().is_none());
        assert!(store.load_chapter("ch1.txt").unwrap().is_none());
    }
}

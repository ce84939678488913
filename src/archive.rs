//! Reading chapter files out of a zip archive and packaging the output.

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::utils::natural_cmp;
use log::{debug, warn};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// One chapter file as found in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Path inside the archive (or the file name in single-file mode).
    pub name: String,
    /// Decoded text; `None` when the bytes were not valid UTF-8.
    pub text: Option<String>,
}

/// Whether an archive entry name looks like a chapter.
fn is_chapter_entry(name: &str, extensions: &[String]) -> bool {
    if name.ends_with('/') || name.split('/').any(|part| part == "__MACOSX") {
        return false;
    }
    let base = name.rsplit('/').next().unwrap_or(name);
    if base.starts_with('.') {
        return false;
    }
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            let ext = ext.to_lowercase();
            extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext))
        }
        _ => false,
    }
}

/// Decode chapter bytes as UTF-8, dropping a leading byte-order mark.
fn decode(bytes: Vec<u8>) -> Option<String> {
    let bytes = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => rest.to_vec(),
        None => bytes,
    };
    String::from_utf8(bytes).ok()
}

fn check_size(size: u64, limit: u64) -> Result<(), ArchiveError> {
    if size > limit {
        return Err(ArchiveError::TooLarge { size, limit });
    }
    Ok(())
}

/// Extract every chapter file from a zip archive, in natural name order.
///
/// Both the archive's size and the total declared uncompressed size are
/// checked against `max_archive_bytes` before any entry is decompressed.
pub fn read_zip(path: &Path, config: &ArchiveConfig) -> Result<Vec<SourceFile>, ArchiveError> {
    let limit = config.max_archive_bytes;
    check_size(std::fs::metadata(path)?.len(), limit)?;

    let mut zip = ZipArchive::new(File::open(path)?)?;

    let mut declared: u64 = 0;
    let mut selected = Vec::new();
    for i in 0..zip.len() {
        let entry = zip.by_index_raw(i)?;
        if entry.is_dir() {
            continue;
        }
        declared = declared.saturating_add(entry.size());
        if is_chapter_entry(entry.name(), &config.extensions) {
            selected.push(i);
        } else {
            debug!("Skipping archive entry {}", entry.name());
        }
    }
    check_size(declared, limit)?;

    let mut files = Vec::with_capacity(selected.len());
    let mut consumed: u64 = 0;
    for i in selected {
        let entry = zip.by_index(i)?;
        let name = entry.name().to_string();

        // Declared sizes can lie, so cap what is actually inflated
        let mut bytes = Vec::new();
        entry
            .take(limit.saturating_sub(consumed).saturating_add(1))
            .read_to_end(&mut bytes)?;
        consumed = consumed.saturating_add(bytes.len() as u64);
        check_size(consumed, limit)?;

        let text = decode(bytes);
        if text.is_none() {
            warn!("{} is not valid UTF-8", name);
        }
        files.push(SourceFile { name, text });
    }

    if files.is_empty() {
        return Err(ArchiveError::NoChapters);
    }
    files.sort_by(|a, b| natural_cmp(&a.name, &b.name));
    Ok(files)
}

/// Read a single plain-text chapter.
pub fn read_text_file(path: &Path, config: &ArchiveConfig) -> Result<SourceFile, ArchiveError> {
    check_size(std::fs::metadata(path)?.len(), config.max_archive_bytes)?;
    let bytes = std::fs::read(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let text = decode(bytes);
    if text.is_none() {
        warn!("{} is not valid UTF-8", name);
    }
    Ok(SourceFile { name, text })
}

/// Package `(name, text)` pairs into a new zip archive.
pub fn write_zip(path: &Path, entries: &[(String, String)]) -> Result<(), ArchiveError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut zout = ZipWriter::new(File::create(path)?);
    let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, text) in entries {
        zout.start_file(name.as_str(), opts)?;
        zout.write_all(text.as_bytes())?;
    }
    zout.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_zip(dir: &TempDir, files: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.path().join("novel.zip");
        let mut zout = ZipWriter::new(File::create(&path).unwrap());
        let opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in files {
            if name.ends_with('/') {
                zout.add_directory(*name, opts).unwrap();
            } else {
                zout.start_file(*name, opts).unwrap();
                zout.write_all(data).unwrap();
            }
        }
        zout.finish().unwrap();
        path
    }

    fn names(files: &[SourceFile]) -> Vec<&str> {
        files.iter().map(|f| f.name.as_str()).collect()
    }

    #[test]
    fn test_is_chapter_entry() {
        let exts = ArchiveConfig::default().extensions;
        assert!(is_chapter_entry("ch1.txt", &exts));
        assert!(is_chapter_entry("vol1/Ch2.TXT", &exts));
        assert!(is_chapter_entry("notes.md", &exts));
        assert!(!is_chapter_entry("cover.png", &exts));
        assert!(!is_chapter_entry("__MACOSX/ch1.txt", &exts));
        assert!(!is_chapter_entry("vol1/.hidden.txt", &exts));
        assert!(!is_chapter_entry(".txt", &exts));
        assert!(!is_chapter_entry("vol1/", &exts));
    }

    #[test]
    fn test_read_zip_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(
            &dir,
            &[
                ("Chapter_10.txt", b"ten"),
                ("extras/", b""),
                ("Chapter_2.txt", b"two"),
                ("__MACOSX/Chapter_1.txt", b"junk"),
                (".DS_Store", b"junk"),
                ("cover.jpg", b"\xff\xd8"),
                ("Chapter_1.txt", b"one"),
            ],
        );

        let files = read_zip(&path, &ArchiveConfig::default()).unwrap();
        assert_eq!(
            names(&files),
            vec!["Chapter_1.txt", "Chapter_2.txt", "Chapter_10.txt"]
        );
        assert_eq!(files[0].text.as_deref(), Some("one"));
    }

    #[test]
    fn test_bom_stripped_and_invalid_utf8_marked() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(
            &dir,
            &[("a.txt", b"\xEF\xBB\xBFhello"), ("b.txt", b"\xff\xfe\x00bad")],
        );

        let files = read_zip(&path, &ArchiveConfig::default()).unwrap();
        assert_eq!(files[0].text.as_deref(), Some("hello"));
        assert_eq!(files[1].name, "b.txt");
        assert!(files[1].text.is_none());
    }

    #[test]
    fn test_too_large_rejected() {
        let dir = TempDir::new().unwrap();
        let big = vec![b'a'; 4096];
        let path = make_zip(&dir, &[("a.txt", &big)]);
        let config = ArchiveConfig {
            max_archive_bytes: 1024,
            ..ArchiveConfig::default()
        };

        // Compresses well, so only the declared size trips the limit
        assert!(std::fs::metadata(&path).unwrap().len() < 1024);
        assert!(matches!(
            read_zip(&path, &config),
            Err(ArchiveError::TooLarge { size: 4096, limit: 1024 })
        ));
    }

    #[test]
    fn test_corrupt_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.zip");
        std::fs::write(&path, "this is not a zip file. ".repeat(20)).unwrap();
        assert!(matches!(
            read_zip(&path, &ArchiveConfig::default()),
            Err(ArchiveError::Corrupt(_))
        ));
    }

    #[test]
    fn test_no_chapters() {
        let dir = TempDir::new().unwrap();
        let path = make_zip(&dir, &[("cover.png", b"png"), ("__MACOSX/x.txt", b"x")]);
        assert!(matches!(
            read_zip(&path, &ArchiveConfig::default()),
            Err(ArchiveError::NoChapters)
        ));
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out").join("translated.zip");
        let entries = vec![
            ("ch1.txt".to_string(), "Aria smiled.".to_string()),
            ("ch2.txt".to_string(), "アリアは笑った。".to_string()),
        ];
        write_zip(&path, &entries).unwrap();

        let files = read_zip(&path, &ArchiveConfig::default()).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[1].text.as_deref(), Some("アリアは笑った。"));
    }

    #[test]
    fn test_read_text_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chapter.txt");
        std::fs::write(&path, "\u{feff}Once upon a time.").unwrap();

        let file = read_text_file(&path, &ArchiveConfig::default()).unwrap();
        assert_eq!(file.name, "chapter.txt");
        assert_eq!(file.text.as_deref(), Some("Once upon a time."));
    }
}

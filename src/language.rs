//! Source language detection and ISO 639 code handling.

use isolang::Language;
use log::{debug, info};
use regex::Regex;
use std::sync::LazyLock;

/// Code reported when a detector cannot decide.
pub const UNKNOWN: &str = "und";

/// Characters of input inspected by the heuristic detector.
const SAMPLE_CHARS: usize = 1000;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{L}+").expect("Invalid WORD"));

/// Frequent function words per Latin-script language, in tie-break order.
const STOPWORDS: &[(&str, &[&str])] = &[
    (
        "en",
        &[
            "the", "and", "of", "to", "was", "he", "she", "that", "with", "his", "her", "you",
            "said", "had", "it", "is", "in",
        ],
    ),
    (
        "es",
        &[
            "el", "los", "las", "y", "una", "por", "con", "para", "del", "pero", "su", "se", "muy",
            "está", "como",
        ],
    ),
    (
        "fr",
        &[
            "le", "les", "et", "une", "il", "elle", "est", "qui", "dans", "pour", "pas", "sur",
            "avec", "ne", "du", "au", "je", "ce",
        ],
    ),
    (
        "de",
        &[
            "der", "die", "das", "und", "ist", "nicht", "ein", "eine", "mit", "sich", "auf", "für",
            "den", "dem", "zu", "er", "ich", "auch",
        ],
    ),
    (
        "it",
        &[
            "il", "di", "che", "gli", "per", "non", "sono", "nel", "alla", "della", "anche", "più",
            "questo", "lei",
        ],
    ),
    (
        "pt",
        &[
            "os", "as", "em", "um", "uma", "não", "mais", "foi", "ele", "ela", "do", "da", "dos",
            "das", "mas", "muito",
        ],
    ),
];

/// Result of a detection attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// ISO 639-1 code, or [`UNKNOWN`].
    pub code: String,
    /// 0.0 to 1.0.
    pub confidence: f32,
}

impl Detection {
    fn unknown() -> Self {
        Self {
            code: UNKNOWN.to_string(),
            confidence: 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.code == UNKNOWN
    }
}

/// Anything that can guess the language of a text sample.
pub trait LanguageDetector: Send + Sync {
    fn detect(&self, text: &str) -> Detection;
}

/// Script-range and stopword heuristics; no models, no network.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicDetector;

#[derive(Default)]
struct ScriptCounts {
    kana: usize,
    han: usize,
    hangul: usize,
    cyrillic: usize,
    latin: usize,
}

fn count_scripts(sample: &str) -> ScriptCounts {
    let mut counts = ScriptCounts::default();
    for c in sample.chars() {
        match c as u32 {
            0x3040..=0x309F | 0x30A0..=0x30FF => counts.kana += 1,
            0x4E00..=0x9FFF => counts.han += 1,
            0xAC00..=0xD7AF => counts.hangul += 1,
            0x0400..=0x04FF => counts.cyrillic += 1,
            _ if c.is_alphabetic() && (c.is_ascii() || (c as u32) < 0x0250) => counts.latin += 1,
            _ => {}
        }
    }
    counts
}

fn detect_latin(sample: &str) -> Detection {
    let lowered = sample.to_lowercase();
    let mut hits = [0usize; STOPWORDS.len()];
    for word in WORD.find_iter(&lowered) {
        for (i, (_, words)) in STOPWORDS.iter().enumerate() {
            if words.contains(&word.as_str()) {
                hits[i] += 1;
            }
        }
    }

    let total: usize = hits.iter().sum();
    if total == 0 {
        return Detection::unknown();
    }
    let mut best = 0;
    for (i, &h) in hits.iter().enumerate() {
        if h > hits[best] {
            best = i;
        }
    }
    Detection {
        code: STOPWORDS[best].0.to_string(),
        confidence: hits[best] as f32 / total as f32,
    }
}

impl LanguageDetector for HeuristicDetector {
    fn detect(&self, text: &str) -> Detection {
        let sample: String = text.trim().chars().take(SAMPLE_CHARS).collect();
        let counts = count_scripts(&sample);
        let letters = counts.kana + counts.han + counts.hangul + counts.cyrillic + counts.latin;
        if letters == 0 {
            return Detection::unknown();
        }

        // Kanji alongside kana is Japanese; Han alone is Chinese
        let japanese = if counts.kana > 0 {
            counts.kana + counts.han
        } else {
            0
        };
        let chinese = if counts.kana > 0 { 0 } else { counts.han };

        let scripts = [
            ("ja", japanese),
            ("ko", counts.hangul),
            ("zh", chinese),
            ("ru", counts.cyrillic),
        ];
        let (code, count) = scripts
            .iter()
            .copied()
            .max_by_key(|(_, n)| *n)
            .unwrap_or(("", 0));

        if count > counts.latin {
            return Detection {
                code: code.to_string(),
                confidence: count as f32 / letters as f32,
            };
        }

        let latin = detect_latin(&sample);
        Detection {
            confidence: latin.confidence * counts.latin as f32 / letters as f32,
            ..latin
        }
    }
}

/// Look up an ISO 639-1 or 639-3 code.
pub fn validate_language_code(code: &str) -> Option<Language> {
    let normalized = code.trim().to_lowercase();
    match normalized.len() {
        2 => Language::from_639_1(&normalized),
        3 => Language::from_639_3(&normalized),
        _ => None,
    }
}

/// Canonical form of a code: ISO 639-1 where one exists, else 639-3.
pub fn normalize_code(code: &str) -> Option<String> {
    let lang = validate_language_code(code)?;
    Some(
        lang.to_639_1()
            .map(str::to_string)
            .unwrap_or_else(|| lang.to_639_3().to_string()),
    )
}

/// English name of a language code, or the code itself if unknown.
pub fn display_name(code: &str) -> String {
    validate_language_code(code)
        .map(|lang| lang.to_name().to_string())
        .unwrap_or_else(|| code.to_string())
}

/// Whether two language codes name the same language ("en" and "eng").
pub fn same_language(a: &str, b: &str) -> bool {
    let canonical = |code: &str| normalize_code(code).unwrap_or_else(|| code.trim().to_lowercase());
    canonical(a) == canonical(b)
}

/// Decide the source language of a document.
///
/// A declared language always wins. Otherwise every sample is detected on
/// its own and the guess shared by most confident samples is used, the
/// earliest one on a tie. `default` applies when no sample clears
/// `threshold`.
pub fn resolve_source_language(
    declared: Option<&str>,
    samples: &[&str],
    detector: &dyn LanguageDetector,
    threshold: f32,
    default: &str,
) -> String {
    if let Some(declared) = declared.map(str::trim).filter(|d| !d.is_empty()) {
        return normalize_code(declared).unwrap_or_else(|| declared.to_lowercase());
    }

    let mut votes: Vec<(String, usize)> = Vec::new();
    for sample in samples {
        let detection = detector.detect(sample);
        debug!(
            "Detected source language {} (confidence {:.2})",
            detection.code, detection.confidence
        );
        if detection.is_unknown() || detection.confidence < threshold {
            continue;
        }
        match votes.iter_mut().find(|(code, _)| *code == detection.code) {
            Some((_, n)) => *n += 1,
            None => votes.push((detection.code, 1)),
        }
    }

    let mut winner: Option<(String, usize)> = None;
    for (code, n) in votes {
        if winner.as_ref().is_none_or(|(_, best)| n > *best) {
            winner = Some((code, n));
        }
    }
    if let Some((code, n)) = winner {
        info!(
            "Source language detected as {} ({} of {} samples)",
            display_name(&code),
            n,
            samples.len()
        );
        return code;
    }

    info!(
        "Source language uncertain, falling back to {}",
        display_name(default)
    );
    default.to_string()
}

//! Emotion reconciliation: keep the coarse tone of each translated chunk
//! in line with its source.

use crate::config::EmotionConfig;
use crate::inference::{InferenceGateway, TranslateRequest};
use crate::job::{EmotionReading, Substitution, Warning};
use crate::terms::TermReconciler;
use log::{debug, warn};
use regex::Regex;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\p{L}+").expect("Invalid WORD"));

/// Keyword lists for the local classifier, in tie-break order.
const LEXICON: &[(&str, &[&str])] = &[
    (
        "joy",
        &[
            "happy", "happily", "happiness", "joy", "joyful", "excited", "delighted", "cheerful",
            "cheerfully", "glad", "pleased", "content", "blissful", "elated", "laugh", "smile",
            "grin", "wonderful", "amazing", "fantastic",
        ],
    ),
    (
        "sadness",
        &[
            "sad", "sadly", "depressed", "melancholy", "sorrow", "sorrowful", "gloomy", "dejected",
            "downhearted", "mournful", "cry", "cried", "weep", "wept", "tears", "grief", "lonely",
            "despair",
        ],
    ),
    (
        "anger",
        &[
            "angry", "angrily", "furious", "enraged", "livid", "irate", "irritated", "annoyed",
            "frustrated", "hostile", "rage", "wrath", "hate", "shout", "snarl",
        ],
    ),
    (
        "fear",
        &[
            "afraid", "scared", "frightened", "terrified", "anxious", "worried", "nervous",
            "panic", "dread", "horror", "alarmed", "apprehensive", "uneasy", "tremble",
        ],
    ),
    (
        "surprise",
        &[
            "surprised", "shocked", "amazed", "astonished", "stunned", "bewildered", "startled",
            "unexpected", "sudden", "wow", "incredible", "unbelievable",
        ],
    ),
    (
        "disgust",
        &[
            "disgusted", "disgusting", "revolted", "repulsed", "nauseated", "sickened", "appalled",
            "gross", "yuck", "eww", "horrible", "awful",
        ],
    ),
    (
        "neutral",
        &[
            "said", "went", "came", "looked", "walked", "moved", "turned", "opened", "closed",
            "took", "gave", "found", "saw", "heard",
        ],
    ),
];

const SUFFIXES: &[&str] = &["s", "es", "d", "ed", "ing", "ly"];

fn matches_keyword(word: &str, keyword: &str) -> bool {
    match word.strip_prefix(keyword) {
        Some("") => true,
        Some(rest) => SUFFIXES.contains(&rest),
        None => false,
    }
}

/// Classify text with the built-in keyword lexicon.
///
/// The score is the winning label's share of all keyword hits. Text without
/// any hits is `neutral` with full confidence.
pub fn classify_lexicon(text: &str) -> EmotionReading {
    let lowered = text.to_lowercase();
    let mut counts = [0usize; LEXICON.len()];

    for word in WORD.find_iter(&lowered) {
        for (i, (_, keywords)) in LEXICON.iter().enumerate() {
            if keywords.iter().any(|k| matches_keyword(word.as_str(), k)) {
                counts[i] += 1;
            }
        }
    }

    let total: usize = counts.iter().sum();
    if total == 0 {
        return EmotionReading::new("neutral", 1.0);
    }

    let mut best = 0;
    for (i, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = i;
        }
    }
    EmotionReading::new(LEXICON[best].0, counts[best] as f32 / total as f32)
}

/// Coarse tone families. Labels within one bucket count as the same tone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmotionBucket {
    Positive,
    Sad,
    Angry,
    Afraid,
    Surprised,
    Disgusted,
    Neutral,
    /// A label outside the known families; only equal labels match.
    Other(String),
}

pub fn bucket_for(label: &str) -> EmotionBucket {
    let label = label.trim().to_lowercase();
    match label.as_str() {
        "joy" | "happy" | "happiness" | "excited" | "excitement" | "love" | "amusement"
        | "pleased" | "content" | "delight" | "gratitude" | "optimism" | "admiration" | "pride"
        | "relief" | "approval" | "caring" | "positive" => EmotionBucket::Positive,
        "sadness" | "sad" | "grief" | "sorrow" | "melancholy" | "disappointment" | "remorse"
        | "loneliness" => EmotionBucket::Sad,
        "anger" | "angry" | "rage" | "annoyance" | "irritation" | "disapproval" | "frustration" => {
            EmotionBucket::Angry
        }
        "fear" | "afraid" | "nervousness" | "anxiety" | "worry" | "terror" => EmotionBucket::Afraid,
        "surprise" | "surprised" | "shock" | "amazement" | "realization" | "confusion"
        | "curiosity" => EmotionBucket::Surprised,
        "disgust" | "disgusted" | "revulsion" | "contempt" => EmotionBucket::Disgusted,
        "neutral" | "calm" | "none" => EmotionBucket::Neutral,
        _ => EmotionBucket::Other(label),
    }
}

/// Whether two readings carry the same coarse tone.
pub fn same_tone(a: &EmotionReading, b: &EmotionReading) -> bool {
    bucket_for(&a.label) == bucket_for(&b.label)
}

/// Result of reconciling one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionOutcome {
    /// Text to keep for the chunk.
    pub text: String,
    /// Glossary rewrites applied to `text`.
    pub substitutions: Vec<Substitution>,
    pub source: Option<EmotionReading>,
    pub translated: Option<EmotionReading>,
    /// Number of re-translations requested.
    pub retranslations: u32,
    pub warning: Option<Warning>,
    /// Glossary conflicts found in re-translations.
    pub term_warnings: Vec<Warning>,
}

struct Attempt {
    text: String,
    substitutions: Vec<Substitution>,
    reading: EmotionReading,
}

/// Checks chunk translations for tone drift and re-translates with a hint.
#[derive(Clone)]
pub struct EmotionReconciler {
    gateway: InferenceGateway,
    max_retranslations: u32,
}

impl EmotionReconciler {
    pub fn new(gateway: InferenceGateway, max_retranslations: u32) -> Self {
        Self {
            gateway,
            max_retranslations,
        }
    }

    /// `None` when emotion checking is switched off.
    pub fn from_config(gateway: InferenceGateway, config: &EmotionConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(gateway, config.max_retranslations))
    }

    /// Compare the tone of `translated` against `request.text` and try to
    /// recover from drift. Never fails; problems surface as warnings.
    ///
    /// Every re-translation goes through the same term reconciliation as the
    /// first translation before its tone is judged.
    pub async fn reconcile(
        &self,
        chapter: usize,
        chunk_index: usize,
        request: &TranslateRequest,
        translated: String,
        substitutions: Vec<Substitution>,
        terms: &TermReconciler,
    ) -> EmotionOutcome {
        let unchecked = |text: String,
                         substitutions: Vec<Substitution>,
                         source: Option<EmotionReading>,
                         translated: Option<EmotionReading>,
                         retranslations: u32,
                         reason: String| EmotionOutcome {
            text,
            substitutions,
            source,
            translated,
            retranslations,
            warning: Some(Warning::EmotionUnchecked {
                chapter,
                chunk_index,
                reason,
            }),
            term_warnings: Vec::new(),
        };

        let source = match self.gateway.classify_emotion(&request.text).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    "Chapter {} chunk {}: source emotion unavailable: {}",
                    chapter + 1,
                    chunk_index,
                    e
                );
                return unchecked(translated, substitutions, None, None, 0, e.to_string());
            }
        };

        let reading = match self.gateway.classify_emotion(&translated).await {
            Ok(reading) => reading,
            Err(e) => {
                warn!(
                    "Chapter {} chunk {}: translation emotion unavailable: {}",
                    chapter + 1,
                    chunk_index,
                    e
                );
                return unchecked(translated, substitutions, Some(source), None, 0, e.to_string());
            }
        };

        if same_tone(&source, &reading) {
            return EmotionOutcome {
                text: translated,
                substitutions,
                source: Some(source),
                translated: Some(reading),
                retranslations: 0,
                warning: None,
                term_warnings: Vec::new(),
            };
        }

        debug!(
            "Chapter {} chunk {}: tone {} became {}, re-translating",
            chapter + 1,
            chunk_index,
            source.label,
            reading.label
        );

        let mut best = Attempt {
            text: translated,
            substitutions,
            reading,
        };
        let hint = format!("Preserve the {} tone of the original.", source.label);
        let mut retranslations = 0;
        let mut term_warnings = Vec::new();

        for attempt in 1..=self.max_retranslations {
            retranslations = attempt;
            let retry = request.retry_with_hint(hint.clone(), attempt);
            let raw = match self.gateway.translate(&retry).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        "Chapter {} chunk {}: re-translation failed: {}",
                        chapter + 1,
                        chunk_index,
                        e
                    );
                    let mut outcome = unchecked(
                        best.text,
                        best.substitutions,
                        Some(source),
                        Some(best.reading),
                        retranslations,
                        e.to_string(),
                    );
                    outcome.term_warnings = term_warnings;
                    return outcome;
                }
            };

            let pass = terms
                .reconcile_chunk(request, &raw, chapter, chunk_index)
                .await;
            term_warnings.extend(pass.warnings);
            let (text, substitutions) = (pass.text, pass.substitutions);

            let reading = match self.gateway.classify_emotion(&text).await {
                Ok(reading) => reading,
                Err(e) => {
                    debug!("Discarding unclassifiable re-translation {}: {}", attempt, e);
                    continue;
                }
            };

            if same_tone(&source, &reading) {
                return EmotionOutcome {
                    text,
                    substitutions,
                    source: Some(source),
                    translated: Some(reading),
                    retranslations,
                    warning: None,
                    term_warnings,
                };
            }

            // Least confident in the wrong tone wins; earlier attempts win ties
            if reading.score < best.reading.score {
                best = Attempt {
                    text,
                    substitutions,
                    reading,
                };
            }
        }

        let warning = Warning::EmotionDrift {
            chapter,
            chunk_index,
            source_label: source.label.clone(),
            translated_label: best.reading.label.clone(),
        };
        EmotionOutcome {
            text: best.text,
            substitutions: best.substitutions,
            source: Some(source),
            translated: Some(best.reading),
            retranslations,
            warning: Some(warning),
            term_warnings,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::glossary::Glossary;
    use crate::inference::testing::{ScriptedBackend, gateway};
    use std::sync::atomic::Ordering;

    fn reading_for(text: &str) -> Result<EmotionReading, InferenceError> {
        let reading = if text.contains("gloomy a") {
            EmotionReading::new("sadness", 0.9)
        } else if text.contains("gloomy b") {
            EmotionReading::new("sadness", 0.6)
        } else if text.contains("gloomy c") {
            EmotionReading::new("sadness", 0.7)
        } else if text.contains("cheerful") {
            EmotionReading::new("happy", 0.8)
        } else {
            EmotionReading::new("joy", 0.9)
        };
        Ok(reading)
    }

    fn request() -> TranslateRequest {
        TranslateRequest::new("SRC", "ja", "en")
    }

    #[test]
    fn test_lexicon_labels() {
        assert_eq!(classify_lexicon("She laughed and smiled happily.").label, "joy");
        assert_eq!(classify_lexicon("He wept; tears of grief.").label, "sadness");
        assert_eq!(classify_lexicon("They were terrified and trembling.").label, "fear");
    }

    #[test]
    fn test_lexicon_no_hits_is_neutral() {
        let reading = classify_lexicon("The table is made of oak.");
        assert_eq!(reading, EmotionReading::new("neutral", 1.0));
        assert_eq!(classify_lexicon("").label, "neutral");
    }

    #[test]
    fn test_lexicon_score_is_share_of_hits() {
        let reading = classify_lexicon("happy happy sad said");
        assert_eq!(reading.label, "joy");
        assert!((reading.score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_keyword_suffixes() {
        assert!(matches_keyword("smiled", "smile"));
        assert!(matches_keyword("laughing", "laugh"));
        assert!(!matches_keyword("sadden", "sad"));
        assert!(!matches_keyword("hateful", "hate"));
    }

    #[test]
    fn test_buckets() {
        assert_eq!(bucket_for("joy"), bucket_for("Happy"));
        assert_eq!(bucket_for("excited"), EmotionBucket::Positive);
        assert_eq!(bucket_for("grief"), EmotionBucket::Sad);
        assert_ne!(bucket_for("joy"), bucket_for("sadness"));
        assert_eq!(bucket_for("wistful"), bucket_for("WISTFUL"));
        assert_ne!(bucket_for("wistful"), bucket_for("nostalgic"));
    }

    #[tokio::test]
    async fn test_matching_tone_accepted() {
        let (gw, backend) =
            gateway(ScriptedBackend::echo().classify_with(|t| reading_for(t)));
        let reconciler = EmotionReconciler::new(gw.clone(), 2);
        let terms = TermReconciler::new(gw, Glossary::default().into_shared());

        let outcome = reconciler
            .reconcile(0, 0, &request(), "cheerful text".to_string(), Vec::new(), &terms)
            .await;

        assert_eq!(outcome.text, "cheerful text");
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.retranslations, 0);
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retranslation_recovers_tone() {
        let backend = ScriptedBackend::with_translate(|req| match &req.hint {
            Some(hint) if hint.contains("Preserve the joy tone") => Ok("cheerful text".to_string()),
            _ => Err(InferenceError::InvalidConfig("missing hint".to_string())),
        })
        .classify_with(|t| reading_for(t));
        let (gw, backend) = gateway(backend);
        let reconciler = EmotionReconciler::new(gw.clone(), 2);
        let terms = TermReconciler::new(gw, Glossary::default().into_shared());

        let outcome = reconciler
            .reconcile(0, 3, &request(), "gloomy a".to_string(), Vec::new(), &terms)
            .await;

        assert_eq!(outcome.text, "cheerful text");
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.retranslations, 1);
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_persistent_drift_keeps_least_confident_attempt() {
        let backend = ScriptedBackend::with_translate(|req| {
            Ok(if req.attempt == 1 { "gloomy b" } else { "gloomy c" }.to_string())
        })
        .classify_with(|t| reading_for(t));
        let (gw, backend) = gateway(backend);
        let reconciler = EmotionReconciler::new(gw.clone(), 2);
        let terms = TermReconciler::new(gw, Glossary::default().into_shared());

        let outcome = reconciler
            .reconcile(1, 2, &request(), "gloomy a".to_string(), Vec::new(), &terms)
            .await;

        assert_eq!(outcome.text, "gloomy b");
        assert_eq!(outcome.retranslations, 2);
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            outcome.warning,
            Some(Warning::EmotionDrift {
                chapter: 1,
                chunk_index: 2,
                source_label: "joy".to_string(),
                translated_label: "sadness".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_source_classification_failure_is_unchecked() {
        let backend = ScriptedBackend::echo().classify_with(|t| {
            if t == "SRC" {
                Err(InferenceError::InvalidConfig("no classifier".to_string()))
            } else {
                reading_for(t)
            }
        });
        let (gw, _) = gateway(backend);
        let reconciler = EmotionReconciler::new(gw.clone(), 2);
        let terms = TermReconciler::new(gw, Glossary::default().into_shared());

        let outcome = reconciler
            .reconcile(0, 0, &request(), "gloomy a".to_string(), Vec::new(), &terms)
            .await;

        assert_eq!(outcome.text, "gloomy a");
        assert!(outcome.source.is_none());
        assert!(matches!(
            outcome.warning,
            Some(Warning::EmotionUnchecked { chunk_index: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_retranslation_reapplies_glossary() {
        let backend = ScriptedBackend::with_translate(|_| Ok("Arya laughed, cheerful".to_string()))
            .classify_with(|t| reading_for(t));
        let (gw, _) = gateway(backend);
        let reconciler = EmotionReconciler::new(gw.clone(), 2);

        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        glossary.reconcile("Aria", "Arya", 0, 1);
        let terms = TermReconciler::new(gw, glossary.into_shared());

        let outcome = reconciler
            .reconcile(0, 1, &request(), "gloomy a".to_string(), Vec::new(), &terms)
            .await;

        assert_eq!(outcome.text, "Aria laughed, cheerful");
        assert_eq!(outcome.substitutions.len(), 1);
        assert!(outcome.warning.is_none());
        assert!(outcome.term_warnings.is_empty());
    }

    #[tokio::test]
    async fn test_retranslation_with_new_spelling_is_reconciled() {
        // The tone-hinted attempt respells a committed name the glossary has never seen
        let backend = ScriptedBackend::with_translate(|req| {
            Ok(if req.text == "Aria" {
                "Aria".to_string()
            } else {
                "Arya laughed, cheerful".to_string()
            })
        })
        .classify_with(|t| reading_for(t));
        let (gw, backend) = gateway(backend);
        let reconciler = EmotionReconciler::new(gw.clone(), 2);

        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        let terms = TermReconciler::new(gw, glossary.into_shared());
        let request = TranslateRequest::new("Aria laughed.", "ja", "en");

        let outcome = reconciler
            .reconcile(0, 1, &request, "gloomy a".to_string(), Vec::new(), &terms)
            .await;

        assert_eq!(outcome.text, "Aria laughed, cheerful");
        assert!(outcome.warning.is_none());
        assert_eq!(outcome.retranslations, 1);
        assert_eq!(
            outcome.term_warnings,
            vec![Warning::GlossaryConflict {
                term: "Aria".to_string(),
                chapter: 0,
                chunk: 1,
                rejected: "Arya".to_string(),
                kept: "Aria".to_string(),
            }]
        );
        assert!(terms.glossary().lock().get("Aria").unwrap().alternates.contains("Arya"));
        // Re-translation, standalone term, in-context lookup
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disabled_by_config() {
        let (gw, _) = gateway(ScriptedBackend::echo());
        let config = EmotionConfig {
            enabled: false,
            ..EmotionConfig::default()
        };
        assert!(EmotionReconciler::from_config(gw.clone(), &config).is_none());
        assert!(EmotionReconciler::from_config(gw, &EmotionConfig::default()).is_some());
    }
}

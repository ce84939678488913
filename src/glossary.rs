//! Glossary engine: the cross-chapter term table that keeps recurring names
//! and invented terms rendered the same way throughout a job.
//!
//! Conflicts are resolved first-writer-wins. The first committed rendering of
//! a term is authoritative; later disagreeing renderings are remembered as
//! alternates and rewritten back to the committed term by [`Glossary::apply`].

use crate::config::GlossaryConfig;
use crate::error::GlossaryError;
use crate::job::Substitution;
use crate::utils::collapse_whitespace;
use log::{debug, info};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, LazyLock};

/// One glossary shared by every chapter worker of a job.
///
/// Lock it for a single commit-or-lookup decision and drop the guard before
/// the next inference call.
pub type SharedGlossary = Arc<Mutex<Glossary>>;

/// Runs of capitalized words, optionally joined by a lowercase particle
/// ("House of Thorns", "Ludwig von Stein").
static CAPITALIZED_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b\p{Lu}[\p{L}\p{M}'’\-]*(?:[ \t]+(?:(?:of|the|de|du|von|van|del|la|le)[ \t]+)?\p{Lu}[\p{L}\p{M}'’\-]*)*",
    )
    .expect("Invalid CAPITALIZED_PHRASE")
});

/// Words starting lowercase; a capitalized word also seen like this is not a name.
static LOWERCASE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\p{Ll}[\p{L}\p{M}'’\-]*").expect("Invalid LOWERCASE_WORD"));

/// Katakana runs, typically transliterated names or invented terms in Japanese.
static KATAKANA_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{Katakana}ー]{2,}").expect("Invalid KATAKANA_RUN"));

/// Capitalized words that start sentences or address people, never terms.
const STOPWORDS: &[&str] = &[
    "i", "the", "a", "an", "this", "that", "these", "those", "it", "he", "she", "they", "we",
    "you", "my", "your", "his", "her", "our", "their", "its", "what", "who", "where", "when",
    "why", "how", "yes", "no", "oh", "ah", "hey", "well", "now", "then", "here", "there",
    "please", "thank", "thanks", "sorry", "hello", "hi", "goodbye", "bye", "ok", "okay", "but",
    "and", "or", "if", "so", "as", "at", "in", "on", "of", "for", "with", "without", "after",
    "before", "still", "just", "even", "only", "suddenly", "maybe", "perhaps", "again", "once",
    "not", "do", "did", "does", "is", "was", "are", "were", "be", "let", "every", "all", "some",
    "any", "each", "nothing", "everything", "someone", "something", "chapter", "meanwhile",
    "however", "although", "because", "while", "until", "instead", "yet", "though", "from",
    "to", "by", "into", "one", "two", "three",
];

/// Forms of address; the capitalized word after one is always a candidate.
const TITLES: &[&str] = &[
    "mr", "mrs", "ms", "dr", "sir", "lady", "lord", "captain", "king", "queen", "prince",
    "princess", "master", "mistress", "professor", "general", "doctor", "madam", "miss", "saint",
    "father", "mother", "uncle", "aunt", "duke", "duchess", "count", "countess", "commander",
];

/// Case-normalized glossary key: trimmed, whitespace collapsed, lowercased.
pub fn normalize_key(term: &str) -> String {
    collapse_whitespace(term).to_lowercase()
}

/// Regex matching `term` as a whole word, case-insensitively. Terms without
/// Latin letters (CJK) match as plain substrings since they have no word breaks.
fn term_pattern(term: &str) -> String {
    let escaped = regex::escape(term);
    if term.chars().any(|c| c.is_ascii_alphabetic()) {
        format!(r"\b{}\b", escaped)
    } else {
        escaped
    }
}

/// Build one case-insensitive alternation over `terms`, longest first.
fn alternation(terms: &[&str]) -> Option<Regex> {
    if terms.is_empty() {
        return None;
    }
    let mut sorted: Vec<&str> = terms.to_vec();
    sorted.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    sorted.dedup();
    let body = sorted
        .iter()
        .map(|t| term_pattern(t))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i)(?:{})", body)).ok()
}

/// Whether `term` occurs in `text` as a whole word, ignoring case.
pub fn contains_term(text: &str, term: &str) -> bool {
    Regex::new(&format!("(?i){}", term_pattern(term)))
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

/// Minimum normalized Levenshtein similarity for a phrase in a translation
/// to count as a respelling of a term.
const RESPELLING_SIMILARITY: f64 = 0.6;

/// Heuristic extraction thresholds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionRules {
    /// Occurrences in one chunk before a capitalized phrase counts.
    pub min_occurrences: usize,
    /// Shorter Latin candidates are dropped.
    pub min_term_chars: usize,
}

impl Default for ExtractionRules {
    fn default() -> Self {
        Self {
            min_occurrences: 2,
            min_term_chars: 3,
        }
    }
}

impl From<&GlossaryConfig> for ExtractionRules {
    fn from(config: &GlossaryConfig) -> Self {
        Self {
            min_occurrences: config.min_occurrences.max(1),
            min_term_chars: config.min_term_chars,
        }
    }
}

/// How a glossary mapping came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// First proposal seen during translation.
    Committed,
    /// Supplied by the user before the job started.
    Seeded,
    /// Explicit reconciliation decision replacing the committed term.
    Overridden,
}

/// One recorded change of a term's committed rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryChange {
    pub chapter: Option<usize>,
    pub chunk: Option<usize>,
    pub target: String,
    pub kind: ChangeKind,
}

/// A committed mapping for one source term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlossaryEntry {
    /// Source spelling as first seen.
    pub source: String,
    /// The committed target-language rendering.
    pub target: String,
    pub occurrences: u32,
    pub first_seen_chapter: Option<usize>,
    pub reaffirmed_in: BTreeSet<usize>,
    /// Rejected renderings, rewritten to `target` wherever they show up.
    pub alternates: BTreeSet<String>,
    pub history: Vec<GlossaryChange>,
}

/// A term found in a source chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Spelling as it appears in the chunk.
    pub surface: String,
    pub key: String,
}

/// What `reconcile` did with a proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No entry existed; the proposal is now committed.
    Committed,
    /// The proposal matched the committed term.
    Reaffirmed,
    /// The proposal disagreed and was discarded.
    Conflict { rejected: String },
}

/// Result of reconciling one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciliation {
    /// The rendering to use from now on.
    pub committed: String,
    pub outcome: ReconcileOutcome,
}

/// Summary numbers for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlossaryStats {
    pub total_terms: usize,
    pub total_occurrences: u64,
    /// Terms that have at least one rejected rendering.
    pub conflicted_terms: usize,
    pub most_used: Option<(String, u32)>,
}

/// Serializable form of the glossary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlossarySnapshot {
    pub terms: BTreeMap<String, GlossaryEntry>,
}

/// The term table.
#[derive(Debug, Clone, Default)]
pub struct Glossary {
    entries: BTreeMap<String, GlossaryEntry>,
    rules: ExtractionRules,
}

impl Glossary {
    pub fn new(rules: ExtractionRules) -> Self {
        Self {
            entries: BTreeMap::new(),
            rules,
        }
    }

    /// Wrap in the shared handle used by the orchestrator.
    pub fn into_shared(self) -> SharedGlossary {
        Arc::new(Mutex::new(self))
    }

    pub fn rules(&self) -> ExtractionRules {
        self.rules.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, term: &str) -> Option<&GlossaryEntry> {
        self.entries.get(&normalize_key(term))
    }

    /// The committed rendering of `term`, if any.
    pub fn committed(&self, term: &str) -> Option<&str> {
        self.get(term).map(|e| e.target.as_str())
    }

    /// All entries in key order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &GlossaryEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Identify candidate terms in a source chunk, in order of first appearance.
    ///
    /// Capitalized phrases need `min_occurrences` hits unless they follow a
    /// title ("Lady Mira") or are already in the glossary. Katakana runs follow
    /// the same count rule. Distinct spellings merge only when their
    /// normalized keys are equal.
    pub fn extract_candidates(&self, text: &str) -> Vec<Candidate> {
        struct Hit {
            pos: usize,
            surface: String,
            key: String,
            forced: bool,
        }

        let lowercase_words: HashSet<String> = LOWERCASE_WORD
            .find_iter(text)
            .map(|m| m.as_str().to_string())
            .collect();

        let mut hits: Vec<Hit> = Vec::new();

        for m in CAPITALIZED_PHRASE.find_iter(text) {
            let mut forced = follows_title(&text[..m.start()]);
            let mut words: Vec<&str> = m.as_str().split_whitespace().collect();

            // Drop leading stopwords and titles
            while let Some(first) = words.first() {
                let lower = first.to_lowercase();
                if TITLES.contains(&lower.as_str()) {
                    forced = true;
                    words.remove(0);
                } else if STOPWORDS.contains(&lower.as_str()) {
                    words.remove(0);
                } else {
                    break;
                }
            }
            if words.is_empty() {
                continue;
            }

            let joined = words.join(" ");
            let surface = strip_possessive(&joined);
            if surface.chars().count() < self.rules.min_term_chars {
                continue;
            }
            let lower = surface.to_lowercase();
            if words.len() == 1 && (STOPWORDS.contains(&lower.as_str()) || lowercase_words.contains(&lower)) {
                continue;
            }

            hits.push(Hit {
                pos: m.start(),
                key: normalize_key(&surface),
                surface,
                forced,
            });
        }

        for m in KATAKANA_RUN.find_iter(text) {
            hits.push(Hit {
                pos: m.start(),
                surface: m.as_str().to_string(),
                key: normalize_key(m.as_str()),
                forced: false,
            });
        }

        // Known terms always count, even on a single mention
        let known: Vec<&str> = self.entries.values().map(|e| e.source.as_str()).collect();
        if let Some(re) = alternation(&known) {
            for m in re.find_iter(text) {
                hits.push(Hit {
                    pos: m.start(),
                    surface: m.as_str().to_string(),
                    key: normalize_key(m.as_str()),
                    forced: true,
                });
            }
        }

        let mut counts: HashMap<&str, usize> = HashMap::new();
        let mut forced: HashSet<&str> = HashSet::new();
        for hit in &hits {
            *counts.entry(hit.key.as_str()).or_insert(0) += 1;
            if hit.forced {
                forced.insert(hit.key.as_str());
            }
        }

        let mut ordered: Vec<&Hit> = hits.iter().collect();
        ordered.sort_by_key(|h| h.pos);

        let mut seen: HashSet<&str> = HashSet::new();
        let mut candidates = Vec::new();
        for hit in ordered {
            let key = hit.key.as_str();
            if seen.contains(key) {
                continue;
            }
            let count = counts.get(key).copied().unwrap_or(0);
            if forced.contains(key) || count >= self.rules.min_occurrences {
                seen.insert(key);
                candidates.push(Candidate {
                    surface: hit.surface.clone(),
                    key: hit.key.clone(),
                });
            }
        }

        debug!("Extracted {} glossary candidates", candidates.len());
        candidates
    }

    /// The capitalized phrase in `translation` that most likely respells
    /// `reference` ("Arya" for "Aria").
    ///
    /// Only Latin-script references are matched. Stopwords, titles and the
    /// committed targets of other terms never qualify.
    pub fn find_respelling(&self, reference: &str, translation: &str) -> Option<String> {
        let reference = collapse_whitespace(reference).to_lowercase();
        if reference.chars().count() < self.rules.min_term_chars
            || !reference.chars().any(|c| c.is_ascii_alphabetic())
        {
            return None;
        }
        let width = reference.split_whitespace().count();
        let committed: HashSet<String> = self
            .entries
            .values()
            .map(|e| e.target.to_lowercase())
            .collect();

        let mut best: Option<(f64, String)> = None;
        for m in CAPITALIZED_PHRASE.find_iter(translation) {
            let words: Vec<&str> = m.as_str().split_whitespace().collect();
            for window in words.windows(width) {
                let phrase = strip_possessive(&window.join(" "));
                let lower = phrase.to_lowercase();
                if lower == reference
                    || committed.contains(&lower)
                    || STOPWORDS.contains(&lower.as_str())
                    || TITLES.contains(&lower.as_str())
                {
                    continue;
                }
                let score = strsim::normalized_levenshtein(&lower, &reference);
                if score >= RESPELLING_SIMILARITY
                    && best.as_ref().is_none_or(|(top, _)| score > *top)
                {
                    best = Some((score, phrase));
                }
            }
        }
        best.map(|(_, phrase)| phrase)
    }

    /// Commit, reaffirm or reject a proposed rendering of `term`.
    ///
    /// Returns `None` when the term or proposal is blank.
    pub fn reconcile(
        &mut self,
        term: &str,
        proposed: &str,
        chapter: usize,
        chunk: usize,
    ) -> Option<Reconciliation> {
        let key = normalize_key(term);
        let proposed = collapse_whitespace(proposed);
        if key.is_empty() || proposed.is_empty() {
            return None;
        }

        let Some(entry) = self.entries.get_mut(&key) else {
            debug!("Committed glossary term '{}' -> '{}'", term, proposed);
            self.entries.insert(
                key,
                GlossaryEntry {
                    source: collapse_whitespace(term),
                    target: proposed.clone(),
                    occurrences: 1,
                    first_seen_chapter: Some(chapter),
                    reaffirmed_in: BTreeSet::new(),
                    alternates: BTreeSet::new(),
                    history: vec![GlossaryChange {
                        chapter: Some(chapter),
                        chunk: Some(chunk),
                        target: proposed.clone(),
                        kind: ChangeKind::Committed,
                    }],
                },
            );
            return Some(Reconciliation {
                committed: proposed,
                outcome: ReconcileOutcome::Committed,
            });
        };

        entry.occurrences += 1;
        if entry.first_seen_chapter.is_none() {
            entry.first_seen_chapter = Some(chapter);
        }

        if entry.target.to_lowercase() == proposed.to_lowercase() {
            entry.reaffirmed_in.insert(chapter);
            return Some(Reconciliation {
                committed: entry.target.clone(),
                outcome: ReconcileOutcome::Reaffirmed,
            });
        }

        debug!(
            "Glossary conflict for '{}': keeping '{}', rejecting '{}'",
            term, entry.target, proposed
        );
        entry.alternates.insert(proposed.clone());
        Some(Reconciliation {
            committed: entry.target.clone(),
            outcome: ReconcileOutcome::Conflict { rejected: proposed },
        })
    }

    /// Explicitly replace the committed rendering of an existing term.
    ///
    /// The previous rendering becomes an alternate. Returns it, or `None`
    /// when the term is unknown.
    pub fn override_term(
        &mut self,
        term: &str,
        target: &str,
        chapter: Option<usize>,
        chunk: Option<usize>,
    ) -> Option<String> {
        self.replace_target(term, target, chapter, chunk, ChangeKind::Overridden)
    }

    fn replace_target(
        &mut self,
        term: &str,
        target: &str,
        chapter: Option<usize>,
        chunk: Option<usize>,
        kind: ChangeKind,
    ) -> Option<String> {
        let target = collapse_whitespace(target);
        let entry = self.entries.get_mut(&normalize_key(term))?;
        if target.is_empty() {
            return None;
        }
        let previous = std::mem::replace(&mut entry.target, target.clone());
        entry.alternates.remove(&target);
        if previous.to_lowercase() != target.to_lowercase() {
            entry.alternates.insert(previous.clone());
        }
        entry.history.push(GlossaryChange {
            chapter,
            chunk,
            target,
            kind,
        });
        info!("Glossary term '{}' now renders as '{}'", term, entry.target);
        Some(previous)
    }

    /// Pre-commit a user-supplied mapping. Seeds are authoritative.
    pub fn seed(&mut self, term: &str, target: &str) {
        let key = normalize_key(term);
        let target = collapse_whitespace(target);
        if key.is_empty() || target.is_empty() {
            return;
        }
        if self.entries.contains_key(&key) {
            self.replace_target(term, &target, None, None, ChangeKind::Seeded);
            return;
        }
        self.entries.insert(
            key,
            GlossaryEntry {
                source: collapse_whitespace(term),
                target: target.clone(),
                occurrences: 0,
                first_seen_chapter: None,
                reaffirmed_in: BTreeSet::new(),
                alternates: BTreeSet::new(),
                history: vec![GlossaryChange {
                    chapter: None,
                    chunk: None,
                    target,
                    kind: ChangeKind::Seeded,
                }],
            },
        );
    }

    /// Load `{"term": "translation", ...}` seeds from a JSON file.
    pub fn load_seed_file(&mut self, path: &Path) -> Result<usize, GlossaryError> {
        let content = std::fs::read_to_string(path)?;
        let seeds: BTreeMap<String, String> = serde_json::from_str(&content)?;
        for (term, target) in &seeds {
            self.seed(term, target);
        }
        info!("Seeded {} glossary terms from {}", seeds.len(), path.display());
        Ok(seeds.len())
    }

    /// Rewrite rejected renderings in a translated chunk to their committed term.
    ///
    /// Whole-word, longest match first, single pass. A match must share the
    /// case of its recorded spelling's first letter, so "rosa" the noun
    /// survives when "Rosa" was rejected. An all-uppercase match is replaced
    /// in uppercase. Renderings that are some entry's committed target are
    /// never rewritten.
    pub fn apply(&self, text: &str) -> (String, Vec<Substitution>) {
        let committed: HashSet<String> = self
            .entries
            .values()
            .map(|e| e.target.to_lowercase())
            .collect();

        // lowercased variant -> (recorded spelling, committed target)
        let mut replacements: HashMap<String, (&str, &str)> = HashMap::new();
        for entry in self.entries.values() {
            let variants = entry
                .alternates
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(entry.source.as_str()));
            for variant in variants {
                let lower = variant.to_lowercase();
                if committed.contains(&lower) {
                    continue;
                }
                replacements
                    .entry(lower)
                    .or_insert((variant, entry.target.as_str()));
            }
        }

        let keys: Vec<&str> = replacements.keys().map(String::as_str).collect();
        let Some(re) = alternation(&keys) else {
            return (text.to_string(), Vec::new());
        };

        let mut substitutions: Vec<Substitution> = Vec::new();
        let rewritten = re.replace_all(text, |caps: &regex::Captures| {
            let matched = &caps[0];
            let Some(&(variant, target)) = replacements.get(&matched.to_lowercase()) else {
                return matched.to_string();
            };
            let shouting = matched.chars().count() > 1
                && matched.chars().any(char::is_uppercase)
                && !matched.chars().any(char::is_lowercase);
            if !shouting && !same_initial_case(matched, variant) {
                return matched.to_string();
            }
            let replacement = if shouting {
                target.to_uppercase()
            } else {
                target.to_string()
            };
            let sub = Substitution {
                from: matched.to_string(),
                to: replacement.clone(),
            };
            if !substitutions.contains(&sub) {
                substitutions.push(sub);
            }
            replacement
        });

        (rewritten.into_owned(), substitutions)
    }

    pub fn stats(&self) -> GlossaryStats {
        let most_used = self
            .entries
            .values()
            .filter(|e| e.occurrences > 0)
            .max_by(|a, b| {
                a.occurrences
                    .cmp(&b.occurrences)
                    .then_with(|| b.source.cmp(&a.source))
            })
            .map(|e| (e.source.clone(), e.occurrences));

        GlossaryStats {
            total_terms: self.entries.len(),
            total_occurrences: self.entries.values().map(|e| e.occurrences as u64).sum(),
            conflicted_terms: self
                .entries
                .values()
                .filter(|e| !e.alternates.is_empty())
                .count(),
            most_used,
        }
    }

    pub fn snapshot(&self) -> GlossarySnapshot {
        GlossarySnapshot {
            terms: self.entries.clone(),
        }
    }

    pub fn restore(snapshot: GlossarySnapshot, rules: ExtractionRules) -> Self {
        Self {
            entries: snapshot.terms,
            rules,
        }
    }

    /// Save a snapshot to disk.
    pub fn save_to(&self, path: &Path) -> Result<(), GlossaryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path, content).map_err(|e| GlossaryError::Write(e.to_string()))
    }

    /// Load a snapshot from disk.
    pub fn load_from(path: &Path, rules: ExtractionRules) -> Result<Self, GlossaryError> {
        let content = std::fs::read_to_string(path)?;
        let snapshot: GlossarySnapshot = serde_json::from_str(&content)?;
        Ok(Self::restore(snapshot, rules))
    }
}

/// Whether the text right before a match ends with a title such as "Mr." or "Lady".
/// Whether both strings start with a letter of the same case. Caseless
/// scripts always agree.
fn same_initial_case(a: &str, b: &str) -> bool {
    match (a.chars().next(), b.chars().next()) {
        (Some(x), Some(y)) => x.is_uppercase() == y.is_uppercase(),
        _ => true,
    }
}

fn follows_title(before: &str) -> bool {
    before
        .trim_end()
        .trim_end_matches('.')
        .rsplit(char::is_whitespace)
        .next()
        .map(|w| TITLES.contains(&w.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn strip_possessive(s: &str) -> String {
    let trimmed = s
        .strip_suffix("'s")
        .or_else(|| s.strip_suffix("’s"))
        .unwrap_or(s);
    trimmed
        .trim_end_matches(['\'', '’', '-'])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn surfaces(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.surface.as_str()).collect()
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("  Lady   Mira "), "lady mira");
        assert_eq!(normalize_key("ARIA"), normalize_key("Aria"));
    }

    #[test]
    fn test_extracts_repeated_capitalized_terms() {
        let glossary = Glossary::default();
        let text = "Then Aria met Corvin at the gate. Corvin bowed, and Aria laughed.";
        let candidates = glossary.extract_candidates(text);
        assert_eq!(surfaces(&candidates), vec!["Aria", "Corvin"]);
    }

    #[test]
    fn test_single_mention_not_a_candidate() {
        let glossary = Glossary::default();
        let candidates = glossary.extract_candidates("They walked toward Brightwater in silence.");
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_title_forces_candidate() {
        let glossary = Glossary::default();
        let text = "She bowed to Lady Mira. Later Mr. Holt arrived.";
        let candidates = glossary.extract_candidates(text);
        assert_eq!(surfaces(&candidates), vec!["Mira", "Holt"]);
    }

    #[test]
    fn test_multi_word_phrase_with_particle() {
        let glossary = Glossary::default();
        let text = "The banner of the House of Thorns rose. All feared the House of Thorns.";
        let candidates = glossary.extract_candidates(text);
        assert_eq!(surfaces(&candidates), vec!["House of Thorns"]);
    }

    #[test]
    fn test_stopwords_and_lowercase_words_excluded() {
        let glossary = Glossary::default();
        let text = "Still, she waited. Still nothing. It was still dark. However, However.";
        assert!(glossary.extract_candidates(text).is_empty());
    }

    #[test]
    fn test_possessive_stripped() {
        let glossary = Glossary::default();
        let text = "We took Aria's sword. Only Aria could lift it.";
        let candidates = glossary.extract_candidates(text);
        assert_eq!(surfaces(&candidates), vec!["Aria"]);
    }

    #[test]
    fn test_case_variants_merge_only_when_normalized_equal() {
        let glossary = Glossary::default();
        let text = "ARIA shouted at Aria. The Ariadne sailed; the Ariadne sank.";
        let candidates = glossary.extract_candidates(text);
        let keys: Vec<&str> = candidates.iter().map(|c| c.key.as_str()).collect();
        assert_eq!(keys, vec!["aria", "ariadne"]);
    }

    #[test]
    fn test_katakana_runs() {
        let glossary = Glossary::default();
        let text = "アリアは笑った。アリアの剣は重い。";
        let candidates = glossary.extract_candidates(text);
        assert_eq!(surfaces(&candidates), vec!["アリア"]);
    }

    #[test]
    fn test_known_terms_always_candidates() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Eldermoor", "Eldermoor", 0, 0);
        let candidates = glossary.extract_candidates("They left eldermoor at dawn.");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].key, "eldermoor");
    }

    #[test]
    fn test_reconcile_first_commit() {
        let mut glossary = Glossary::default();
        let r = glossary.reconcile("Aria", "Aria", 0, 1).unwrap();
        assert_eq!(r.committed, "Aria");
        assert_eq!(r.outcome, ReconcileOutcome::Committed);

        let entry = glossary.get("aria").unwrap();
        assert_eq!(entry.occurrences, 1);
        assert_eq!(entry.first_seen_chapter, Some(0));
        assert_eq!(entry.history.len(), 1);
        assert_eq!(entry.history[0].kind, ChangeKind::Committed);
        assert_eq!(entry.history[0].chunk, Some(1));
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut glossary = Glossary::default();
        let first = glossary.reconcile("Aria", "Aria", 0, 0).unwrap();
        let second = glossary.reconcile("Aria", "aria", 1, 0).unwrap();

        assert_eq!(first.committed, second.committed);
        assert_eq!(second.outcome, ReconcileOutcome::Reaffirmed);
        let entry = glossary.get("Aria").unwrap();
        assert_eq!(entry.occurrences, 2);
        assert!(entry.reaffirmed_in.contains(&1));
        assert!(entry.alternates.is_empty());
        assert_eq!(entry.history.len(), 1);
    }

    #[test]
    fn test_reconcile_first_writer_wins() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        let r = glossary.reconcile("Aria", "Arya", 1, 3).unwrap();

        assert_eq!(r.committed, "Aria");
        assert_eq!(
            r.outcome,
            ReconcileOutcome::Conflict {
                rejected: "Arya".to_string()
            }
        );
        let entry = glossary.get("Aria").unwrap();
        assert_eq!(entry.target, "Aria");
        assert!(entry.alternates.contains("Arya"));
        // Mapping unchanged, so no new history
        assert_eq!(entry.history.len(), 1);
    }

    #[test]
    fn test_reconcile_ignores_blank() {
        let mut glossary = Glossary::default();
        assert!(glossary.reconcile("  ", "x", 0, 0).is_none());
        assert!(glossary.reconcile("Aria", " ", 0, 0).is_none());
        assert!(glossary.is_empty());
    }

    #[test]
    fn test_apply_rewrites_alternates() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        glossary.reconcile("Aria", "Arya", 1, 0);

        let (text, subs) = glossary.apply("Arya smiled. ARYA! Aryan is a different word.");
        assert_eq!(text, "Aria smiled. ARIA! Aryan is a different word.");
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].from, "Arya");
        assert_eq!(subs[0].to, "Aria");
    }

    #[test]
    fn test_apply_leaves_lowercase_common_words() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Rose", "Rose", 0, 0);
        glossary.reconcile("Rose", "Rosa", 1, 0);

        let (text, subs) = glossary.apply("Le dio una rosa roja.");
        assert_eq!(text, "Le dio una rosa roja.");
        assert!(subs.is_empty());

        let (text, subs) = glossary.apply("Rosa le dio una rosa. ROSA!");
        assert_eq!(text, "Rose le dio una rosa. ROSE!");
        assert_eq!(subs.len(), 2);
    }

    #[test]
    fn test_apply_rewrites_untranslated_source() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Eldermoor", "Bosque Antiguo", 0, 0);

        let (text, _) = glossary.apply("Volvieron a Eldermoor.");
        assert_eq!(text, "Volvieron a Bosque Antiguo.");
    }

    #[test]
    fn test_apply_never_touches_committed_targets() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Mira", "Arya", 0, 0);
        glossary.reconcile("Aria", "Aria", 0, 0);
        glossary.reconcile("Aria", "Arya", 1, 0);

        let (text, subs) = glossary.apply("Arya and Aria");
        assert_eq!(text, "Arya and Aria");
        assert!(subs.is_empty());
    }

    #[test]
    fn test_apply_longest_first() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Thorn", "Thorn", 0, 0);
        glossary.reconcile("Thorn", "Espina", 0, 1);
        glossary.reconcile("Thorn Keep", "Thorn Keep", 0, 0);
        glossary.reconcile("Thorn Keep", "Espina Fortaleza", 0, 1);

        let (text, _) = glossary.apply("Espina Fortaleza, Espina.");
        assert_eq!(text, "Thorn Keep, Thorn.");
    }

    #[test]
    fn test_apply_cjk_substring() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "アリア", 0, 0);
        glossary.reconcile("Aria", "アリヤ", 1, 0);

        let (text, _) = glossary.apply("アリヤは笑った。");
        assert_eq!(text, "アリアは笑った。");
    }

    #[test]
    fn test_find_respelling() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Corvin", "Corvin", 0, 0);

        assert_eq!(
            glossary.find_respelling("Aria", "Then Arya walked home.").as_deref(),
            Some("Arya")
        );
        assert_eq!(
            glossary.find_respelling("Aria", "Arya's sword broke.").as_deref(),
            Some("Arya")
        );
        // Other committed targets and unrelated words are not respellings
        assert!(glossary.find_respelling("Corvan", "Corvin left.").is_none());
        assert!(glossary.find_respelling("Aria", "Then Mira left.").is_none());
        assert!(glossary.find_respelling("アリア", "アリヤは笑った").is_none());
        assert_eq!(
            glossary
                .find_respelling("Thorn Keep", "They reached Thorn Kep at noon.")
                .as_deref(),
            Some("Thorn Kep")
        );
    }

    #[test]
    fn test_override_records_history() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Corvin", "Corbin", 0, 0);
        let previous = glossary.override_term("Corvin", "Corvin", Some(2), Some(4));

        assert_eq!(previous.as_deref(), Some("Corbin"));
        let entry = glossary.get("Corvin").unwrap();
        assert_eq!(entry.target, "Corvin");
        assert!(entry.alternates.contains("Corbin"));
        assert_eq!(entry.history.len(), 2);
        assert_eq!(entry.history[1].kind, ChangeKind::Overridden);
        assert_eq!(entry.history[1].chapter, Some(2));

        assert!(glossary.override_term("Nobody", "X", None, None).is_none());
    }

    #[test]
    fn test_seed_then_conflict() {
        let mut glossary = Glossary::default();
        glossary.seed("Eldermoor", "Oldmoor");
        let r = glossary.reconcile("Eldermoor", "Eldermoor", 0, 0).unwrap();
        assert_eq!(r.committed, "Oldmoor");
        assert!(matches!(r.outcome, ReconcileOutcome::Conflict { .. }));
        assert_eq!(glossary.get("Eldermoor").unwrap().first_seen_chapter, Some(0));
    }

    #[test]
    fn test_load_seed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("seed.json");
        std::fs::write(&path, r#"{"Aria": "Aria", "Corvin": "Korwin"}"#).unwrap();

        let mut glossary = Glossary::default();
        assert_eq!(glossary.load_seed_file(&path).unwrap(), 2);
        assert_eq!(glossary.committed("corvin"), Some("Korwin"));

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            glossary.load_seed_file(&path),
            Err(GlossaryError::Parse(_))
        ));
    }

    #[test]
    fn test_stats() {
        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        glossary.reconcile("Aria", "Aria", 0, 1);
        glossary.reconcile("Aria", "Arya", 1, 0);
        glossary.reconcile("Corvin", "Corvin", 0, 0);

        let stats = glossary.stats();
        assert_eq!(stats.total_terms, 2);
        assert_eq!(stats.total_occurrences, 4);
        assert_eq!(stats.conflicted_terms, 1);
        assert_eq!(stats.most_used, Some(("Aria".to_string(), 3)));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("glossary.json");

        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        glossary.reconcile("Aria", "Arya", 1, 2);
        glossary.save_to(&path).unwrap();

        let reloaded = Glossary::load_from(&path, ExtractionRules::default()).unwrap();
        assert_eq!(reloaded.snapshot(), glossary.snapshot());
        assert!(reloaded.get("aria").unwrap().alternates.contains("Arya"));
    }
}

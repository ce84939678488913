//! Term reconciliation for one translated chunk.
//!
//! For every candidate term in the source, find the rendering the model
//! actually used, settle it against the shared glossary and rewrite drift
//! back to the committed term.

use crate::glossary::{Candidate, ReconcileOutcome, SharedGlossary, contains_term};
use crate::inference::{InferenceGateway, TranslateRequest};
use crate::job::{Substitution, Warning};
use crate::utils::preview;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Extra words tolerated in a model's answer about a single term.
const MAX_EXTRA_WORDS: usize = 3;

/// Strip quotes and trailing punctuation a model tends to add around a single term.
fn clean_term(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '“' | '”' | '「' | '」' | '.' | '。'))
        .trim()
        .to_string()
}

/// A chunk's translation after term reconciliation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TermPass {
    pub text: String,
    pub substitutions: Vec<Substitution>,
    /// One `glossary_conflict` per rejected rendering.
    pub warnings: Vec<Warning>,
}

/// Reconciles candidate terms of one chapter against the glossary.
///
/// Standalone term translations are memoized for the lifetime of the value,
/// so create one per chapter.
pub struct TermReconciler {
    gateway: InferenceGateway,
    glossary: SharedGlossary,
    memo: Mutex<HashMap<String, Option<String>>>,
}

impl TermReconciler {
    pub fn new(gateway: InferenceGateway, glossary: SharedGlossary) -> Self {
        Self {
            gateway,
            glossary,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn glossary(&self) -> &SharedGlossary {
        &self.glossary
    }

    /// Reconcile every candidate term of `request.text` against `translation`
    /// and return the rewritten translation.
    ///
    /// The glossary lock is taken once per decision and never held while a
    /// term translation is in flight.
    pub async fn reconcile_chunk(
        &self,
        request: &TranslateRequest,
        translation: &str,
        chapter: usize,
        chunk: usize,
    ) -> TermPass {
        let candidates = self.glossary.lock().extract_candidates(&request.text);
        let mut warnings = Vec::new();

        for candidate in candidates {
            let Some(rendering) = self.rendering(request, &candidate, translation).await else {
                continue;
            };
            let reconciliation =
                self.glossary
                    .lock()
                    .reconcile(&candidate.surface, &rendering, chapter, chunk);
            if let Some(r) = reconciliation {
                if let ReconcileOutcome::Conflict { rejected } = r.outcome {
                    warnings.push(Warning::GlossaryConflict {
                        term: candidate.surface.clone(),
                        chapter,
                        chunk,
                        rejected,
                        kept: r.committed,
                    });
                }
            }
        }

        let (text, substitutions) = self.glossary.lock().apply(translation);
        TermPass {
            text,
            substitutions,
            warnings,
        }
    }

    /// How `candidate` was rendered in `translation`.
    ///
    /// Tried in order: the committed target, the untranslated source
    /// spelling, the standalone translation of the term, the model's own
    /// answer with the translation as context, and finally the closest
    /// respelling. `None` only when the term cannot be translated at all.
    async fn rendering(
        &self,
        request: &TranslateRequest,
        candidate: &Candidate,
        translation: &str,
    ) -> Option<String> {
        let committed = self
            .glossary
            .lock()
            .committed(&candidate.surface)
            .map(str::to_string);
        if let Some(committed) = committed.as_ref().filter(|c| contains_term(translation, c)) {
            return Some(committed.clone());
        }
        if contains_term(translation, &candidate.surface) {
            return Some(candidate.surface.clone());
        }

        let standalone = self.standalone(request, candidate).await?;
        if contains_term(translation, &standalone) {
            return Some(standalone);
        }

        if let Some(found) = self.in_context(request, candidate, translation).await {
            return Some(found);
        }

        let reference = committed.as_deref().unwrap_or(&standalone);
        let respelling = self.glossary.lock().find_respelling(reference, translation);
        if let Some(found) = respelling {
            debug!(
                "'{}' appears as '{}' in the translation",
                candidate.surface, found
            );
            return Some(found);
        }
        Some(standalone)
    }

    /// The term translated on its own, once per term key.
    async fn standalone(&self, request: &TranslateRequest, candidate: &Candidate) -> Option<String> {
        if let Some(memo) = self.memo.lock().get(&candidate.key) {
            return memo.clone();
        }
        let result = self
            .gateway
            .translate(&request.for_text(&candidate.surface))
            .await;
        let proposal = match result {
            Ok(raw) => Some(clean_term(&raw)).filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(
                    "Skipping glossary term '{}': {}",
                    preview(&candidate.surface, 40),
                    e
                );
                None
            }
        };
        self.memo
            .lock()
            .insert(candidate.key.clone(), proposal.clone());
        proposal
    }

    /// Ask the model which words of `translation` render the term. The answer
    /// only counts when it actually occurs in `translation`.
    async fn in_context(
        &self,
        request: &TranslateRequest,
        candidate: &Candidate,
        translation: &str,
    ) -> Option<String> {
        let hint = format!(
            "Reply with only the words that render this term in the following translation: {}",
            translation
        );
        let lookup = request.for_text(&candidate.surface).with_hint(hint);
        match self.gateway.translate(&lookup).await {
            Ok(raw) => {
                let answer = clean_term(&raw);
                let limit = candidate.surface.split_whitespace().count() + MAX_EXTRA_WORDS;
                (!answer.is_empty()
                    && answer.split_whitespace().count() <= limit
                    && contains_term(translation, &answer))
                .then_some(answer)
            }
            Err(e) => {
                debug!(
                    "No in-context rendering for '{}': {}",
                    preview(&candidate.surface, 40),
                    e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glossary::Glossary;
    use crate::inference::testing::{ScriptedBackend, gateway};
    use std::sync::atomic::Ordering;

    fn request(text: &str) -> TranslateRequest {
        TranslateRequest::new(text, "en", "es")
    }

    fn committed_aria() -> SharedGlossary {
        let mut glossary = Glossary::default();
        glossary.reconcile("Aria", "Aria", 0, 0);
        glossary.into_shared()
    }

    #[test]
    fn test_clean_term() {
        assert_eq!(clean_term(" \"Arya.\" "), "Arya");
        assert_eq!(clean_term("「アリア」"), "アリア");
    }

    #[tokio::test]
    async fn test_committed_rendering_reaffirmed_without_calls() {
        let (gw, backend) = gateway(ScriptedBackend::echo());
        let terms = TermReconciler::new(gw, committed_aria());

        let pass = terms
            .reconcile_chunk(&request("Aria smiled."), "Aria sonrió.", 1, 0)
            .await;

        assert_eq!(pass.text, "Aria sonrió.");
        assert!(pass.warnings.is_empty());
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 0);
        assert!(terms.glossary().lock().get("Aria").unwrap().reaffirmed_in.contains(&1));
    }

    #[tokio::test]
    async fn test_in_context_drift_is_a_conflict() {
        // Alone the name stays "Aria"; inside the sentence the model wrote "Arya"
        let (gw, _) = gateway(ScriptedBackend::with_translate(|req| Ok(req.text.clone())));
        let terms = TermReconciler::new(gw, committed_aria());

        let pass = terms
            .reconcile_chunk(&request("Aria walked home alone."), "Arya walked home alone.", 1, 0)
            .await;

        assert_eq!(pass.text, "Aria walked home alone.");
        assert_eq!(
            pass.warnings,
            vec![Warning::GlossaryConflict {
                term: "Aria".to_string(),
                chapter: 1,
                chunk: 0,
                rejected: "Arya".to_string(),
                kept: "Aria".to_string(),
            }]
        );
        assert!(terms.glossary().lock().get("Aria").unwrap().alternates.contains("Arya"));
    }

    #[tokio::test]
    async fn test_model_names_the_in_context_rendering() {
        let (gw, backend) = gateway(ScriptedBackend::with_translate(|req| {
            Ok(match (&req.hint, req.text.as_str()) {
                (Some(_), "Corvin") => "\"Cuervo\"".to_string(),
                (None, "Corvin") => "Corvino".to_string(),
                _ => req.text.clone(),
            })
        }));
        let mut glossary = Glossary::default();
        glossary.reconcile("Corvin", "Corvino", 0, 0);
        let terms = TermReconciler::new(gw, glossary.into_shared());

        let pass = terms
            .reconcile_chunk(&request("Then Corvin left."), "Entonces Cuervo se fue.", 2, 3)
            .await;

        assert_eq!(pass.text, "Entonces Corvino se fue.");
        assert!(matches!(
            pass.warnings.as_slice(),
            [Warning::GlossaryConflict { rejected, .. }] if rejected == "Cuervo"
        ));
        // One standalone translation and one in-context lookup
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_standalone_translation_memoized() {
        let (gw, backend) = gateway(ScriptedBackend::with_translate(|req| {
            Ok(if req.text == "Eldermoor" && req.hint.is_none() {
                "Bosque Antiguo".to_string()
            } else {
                req.text.clone()
            })
        }));
        let terms = TermReconciler::new(gw, Glossary::default().into_shared());
        let source = "Eldermoor burned. Eldermoor fell.";

        let first = terms
            .reconcile_chunk(&request(source), "Bosque Antiguo ardió y cayó.", 0, 0)
            .await;
        let second = terms
            .reconcile_chunk(&request(source), "El bosque cayó.", 0, 1)
            .await;

        assert!(first.warnings.is_empty() && second.warnings.is_empty());
        assert_eq!(
            terms.glossary().lock().committed("Eldermoor"),
            Some("Bosque Antiguo")
        );
        assert_eq!(second.text, "El bosque cayó.");
        // The second chunk reuses the standalone translation and only asks in context
        assert_eq!(backend.translate_calls.load(Ordering::SeqCst), 2);
    }
}

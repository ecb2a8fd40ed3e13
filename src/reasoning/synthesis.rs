//! Cited answer synthesis.
//!
//! The model must end every sentence with citations, either `[E<n>]`
//! evidence labels or literal `[sourceRef]`s. An answer with uncited
//! sentences is rejected and retried with a stricter prompt; if retries run
//! out, only the cited sentences survive, and if none do the answer is built
//! extractively from the best evidence.

use crate::domain::{
    Answer, Citation, Confidence, EvidenceItem, Phase, ReasoningState, TraceEventKind,
};
use crate::llm::{LanguageModel, complete_within, prompts};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Evidence items quoted by an extractive answer.
const EXTRACTIVE_ITEMS: usize = 3;

/// Abbreviations whose trailing period does not end a sentence, compared
/// case-insensitively without that period.
const ABBREVIATIONS: &[&str] = &["et al", "al", "e.g", "i.e", "vs", "approx", "fig", "figs", "cf", "ca"];

/// Sentences of a model answer with the evidence each one validly cites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedSentence {
    pub text: String,
    pub source_refs: Vec<String>,
}

impl CheckedSentence {
    pub fn is_cited(&self) -> bool {
        !self.source_refs.is_empty()
    }
}

/// Split text into sentences.
///
/// A sentence ends at `.`, `!` or `?` followed by whitespace or the end of
/// the text, or at a line break. Terminators inside brackets do not count,
/// nor periods after an abbreviation or initial. Bracket groups right after
/// a terminator (`... Y. [E1]`) stay with the sentence they follow.
/// Fragments without any letter are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            _ => {}
        }

        if depth == 0 && c == '\n' {
            push_sentence(&mut sentences, &mut current);
            i += 1;
            continue;
        }
        current.push(c);

        let terminal = depth == 0
            && matches!(c, '.' | '!' | '?')
            && chars.get(i + 1).is_none_or(|n| n.is_whitespace())
            && !(c == '.' && ends_with_abbreviation(&current, next_visible(&chars[i + 1..])));
        if terminal {
            // Absorb trailing citation groups on the same line.
            let mut j = i + 1;
            loop {
                let mut k = j;
                while k < chars.len() && chars[k] != '\n' && chars[k].is_whitespace() {
                    k += 1;
                }
                if k < chars.len() && chars[k] == '[' {
                    let Some(close) = chars[k..].iter().position(|&ch| ch == ']') else {
                        break;
                    };
                    current.push(' ');
                    current.extend(&chars[k..=k + close]);
                    j = k + close + 1;
                } else {
                    break;
                }
            }
            push_sentence(&mut sentences, &mut current);
            i = j;
            continue;
        }
        i += 1;
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn next_visible(rest: &[char]) -> Option<char> {
    rest.iter().copied().find(|c| !c.is_whitespace())
}

/// Whether the period ending `text` belongs to an abbreviation rather than
/// ending the sentence, given the next visible character.
///
/// Lowercase continuations never start a sentence. A single capital letter
/// is an initial only when a capitalised word follows and the word before it
/// is not capitalised, so `by J. Doe` holds together while `Gene Y. More`
/// and `Gene Y. [E1]` still split.
fn ends_with_abbreviation(text: &str, next: Option<char>) -> bool {
    let Some(next) = next.filter(|&c| c != '[') else {
        return false;
    };
    if next.is_lowercase() {
        return true;
    }
    let body = text.strip_suffix('.').unwrap_or(text);
    let mut words = body.rsplit(|c: char| c.is_whitespace() || c == '(').filter(|w| !w.is_empty());
    let word = words.next().unwrap_or_default();
    let mut letters = word.chars();
    if let (Some(first), None) = (letters.next(), letters.next()) {
        if first.is_uppercase() {
            let previous_capitalised = words
                .next()
                .and_then(|w| w.chars().next())
                .is_some_and(char::is_uppercase);
            return next.is_uppercase() && !previous_capitalised;
        }
    }
    let lower = body.to_lowercase();
    ABBREVIATIONS.iter().any(|abbr| {
        lower.ends_with(abbr)
            && lower[..lower.len() - abbr.len()]
                .chars()
                .next_back()
                .is_none_or(|c| c.is_whitespace() || c == '(')
    })
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let sentence = current.trim();
    if outside_brackets(sentence).any(char::is_alphabetic) {
        sentences.push(sentence.to_string());
    }
    current.clear();
}

fn outside_brackets(text: &str) -> impl Iterator<Item = char> + '_ {
    let mut depth = 0usize;
    text.chars().filter(move |&c| match c {
        '[' => {
            depth += 1;
            false
        }
        ']' => {
            depth = depth.saturating_sub(1);
            false
        }
        _ => depth == 0,
    })
}

/// Contents of every `[...]` group, split on commas and semicolons.
pub fn bracket_refs(sentence: &str) -> Vec<String> {
    let mut refs = Vec::new();
    let mut rest = sentence;
    while let Some(open) = rest.find('[') {
        let after = &rest[open + 1..];
        let Some(close) = after.find(']') else {
            break;
        };
        refs.extend(
            after[..close]
                .split([',', ';'])
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
        );
        rest = &after[close + 1..];
    }
    refs
}

/// Map a citation token to the source ref it denotes, if it denotes one.
fn resolve_ref(token: &str, evidence: &[EvidenceItem]) -> Option<String> {
    if let Some(item) = evidence.iter().find(|e| e.source_ref == token) {
        return Some(item.source_ref.clone());
    }
    let number = token.strip_prefix(['E', 'e'])?.parse::<usize>().ok()?;
    evidence
        .get(number.checked_sub(1)?)
        .map(|e| e.source_ref.clone())
}

/// Split an answer into sentences and resolve each one's citations.
pub fn check_citations(answer: &str, evidence: &[EvidenceItem]) -> Vec<CheckedSentence> {
    split_sentences(answer)
        .into_iter()
        .map(|text| {
            let mut seen = HashSet::new();
            let source_refs = bracket_refs(&text)
                .iter()
                .filter_map(|token| resolve_ref(token, evidence))
                .filter(|r| seen.insert(r.clone()))
                .collect();
            CheckedSentence { text, source_refs }
        })
        .collect()
}

fn to_citations(sentences: &[CheckedSentence]) -> Vec<Citation> {
    sentences
        .iter()
        .map(|s| Citation {
            sentence: s.text.clone(),
            source_refs: s.source_refs.clone(),
        })
        .collect()
}

/// One sentence per top-ranked evidence item, each citing its item.
pub fn extractive_answer(evidence: &[EvidenceItem]) -> Answer {
    let mut ranked: Vec<&EvidenceItem> = evidence.iter().collect();
    ranked.sort_by(|a, b| a.rank_cmp(b));

    let citations: Vec<Citation> = ranked
        .into_iter()
        .take(EXTRACTIVE_ITEMS)
        .map(|item| {
            let first = split_sentences(&item.payload_text)
                .into_iter()
                .next()
                .unwrap_or_else(|| item.payload_text.trim().to_string());
            let body = first.trim_end_matches(['.', '!', '?']).trim();
            Citation {
                sentence: format!("{body} [{}].", item.source_ref),
                source_refs: vec![item.source_ref.clone()],
            }
        })
        .collect();

    Answer {
        text: citations
            .iter()
            .map(|c| c.sentence.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        citations,
        confidence: Confidence::Degraded,
    }
}

/// Why synthesis produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NothingToCite;

/// Writes the final answer from accumulated evidence.
#[derive(Debug, Clone)]
pub struct Synthesizer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    retries: usize,
}

impl Synthesizer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, retries: usize) -> Self {
        Self {
            model,
            timeout,
            retries,
        }
    }

    /// Produce an answer where every sentence cites at least one evidence item.
    ///
    /// Rejections and degradations are recorded in the state's trace.
    pub async fn synthesize(&self, state: &mut ReasoningState) -> Result<Answer, NothingToCite> {
        if state.evidence.is_empty() {
            state.record(
                Phase::Synthesizing,
                TraceEventKind::SynthesisDegraded {
                    reason: "no evidence to cite".into(),
                },
            );
            return Err(NothingToCite);
        }

        let mut last: Vec<CheckedSentence> = Vec::new();
        for attempt in 0..=self.retries {
            let prompt = prompts::synthesize(&state.query, &state.evidence, attempt > 0);
            let reply = match complete_within(self.model.as_ref(), &prompt, self.timeout).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Synthesis call failed");
                    String::new()
                }
            };

            let checked = check_citations(&reply, &state.evidence);
            let uncited = checked.iter().filter(|s| !s.is_cited()).count();
            if !checked.is_empty() && uncited == 0 {
                return Ok(Answer {
                    text: reply.trim().to_string(),
                    citations: to_citations(&checked),
                    confidence: Confidence::Grounded,
                });
            }

            tracing::info!(attempt, uncited, sentences = checked.len(), "Synthesis rejected");
            state.record(
                Phase::Synthesizing,
                TraceEventKind::SynthesisRejected {
                    attempt: attempt + 1,
                    uncited_sentences: uncited,
                },
            );
            last = checked;
        }

        let cited: Vec<CheckedSentence> = last.into_iter().filter(CheckedSentence::is_cited).collect();
        if cited.is_empty() {
            state.record(
                Phase::Synthesizing,
                TraceEventKind::SynthesisDegraded {
                    reason: "no cited sentence survived; answer built from top evidence".into(),
                },
            );
            return Ok(extractive_answer(&state.evidence));
        }

        state.record(
            Phase::Synthesizing,
            TraceEventKind::SynthesisDegraded {
                reason: "uncited sentences dropped".into(),
            },
        );
        Ok(Answer {
            text: cited
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            citations: to_citations(&cited),
            confidence: Confidence::Degraded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EvidenceKind;
    use crate::llm::Prompt;
    use std::sync::Mutex;

    fn evidence() -> Vec<EvidenceItem> {
        vec![
            EvidenceItem::new(EvidenceKind::VectorHit, "c1", 0.7, "pmid-1 › Results: Drug X inhibits Gene Y. More text."),
            EvidenceItem::new(EvidenceKind::GraphHit, "gene_y", 0.9, "Drug X -[INHIBITS]-> Gene Y"),
        ]
    }

    #[derive(Debug)]
    struct Script(Mutex<Vec<&'static str>>);

    #[async_trait::async_trait]
    impl LanguageModel for Script {
        async fn complete(&self, _prompt: &Prompt) -> anyhow::Result<String> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                anyhow::bail!("script exhausted");
            }
            Ok(replies.remove(0).to_string())
        }

        fn name(&self) -> &str {
            "script"
        }
    }

    fn synthesizer(replies: Vec<&'static str>) -> Synthesizer {
        Synthesizer::new(Arc::new(Script(Mutex::new(replies))), Duration::from_secs(1), 1)
    }

    fn state() -> ReasoningState {
        let mut state = ReasoningState::new("What gene is inhibited by Drug X?");
        state.evidence = evidence();
        state
    }

    #[test]
    fn test_split_sentences() {
        let text = "Drug X inhibits Gene Y. [E1] Dose is 2.5 mg [c1]! Is it safe? [E2, E1]\n- Bullet line [E1]";
        assert_eq!(
            split_sentences(text),
            vec![
                "Drug X inhibits Gene Y. [E1]",
                "Dose is 2.5 mg [c1]!",
                "Is it safe? [E2, E1]",
                "- Bullet line [E1]",
            ]
        );
    }

    #[test]
    fn test_split_ignores_terminators_in_brackets() {
        assert_eq!(split_sentences("See [a. b] here."), vec!["See [a. b] here."]);
        assert!(split_sentences("1. [E1]").is_empty());
    }

    #[test]
    fn test_split_keeps_abbreviations_in_sentence() {
        assert_eq!(
            split_sentences("Smith et al. showed that Drug X inhibits Gene Y [c1]."),
            vec!["Smith et al. showed that Drug X inhibits Gene Y [c1]."]
        );
        assert_eq!(
            split_sentences("Kinases (e.g. JAK2) vs. phosphatases differ [E1]. See Fig. 2 by J. Doe [E2]."),
            vec![
                "Kinases (e.g. JAK2) vs. phosphatases differ [E1].",
                "See Fig. 2 by J. Doe [E2].",
            ]
        );
        // A sentence may still end on an abbreviation at the end of the text.
        assert_eq!(split_sentences("Seen in mice, rats, etc."), vec!["Seen in mice, rats, etc."]);
    }

    #[tokio::test]
    async fn test_cited_answer_with_abbreviation_is_grounded() {
        let mut state = state();
        let answer = synthesizer(vec!["Smith et al. showed that Drug X inhibits Gene Y [c1]."])
            .synthesize(&mut state)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::Grounded);
        assert_eq!(answer.citations.len(), 1);
    }

    #[test]
    fn test_citation_resolution() {
        let checked = check_citations("Gene Y is inhibited [E2][c1]. Unsupported claim [E9]. Raw [gene_y].", &evidence());
        assert_eq!(checked[0].source_refs, vec!["gene_y".to_string(), "c1".to_string()]);
        assert!(!checked[1].is_cited());
        assert_eq!(checked[2].source_refs, vec!["gene_y".to_string()]);
    }

    #[test]
    fn test_extractive_answer_cites_top_items() {
        let answer = extractive_answer(&evidence());
        assert_eq!(answer.confidence, Confidence::Degraded);
        assert_eq!(answer.citations[0].source_refs, vec!["gene_y".to_string()]);
        assert_eq!(answer.citations[1].sentence, "pmid-1 › Results: Drug X inhibits Gene Y [c1].");
    }

    #[tokio::test]
    async fn test_grounded_answer_first_try() {
        let mut state = state();
        let answer = synthesizer(vec!["Drug X inhibits Gene Y [E1][E2]."])
            .synthesize(&mut state)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::Grounded);
        assert_eq!(answer.citations.len(), 1);
        assert!(state.trace.is_empty());
    }

    #[tokio::test]
    async fn test_retry_then_grounded() {
        let mut state = state();
        let answer = synthesizer(vec!["Gene Y.", "Gene Y [gene_y]."])
            .synthesize(&mut state)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::Grounded);
        assert_eq!(state.trace.len(), 1);
    }

    #[tokio::test]
    async fn test_degraded_keeps_only_cited_sentences() {
        let mut state = state();
        let answer = synthesizer(vec!["Uncited.", "Cited one [c1]. Uncited two."])
            .synthesize(&mut state)
            .await
            .unwrap();
        assert_eq!(answer.confidence, Confidence::Degraded);
        assert_eq!(answer.text, "Cited one [c1].");
        assert!(answer.citations.iter().all(|c| !c.source_refs.is_empty()));
    }

    #[tokio::test]
    async fn test_model_down_gives_extractive_answer() {
        let mut state = state();
        let answer = synthesizer(vec![]).synthesize(&mut state).await.unwrap();
        assert_eq!(answer.confidence, Confidence::Degraded);
        assert_eq!(answer.citations.len(), 2);
    }

    #[tokio::test]
    async fn test_no_evidence_fails() {
        let mut state = ReasoningState::new("q");
        let result = synthesizer(vec!["Anything [E1]."]).synthesize(&mut state).await;
        assert_eq!(result, Err(NothingToCite));
    }
}

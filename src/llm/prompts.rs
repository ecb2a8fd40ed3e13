//! Prompt builders for every model call the engine makes.
//!
//! Prompts are deliberately model-agnostic: plain instructions, no
//! provider-specific markup.

use super::{Prompt, PromptPurpose};
use crate::domain::{Community, EvidenceItem};

const PLAN_SYSTEM: &str = "You plan literature searches over a biomedical knowledge graph. \
Break the user's question into 2-3 step-by-step search tasks. \
Reply with one task per line and nothing else.";

const KEYWORDS_SYSTEM: &str = "Extract the biomedical search keywords from the user's text: \
entity names, gene or protein symbols, drugs, conditions and relation verbs. \
Reply with a single comma-separated list and nothing else.";

const REFINE_SYSTEM: &str = "You refine searches over a biomedical knowledge graph. \
Given a question, the searches already run and what is still missing, \
write exactly one new search task on a single line.";

const SYNTHESIZE_SYSTEM: &str = "Answer the question based strictly on the numbered evidence. \
Every sentence must end with at least one citation in square brackets, \
either the evidence label such as [E1] or the source reference shown with it. \
Do not state anything the evidence does not support.";

const SYNTHESIZE_STRICT_SUFFIX: &str = " Your previous answer contained sentences without \
valid citations. Rewrite it so that EVERY sentence carries a citation from the list. \
Drop any sentence you cannot cite.";

const SUMMARIZE_SYSTEM: &str = "Summarize what connects this group of biomedical entities \
in one or two sentences. Mention the most important entity names.";

pub fn plan(query: &str) -> Prompt {
    Prompt::new(
        PromptPurpose::Plan,
        PLAN_SYSTEM,
        format!("Break down this query into 2-3 step-by-step search tasks: {query}"),
    )
}

pub fn keywords(text: &str) -> Prompt {
    Prompt::new(PromptPurpose::Keywords, KEYWORDS_SYSTEM, text)
}

pub fn refine(query: &str, plan: &[String], missing: &[String]) -> Prompt {
    let done = plan
        .iter()
        .map(|step| format!("- {step}"))
        .collect::<Vec<_>>()
        .join("\n");
    Prompt::new(
        PromptPurpose::Refine,
        REFINE_SYSTEM,
        format!(
            "Question: {query}\nSearches so far:\n{done}\nStill missing: {}",
            missing.join(", ")
        ),
    )
}

/// Render evidence as `[E<n>] (<sourceRef>) <payload>` lines, 1-based.
pub fn evidence_block(evidence: &[EvidenceItem]) -> String {
    evidence
        .iter()
        .enumerate()
        .map(|(i, item)| format!("[E{}] ({}) {}", i + 1, item.source_ref, item.payload_text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn synthesize(query: &str, evidence: &[EvidenceItem], strict: bool) -> Prompt {
    let mut system = SYNTHESIZE_SYSTEM.to_string();
    if strict {
        system.push_str(SYNTHESIZE_STRICT_SUFFIX);
    }
    Prompt::new(
        PromptPurpose::Synthesize,
        system,
        format!("Question: {query}\n\nEvidence:\n{}", evidence_block(evidence)),
    )
}

pub fn summarize(community: &Community, member_names: &[String], relation_types: &[String]) -> Prompt {
    Prompt::new(
        PromptPurpose::Summarize,
        SUMMARIZE_SYSTEM,
        format!(
            "Community {} ({} entities)\nMembers: {}\nRelations: {}",
            community.id,
            community.size,
            member_names.join(", "),
            relation_types.join(", ")
        ),
    )
}

//! Query decomposition and refinement.

use super::reflection::Requirement;
use crate::llm::{LanguageModel, complete_within, prompts};
use std::sync::Arc;
use std::time::Duration;

/// Result of planning a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<String>,
    /// Why the query itself became the plan, when the model could not help
    pub fallback_reason: Option<String>,
}

/// Turns a question into search steps with the language model.
#[derive(Debug, Clone)]
pub struct Planner {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
    max_steps: usize,
}

impl Planner {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration, max_steps: usize) -> Self {
        Self {
            model,
            timeout,
            max_steps: max_steps.max(1),
        }
    }

    /// Decompose `query` into at most `max_steps` subqueries.
    ///
    /// Never fails: on model error, timeout or an unusable reply the plan is
    /// the query itself.
    pub async fn plan(&self, query: &str) -> Plan {
        let reason = match complete_within(self.model.as_ref(), &prompts::plan(query), self.timeout).await {
            Ok(reply) => {
                let steps = parse_steps(&reply, self.max_steps);
                if !steps.is_empty() {
                    return Plan {
                        steps,
                        fallback_reason: None,
                    };
                }
                "model returned no usable steps".to_string()
            }
            Err(e) => e.to_string(),
        };
        tracing::warn!(%reason, "Planning fell back to the query itself");
        Plan {
            steps: vec![query.to_string()],
            fallback_reason: Some(reason),
        }
    }

    /// One follow-up search aimed at what is still missing.
    pub async fn refine(&self, query: &str, plan: &[String], missing: &[Requirement]) -> String {
        let labels: Vec<String> = missing.iter().map(Requirement::label).collect();
        match complete_within(self.model.as_ref(), &prompts::refine(query, plan, &labels), self.timeout).await {
            Ok(reply) => {
                if let Some(step) = parse_steps(&reply, 1).into_iter().next() {
                    return step;
                }
            }
            Err(e) => tracing::debug!(error = %e, "Refinement via model failed"),
        }
        lexical_refinement(query, missing)
    }
}

/// `<query> <missing cues>`, or the bare query when nothing specific is missing.
pub fn lexical_refinement(query: &str, missing: &[Requirement]) -> String {
    let cues: Vec<String> = missing
        .iter()
        .map(Requirement::cue)
        .filter(|c| !c.is_empty())
        .collect();
    if cues.is_empty() {
        query.to_string()
    } else {
        format!("{query} {}", cues.join(" "))
    }
}

/// Parse a model reply into plan steps: one per line, list markers removed,
/// header lines (ending in ':') dropped, capped at `max`.
pub fn parse_steps(reply: &str, max: usize) -> Vec<String> {
    reply
        .lines()
        .map(strip_list_marker)
        .filter(|line| !line.is_empty() && !line.ends_with(':'))
        .filter(|line| line.chars().any(char::is_alphabetic))
        .take(max)
        .map(str::to_string)
        .collect()
}

fn strip_list_marker(line: &str) -> &str {
    let line = line.trim().trim_start_matches(['-', '*', '•', '#']).trim_start();

    // "Step 2:" / "step 2."
    let line = match line.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("step") => line[4..].trim_start(),
        _ => line,
    };

    // "1." / "2)" / "3:"
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(stripped) = rest.strip_prefix(['.', ')', ':']) {
            return stripped.trim();
        }
    }
    line.trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityType;
    use crate::llm::Prompt;

    #[derive(Debug)]
    struct Reply(Option<&'static str>);

    #[async_trait::async_trait]
    impl LanguageModel for Reply {
        async fn complete(&self, _prompt: &Prompt) -> anyhow::Result<String> {
            self.0.map(str::to_string).ok_or_else(|| anyhow::anyhow!("unreachable"))
        }

        fn name(&self) -> &str {
            "reply"
        }
    }

    #[test]
    fn test_parse_steps_strips_numbering() {
        let reply = "Here are the steps:\n1. Find targets of Drug X\n2) Find genes linked to those targets\n- Step 3: Summarize\n4. Extra";
        assert_eq!(
            parse_steps(reply, 3),
            vec!["Find targets of Drug X", "Find genes linked to those targets", "Summarize"]
        );
    }

    #[test]
    fn test_parse_steps_keeps_leading_symbols() {
        assert_eq!(parse_steps("5-HT receptors in migraine", 3), vec!["5-HT receptors in migraine"]);
        assert!(parse_steps("1.\n\n---", 3).is_empty());
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_query() {
        let planner = Planner::new(Arc::new(Reply(None)), Duration::from_secs(1), 3);
        let plan = planner.plan("What treats X?").await;
        assert_eq!(plan.steps, vec!["What treats X?"]);
        assert!(plan.fallback_reason.is_some());

        let planner = Planner::new(Arc::new(Reply(Some("   "))), Duration::from_secs(1), 3);
        assert!(planner.plan("q").await.fallback_reason.is_some());
    }

    #[tokio::test]
    async fn test_refine_falls_back_to_lexical() {
        let planner = Planner::new(Arc::new(Reply(None)), Duration::from_secs(1), 3);
        let missing = vec![
            Requirement::Entity(EntityType::GeneProtein),
            Requirement::Relation("ASSOCIATED_WITH".into()),
        ];
        let step = planner.refine("What does X do?", &["What does X do?".into()], &missing).await;
        assert_eq!(step, "What does X do? gene associated with");
    }
}

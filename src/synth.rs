//! Answer synthesis and casual replies.

use crate::error::{AssistantResult, Stage};
use crate::llm::{BoundedModel, GenerateOptions};
use crate::models::Intent;

const ANSWER_OPTIONS: GenerateOptions = GenerateOptions {
    temperature: 0.0,
    top_p: Some(0.1),
    max_tokens: 150,
};

const CHAT_OPTIONS: GenerateOptions = GenerateOptions {
    temperature: 0.7,
    top_p: None,
    max_tokens: 80,
};

/// Framing line for a follow-up, keyed on how the earlier question began.
fn follow_up_directive(previous: &str) -> String {
    let lower = previous.trim_start().to_lowercase();
    if lower.starts_with("why") {
        "CONTEXT: The original question asked WHY. Focus on explaining the REASON or CAUSE.\n"
            .to_string()
    } else if lower.starts_with("how") {
        "CONTEXT: The original question asked HOW. Focus on explaining the PROCESS or MECHANISM.\n"
            .to_string()
    } else {
        format!("CONTEXT: This is a follow-up to: {}\n", previous)
    }
}

pub(crate) fn answer_prompt(
    question: &str,
    evidence: &[String],
    intent: Intent,
    previous_question: Option<&str>,
) -> String {
    let directive = match (intent, previous_question) {
        (Intent::Continuation, Some(previous)) => follow_up_directive(previous),
        _ => String::new(),
    };
    let allowed = evidence
        .iter()
        .map(|s| format!("- {}", s))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "You are answering a question using ONLY the provided sentences.\n\n\
         RULES:\n\
         - Use ONLY the allowed sentences below\n\
         - You MAY rephrase, combine, and simplify them\n\
         - Do NOT add information not in the sentences\n\
         - Do NOT wrap answer in quotes\n\
         - Keep the answer clear and direct\n\
         {directive}\n\
         ALLOWED SENTENCES:\n\
         {allowed}\n\n\
         QUESTION:\n\
         {question}\n\n\
         ANSWER:\n"
    )
}

/// Trim, and drop one pair of quotes wrapping the whole answer.
pub fn clean_answer(raw: &str) -> String {
    let trimmed = raw.trim();
    for (open, close) in [('"', '"'), ('\u{201c}', '\u{201d}'), ('\'', '\'')] {
        if let Some(inner) = trimmed
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
        {
            return inner.trim().to_string();
        }
    }
    trimmed.to_string()
}

/// Write the final answer from grounded evidence.
pub async fn synthesize(
    model: &BoundedModel,
    question: &str,
    evidence: &[String],
    intent: Intent,
    previous_question: Option<&str>,
) -> AssistantResult<String> {
    let prompt = answer_prompt(question, evidence, intent, previous_question);
    let raw = model
        .generate(Stage::Synthesize, &prompt, &ANSWER_OPTIONS)
        .await?;
    Ok(clean_answer(&raw))
}

/// Short friendly reply to small talk.
pub async fn chat(model: &BoundedModel, question: &str) -> AssistantResult<String> {
    let prompt = format!(
        "You are a friendly conversational assistant.\n\
         Keep it casual and short.\n\n\
         User:\n{}\n\n\
         Response:\n",
        question
    );
    let raw = model.generate(Stage::Chat, &prompt, &CHAT_OPTIONS).await?;
    Ok(raw.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence() -> Vec<String> {
        vec![
            "Caramelization is the browning of sugar.".to_string(),
            "Rushing it burns the sugar.".to_string(),
        ]
    }

    #[test]
    fn test_prompt_lists_evidence() {
        let p = answer_prompt("What is caramelization?", &evidence(), Intent::Factual, None);
        assert!(p.contains("ALLOWED SENTENCES:\n- Caramelization is the browning of sugar.\n- Rushing it burns the sugar.\n"));
        assert!(p.contains("QUESTION:\nWhat is caramelization?"));
        assert!(!p.contains("CONTEXT:"));
    }

    #[test]
    fn test_follow_up_framing() {
        let why = answer_prompt(
            "And the cost?",
            &evidence(),
            Intent::Continuation,
            Some("Why does sugar brown?"),
        );
        assert!(why.contains("Focus on explaining the REASON or CAUSE."));

        let how = answer_prompt(
            "Tell me more",
            &evidence(),
            Intent::Continuation,
            Some("How does caramelization work?"),
        );
        assert!(how.contains("Focus on explaining the PROCESS or MECHANISM."));

        let other = answer_prompt(
            "Why shouldn't you rush it?",
            &evidence(),
            Intent::Continuation,
            Some("What is caramelization?"),
        );
        assert!(other.contains("CONTEXT: This is a follow-up to: What is caramelization?"));
    }

    #[test]
    fn test_factual_ignores_previous_question() {
        let p = answer_prompt("q", &evidence(), Intent::Factual, Some("Why?"));
        assert!(!p.contains("CONTEXT:"));
    }

    #[test]
    fn test_clean_answer_strips_wrapping_quotes() {
        assert_eq!(clean_answer("  \"Sugar browns.\"\n"), "Sugar browns.");
        assert_eq!(clean_answer("\u{201c}Sugar browns.\u{201d}"), "Sugar browns.");
        assert_eq!(clean_answer("Sugar \"browns\"."), "Sugar \"browns\".");
        assert_eq!(clean_answer("\""), "\"");
    }
}

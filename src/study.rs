//! Teach and quiz modes.
//!
//! Both are deterministic: they work from retrieved vault chunks only and
//! make no language-model calls.

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;

use crate::pipeline::Assistant;
use crate::text;

const TEACHING_STEPS: &[&str] = &[
    "Start with the core idea: say what it is in one sentence.",
    "Break it into the parts or steps that make it work.",
    "Connect it to an example from your notes.",
    "Explain why it matters, or what goes wrong without it.",
    "Summarize it back in your own words.",
];

/// Distinct note terms checked against a quiz answer.
const KEY_TERMS: usize = 8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TeachResponse {
    pub question: String,
    pub steps: Vec<String>,
    pub context: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum QuizResponse {
    Question { prompt: String },
    Feedback { feedback: String, context: Vec<String> },
}

impl Assistant {
    /// An explanation scaffold for `question` plus the matching note chunks.
    pub async fn teach(&self, question: &str) -> Result<TeachResponse> {
        self.index().sync_if_stale().await?;
        let chunks = self
            .index()
            .query(question, self.config().retrieval.limit)
            .await?;
        Ok(TeachResponse {
            question: question.to_string(),
            steps: TEACHING_STEPS.iter().map(|s| s.to_string()).collect(),
            context: chunks.into_iter().map(|c| c.chunk).collect(),
        })
    }

    /// Without an answer, pose a recall question about `topic`. With one,
    /// compare it against the key terms of the matching notes.
    pub async fn quiz(&self, topic: &str, answer: Option<&str>) -> Result<QuizResponse> {
        let topic = topic.trim();
        let Some(answer) = answer.filter(|a| !a.trim().is_empty()) else {
            return Ok(QuizResponse::Question {
                prompt: format!(
                    "Explain {} in your own words. What is it, and why does it matter?",
                    topic
                ),
            });
        };

        self.index().sync_if_stale().await?;
        let chunks = self
            .index()
            .query(topic, self.config().retrieval.limit)
            .await?;
        let context: Vec<String> = chunks.into_iter().map(|c| c.chunk).collect();
        if context.is_empty() {
            return Ok(QuizResponse::Feedback {
                feedback: format!(
                    "I don't have notes on {} yet, so I can't check that answer.",
                    topic
                ),
                context,
            });
        }

        let terms = key_terms(&context, topic);
        let answered = text::words(answer);
        let (covered, missed): (Vec<&String>, Vec<&String>) =
            terms.iter().partition(|t| answered.contains(*t));

        let feedback = if covered.len() * 2 >= terms.len() {
            let mut f = format!("Good recall. You covered: {}.", join(&covered));
            if !missed.is_empty() {
                f.push_str(&format!(" Your notes also mention: {}.", join(&missed)));
            }
            f
        } else if covered.is_empty() {
            format!(
                "That doesn't match your notes yet. Look for: {}.",
                join(&missed)
            )
        } else {
            format!(
                "You're partway there ({}). Your notes also mention: {}.",
                join(&covered),
                join(&missed)
            )
        };

        Ok(QuizResponse::Feedback { feedback, context })
    }
}

fn join(terms: &[&String]) -> String {
    terms
        .iter()
        .map(|t| t.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Most frequent content words of the chunks, topic words excluded, ties
/// broken by first appearance.
fn key_terms(chunks: &[String], topic: &str) -> Vec<String> {
    let topic_words = text::subject_tokens(topic);
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut position = 0;
    for chunk in chunks {
        for word in text::subject_tokens(chunk) {
            position += 1;
            if word.chars().count() <= 3
                || word.chars().all(|c| c.is_ascii_digit())
                || topic_words.contains(&word)
            {
                continue;
            }
            counts.entry(word).or_insert((0, position)).0 += 1;
        }
    }
    let mut ranked: Vec<(String, (usize, usize))> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked
        .into_iter()
        .take(KEY_TERMS)
        .map(|(word, _)| word)
        .collect()
}

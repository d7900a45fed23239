//! Sentence-level grounding.
//!
//! Retrieved chunks are too coarse to hand to the answer model directly.
//! A [`GroundingFilter`] narrows them to the sentences that bear on the
//! question; only those sentences may appear in the answer. Both
//! strategies return an ordered evidence set with exact duplicates
//! removed, first occurrence kept.

use async_trait::async_trait;

use crate::error::{AssistantResult, Stage};
use crate::llm::{BoundedModel, GenerateOptions};
use crate::models::{Intent, ScoredChunk};
use crate::resolver::ResolvedQuery;
use crate::text;

/// Chunks beyond this many are not shown to the extraction model.
const MAX_PROMPT_CHUNKS: usize = 5;

/// Extracted lines this short are list debris, not sentences.
const MIN_SENTENCE_CHARS: usize = 10;

/// Everything a grounding strategy may look at.
pub struct GroundingRequest<'a> {
    /// The question as the user asked it.
    pub question: &'a str,
    pub intent: Intent,
    pub chunks: &'a [ScoredChunk],
    pub resolved: &'a ResolvedQuery,
    pub previous_question: Option<&'a str>,
}

#[async_trait]
pub trait GroundingFilter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn ground(&self, request: &GroundingRequest<'_>) -> AssistantResult<Vec<String>>;
}

// ============ LLM extraction ============

pub struct LlmGrounding {
    model: BoundedModel,
}

impl LlmGrounding {
    pub fn new(model: BoundedModel) -> Self {
        Self { model }
    }
}

pub(crate) fn extraction_prompt(request: &GroundingRequest<'_>) -> String {
    let context_block = match (request.intent, request.previous_question) {
        (Intent::Continuation, Some(previous)) => format!(
            "CONTEXT: This is a follow-up question.\n\
             PREVIOUS QUESTION: {previous}\n\n\
             The current question refers to the topic from the previous question.\n\
             - Pronouns like \"it\", \"that\", \"this\" refer to the previous topic\n\
             - Extract sentences that help answer the current question about that topic\n"
        ),
        _ => String::new(),
    };

    let chunks_text = request
        .chunks
        .iter()
        .take(MAX_PROMPT_CHUNKS)
        .enumerate()
        .map(|(i, c)| format!("CHUNK {}:\n{}", i + 1, c.chunk))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are extracting relevant sentences from text chunks to answer a question.

{context_block}

CURRENT QUESTION:
{question}

TEXT CHUNKS:
{chunks_text}

INSTRUCTIONS:
Extract ALL sentences that could help answer the question.

Be INCLUSIVE and INTERPRETIVE:
- Include sentences that DIRECTLY answer the question
- Include sentences that INDIRECTLY answer the question (through implications, benefits, consequences, examples)
- Include sentences that provide necessary CONTEXT for understanding the answer
- When in doubt, INCLUDE rather than exclude

Think broadly about relevance:
- A question about "importance" can be answered by sentences about benefits, outcomes, or effects
- A question about "why" can be answered by sentences about causes, purposes, or consequences
- A question about "how" can be answered by sentences about processes, mechanisms, or methods
- A question about symbolism can be answered by descriptive sentences

OUTPUT FORMAT:
Return ONLY the relevant sentences, one per line.
Do NOT add explanations or commentary.
If absolutely no relevant sentences found, output: NONE

Relevant sentences:
"#,
        question = request.question,
    )
}

/// Turn the extraction model's reply into an evidence set.
pub fn parse_extraction(output: &str) -> Vec<String> {
    let output = output.trim();
    if output.is_empty() || output == "NONE" {
        return Vec::new();
    }
    let sentences = output
        .lines()
        .map(text::strip_enumeration)
        .filter(|s| s.chars().count() > MIN_SENTENCE_CHARS)
        .collect();
    text::dedup_stable(sentences)
}

#[async_trait]
impl GroundingFilter for LlmGrounding {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn ground(&self, request: &GroundingRequest<'_>) -> AssistantResult<Vec<String>> {
        if request.chunks.is_empty() {
            return Ok(Vec::new());
        }
        let reply = self
            .model
            .generate(
                Stage::Ground,
                &extraction_prompt(request),
                &GenerateOptions::greedy(300),
            )
            .await?;
        Ok(parse_extraction(&reply))
    }
}

// ============ Lexical ============

/// Keeps every chunk sentence that mentions a subject token. No model calls.
pub struct LexicalGrounding;

#[async_trait]
impl GroundingFilter for LexicalGrounding {
    fn name(&self) -> &'static str {
        "lexical"
    }

    async fn ground(&self, request: &GroundingRequest<'_>) -> AssistantResult<Vec<String>> {
        let tokens = &request.resolved.subject_tokens;
        let sentences = request
            .chunks
            .iter()
            .flat_map(|c| text::split_sentences(&c.chunk))
            .filter(|s| text::mentions_any(s, tokens))
            .collect();
        Ok(text::dedup_stable(sentences))
    }
}

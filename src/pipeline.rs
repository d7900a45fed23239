//! Question-answering orchestrator.
//!
//! [`Assistant`] owns the service objects (vault index, context store,
//! language model, strategies) and runs one `/ask` request through them:
//!
//! ```text
//! START → SYNCED → INTENT_CLASSIFIED ─┬─ casual ──────────────→ CASUAL_DONE
//!                                      └─ RESOLVED → RETRIEVED → GROUNDED → ANSWERED
//!                                                                            ↓
//!                                                                   CONTEXT_UPDATED → END
//! ```
//!
//! The session's context lock is held from intent classification until the
//! response is built, so same-session requests are serialized and context
//! is saved before the caller sees the answer. Any upstream failure is
//! logged and answered with [`APOLOGY`]; nothing propagates out of
//! [`Assistant::ask`].

use anyhow::Result;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::instrument;

use crate::config::{validate, Config, PipelineConfig};
use crate::context::{ContextStore, SessionContext};
use crate::embedding::{create_provider, Embedder};
use crate::error::{AssistantError, AssistantResult, Stage};
use crate::grounding::{GroundingFilter, GroundingRequest, LexicalGrounding, LlmGrounding};
use crate::index::VaultIndex;
use crate::intent::{IntentClassifier, ModelClassifier, PromptClassifier};
use crate::llm::{create_model, BoundedModel, LanguageModel};
use crate::models::{
    AnswerMetadata, AskResponse, Intent, ScoredChunk, SyncInfo, APOLOGY, DEFAULT_SESSION,
    NO_INFORMATION,
};
use crate::resolver::{AnchorResolver, QueryResolver, ResolvedQuery, RewriteResolver};
use crate::synth;
use crate::text;

/// Content words kept when the subject has to be guessed from evidence.
const GUESSED_SUBJECT_WORDS: usize = 2;

static DEFINITION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:the\s+|an?\s+)?(.+?)\s+(?:is|are)\s+\S").expect("valid definition regex")
});

pub struct Assistant {
    config: Arc<Config>,
    index: Arc<VaultIndex>,
    contexts: Arc<ContextStore>,
    model: BoundedModel,
    classifier: Box<dyn IntentClassifier>,
    resolver: Box<dyn QueryResolver>,
    grounding: Box<dyn GroundingFilter>,
}

impl Assistant {
    /// Build everything from configuration, including the HTTP model client.
    pub fn from_config(config: Config) -> Result<Self> {
        let model: Arc<dyn LanguageModel> = Arc::from(create_model(&config.llm)?);
        Self::with_model(config, model)
    }

    /// Build with a caller-supplied language model.
    pub fn with_model(config: Config, model: Arc<dyn LanguageModel>) -> Result<Self> {
        validate(&config)?;
        let config = Arc::new(config);

        let embedder: Option<Arc<dyn Embedder>> = if config.embedding.is_enabled() {
            Some(Arc::from(create_provider(&config.embedding)?))
        } else {
            None
        };
        let index = Arc::new(VaultIndex::new(config.clone(), embedder)?);
        let contexts = Arc::new(ContextStore::new(
            config.context.max_turns,
            Duration::from_secs(config.context.idle_timeout_secs),
        ));
        let model = BoundedModel::new(model, Duration::from_secs(config.llm.timeout_secs));

        let classifier = build_classifier(&config.pipeline, &model)?;
        let resolver = build_resolver(&config.pipeline, &model);
        let grounding = build_grounding(&config.pipeline, &model);

        tracing::debug!(
            intent = classifier.name(),
            resolver = resolver.name(),
            grounding = grounding.name(),
            model = model.model_name(),
            "assistant ready"
        );

        Ok(Self {
            config,
            index,
            contexts,
            model,
            classifier,
            resolver,
            grounding,
        })
    }

    /// Replace the intent strategy.
    pub fn with_classifier(mut self, classifier: Box<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<VaultIndex> {
        &self.index
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    /// Force a full resync.
    pub async fn sync(&self) -> Result<SyncInfo> {
        self.index.sync().await
    }

    /// Answer `question` for `session_id` (or the default session).
    /// Always returns a response; failures become [`APOLOGY`].
    #[instrument(
        skip(self, question, session_id),
        fields(
            request_id = %uuid::Uuid::new_v4(),
            session = %session_id.unwrap_or(DEFAULT_SESSION),
        )
    )]
    pub async fn ask(&self, question: &str, session_id: Option<&str>) -> AskResponse {
        let session = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION);

        match self.answer(question.trim(), session).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(error = %e, "answer failed");
                AskResponse::plain(APOLOGY, None)
            }
        }
    }

    async fn answer(&self, question: &str, session: &str) -> AssistantResult<AskResponse> {
        let sync = self
            .index
            .sync_if_stale()
            .await
            .map_err(|source| AssistantError::Index {
                stage: Stage::Sync,
                source,
            })?;
        if let Some(info) = &sync {
            tracing::info!(indexed_files = info.indexed_files, "sync performed");
        }

        let mut ctx = self.contexts.lock(session).await;

        let intent = self.classifier.classify(question).await;
        tracing::info!(%intent, "intent classified");

        match intent {
            Intent::Continuation if ctx.previous_question().is_none() => {
                tracing::info!("continuation without a previous question");
                return Ok(AskResponse::plain(NO_INFORMATION, sync));
            }
            Intent::Casual => {
                let reply = synth::chat(&self.model, question).await?;
                return Ok(AskResponse::plain(reply, sync));
            }
            Intent::Factual => ctx.clear(),
            Intent::Continuation => {}
        }

        let previous_question = ctx.previous_question().map(str::to_string);
        let previous_subject = ctx.active_subject.clone();

        let mut resolved = self.resolver.resolve(question, intent, &ctx).await;
        tracing::info!(query = %resolved.query, tokens = ?resolved.subject_tokens, "query resolved");

        let mut chunks = self.retrieve(&resolved.query).await?;
        if !resolved.is_anchored_in(&chunks) && resolved.fall_back() {
            tracing::info!(subject = %resolved.query, "subject not found, retrying with active subject");
            chunks = self.retrieve(&resolved.query).await?;
        }
        tracing::info!(chunks = chunks.len(), "retrieved");
        if chunks.is_empty() {
            return Ok(AskResponse::plain(NO_INFORMATION, sync));
        }

        let evidence = self
            .grounding
            .ground(&GroundingRequest {
                question,
                intent,
                chunks: &chunks,
                resolved: &resolved,
                previous_question: previous_question.as_deref(),
            })
            .await?;
        tracing::info!(sentences = evidence.len(), "grounded");
        if evidence.is_empty() {
            return Ok(AskResponse::plain(NO_INFORMATION, sync));
        }

        let answer = synth::synthesize(
            &self.model,
            question,
            &evidence,
            intent,
            previous_question.as_deref(),
        )
        .await?;

        if answer != NO_INFORMATION {
            update_context(
                &mut ctx,
                question,
                &answer,
                intent,
                previous_subject.as_deref(),
                &resolved,
                &chunks,
                &evidence,
            );
        }

        Ok(AskResponse {
            answer,
            metadata: Some(AnswerMetadata {
                chunks_retrieved: chunks.len(),
                sentences_grounded: evidence.len(),
                intent,
            }),
            sync_performed: sync,
        })
    }

    async fn retrieve(&self, query: &str) -> AssistantResult<Vec<ScoredChunk>> {
        self.index
            .query(query, self.config.retrieval.limit)
            .await
            .map_err(|source| AssistantError::Index {
                stage: Stage::Retrieve,
                source,
            })
    }
}

fn build_classifier(
    pipeline: &PipelineConfig,
    model: &BoundedModel,
) -> Result<Box<dyn IntentClassifier>> {
    Ok(match pipeline.intent.as_str() {
        "prompt" => Box::new(PromptClassifier::new(model.clone())),
        _ => Box::new(ModelClassifier::load(pipeline.intent_data.as_deref())?),
    })
}

fn build_resolver(pipeline: &PipelineConfig, model: &BoundedModel) -> Box<dyn QueryResolver> {
    match pipeline.resolver.as_str() {
        "anchor" => Box::new(AnchorResolver),
        _ => Box::new(RewriteResolver::new(model.clone())),
    }
}

fn build_grounding(pipeline: &PipelineConfig, model: &BoundedModel) -> Box<dyn GroundingFilter> {
    match pipeline.grounding.as_str() {
        "lexical" => Box::new(LexicalGrounding),
        _ => Box::new(LlmGrounding::new(model.clone())),
    }
}

#[allow(clippy::too_many_arguments)]
fn update_context(
    ctx: &mut SessionContext,
    question: &str,
    answer: &str,
    intent: Intent,
    previous_subject: Option<&str>,
    resolved: &ResolvedQuery,
    chunks: &[ScoredChunk],
    evidence: &[String],
) {
    if let Some(subject) = derive_subject(intent, previous_subject, resolved, chunks, evidence) {
        if let Some(fact) = definitional_fact(&subject, evidence) {
            ctx.record_fact(subject.clone(), fact);
        }
        tracing::debug!(%subject, "active subject");
        ctx.set_active_subject(subject);
    }

    if intent == Intent::Factual {
        ctx.add_turn(question, Some(answer));
    }
}

/// Pick what the conversation is now about.
///
/// A continuation keeps the current subject while the retrieved text still
/// mentions it. Otherwise the subject tokens found in the retrieved text
/// win, then the resolver's fallback, then the first content words of the
/// first evidence sentence.
fn derive_subject(
    intent: Intent,
    previous_subject: Option<&str>,
    resolved: &ResolvedQuery,
    chunks: &[ScoredChunk],
    evidence: &[String],
) -> Option<String> {
    let mentioned = |tokens: &[String]| chunks.iter().any(|c| text::mentions_any(&c.chunk, tokens));

    if intent == Intent::Continuation {
        if let Some(subject) = previous_subject {
            if mentioned(text::subject_tokens(subject).as_slice()) {
                return Some(subject.to_string());
            }
        }
    }

    let anchored: Vec<&str> = resolved
        .subject_tokens
        .iter()
        .filter(|t| mentioned(std::slice::from_ref(*t)))
        .map(String::as_str)
        .collect();
    if !anchored.is_empty() {
        return Some(anchored.join(" "));
    }

    if let Some(fallback) = &resolved.fallback_subject {
        return Some(fallback.clone());
    }

    evidence.first().and_then(|sentence| {
        let guess: Vec<String> = text::subject_tokens(sentence)
            .into_iter()
            .take(GUESSED_SUBJECT_WORDS)
            .collect();
        (!guess.is_empty()).then(|| guess.join(" "))
    })
}

/// First evidence sentence of the form "<subject> is/are ...".
fn definitional_fact(subject: &str, evidence: &[String]) -> Option<String> {
    let wanted = text::normalize(subject);
    evidence
        .iter()
        .find(|sentence| {
            DEFINITION
                .captures(sentence)
                .and_then(|c| c.get(1))
                .is_some_and(|m| text::normalize(m.as_str()).trim() == wanted.trim())
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> ScoredChunk {
        ScoredChunk {
            file: "notes.md".to_string(),
            chunk: text.to_string(),
            score: 2.0,
        }
    }

    fn resolved(tokens: &[&str], fallback: Option<&str>) -> ResolvedQuery {
        ResolvedQuery {
            query: tokens.join(" "),
            subject_tokens: tokens.iter().map(|t| t.to_string()).collect(),
            fallback_subject: fallback.map(str::to_string),
        }
    }

    #[test]
    fn test_definitional_fact() {
        let evidence = vec![
            "Sugar melts at high heat.".to_string(),
            "Caramelization is the browning of sugar.".to_string(),
        ];
        assert_eq!(
            definitional_fact("caramelization", &evidence).as_deref(),
            Some("Caramelization is the browning of sugar.")
        );
        assert!(definitional_fact("sugar", &evidence).is_none());

        let plural = vec!["The Stoics are philosophers of virtue.".to_string()];
        assert!(definitional_fact("stoics", &plural).is_some());
    }

    #[test]
    fn test_subject_from_anchored_tokens() {
        let chunks = vec![chunk("Caramelization is the browning of sugar.")];
        let r = resolved(&["caramelization", "flavour"], None);
        assert_eq!(
            derive_subject(Intent::Factual, None, &r, &chunks, &[]).as_deref(),
            Some("caramelization")
        );
    }

    #[test]
    fn test_continuation_keeps_subject_still_mentioned() {
        let chunks = vec![chunk("Do not rush caramelization or the sugar burns.")];
        let r = resolved(&["rush", "caramelization"], Some("caramelization"));
        assert_eq!(
            derive_subject(Intent::Continuation, Some("caramelization"), &r, &chunks, &[])
                .as_deref(),
            Some("caramelization")
        );
    }

    #[test]
    fn test_subject_falls_back_then_guesses() {
        let chunks = vec![chunk("Nothing relevant here.")];
        let r = resolved(&["zebra"], Some("stoicism"));
        assert_eq!(
            derive_subject(Intent::Factual, None, &r, &chunks, &[]).as_deref(),
            Some("stoicism")
        );

        let r = resolved(&["zebra"], None);
        let evidence = vec!["Mycelium networks connect forest trees.".to_string()];
        assert_eq!(
            derive_subject(Intent::Factual, None, &r, &chunks, &evidence).as_deref(),
            Some("mycelium networks")
        );
    }

    #[test]
    fn test_update_context_records_turn_only_for_factual() {
        let store_ctx = |intent| {
            let mut ctx = SessionContext::new("test", 3);
            update_context(
                &mut ctx,
                "What is caramelization?",
                "Browning of sugar.",
                intent,
                None,
                &resolved(&["caramelization"], None),
                &[chunk("Caramelization is the browning of sugar.")],
                &["Caramelization is the browning of sugar.".to_string()],
            );
            ctx
        };

        let factual = store_ctx(Intent::Factual);
        assert_eq!(factual.previous_question(), Some("What is caramelization?"));
        assert_eq!(factual.active_subject.as_deref(), Some("caramelization"));
        assert_eq!(
            factual.facts.get("caramelization").map(String::as_str),
            Some("Caramelization is the browning of sugar.")
        );

        let continuation = store_ctx(Intent::Continuation);
        assert!(continuation.previous_question().is_none());
        assert_eq!(continuation.active_subject.as_deref(), Some("caramelization"));
    }
}

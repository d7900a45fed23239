//! Intent classification.
//!
//! Every question is labelled `factual`, `continuation` or `casual` before
//! anything else happens. Two strategies are available, chosen by
//! `[pipeline].intent`:
//!
//! - `model`: a multinomial naive-Bayes label model fitted in-process,
//!   either from a JSONL file of `{"text", "label"}` records or from a
//!   small built-in seed set. It predicts label ids (`LABEL_0`, ...) that
//!   are mapped onto intents.
//! - `prompt`: the language model is asked for a single category name.
//!
//! Classification never fails. Anything unexpected falls back to
//! [`Intent::Factual`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::Stage;
use crate::llm::{BoundedModel, GenerateOptions};
use crate::models::Intent;
use crate::text;

#[async_trait]
pub trait IntentClassifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn classify(&self, question: &str) -> Intent;
}

/// Map a predicted label id onto an intent. Unknown ids are factual.
pub fn intent_for_label(label: &str) -> Intent {
    match label {
        "LABEL_0" => Intent::Factual,
        "LABEL_1" => Intent::Continuation,
        "LABEL_2" => Intent::Casual,
        _ => Intent::Factual,
    }
}

fn label_for_intent(intent: Intent) -> &'static str {
    match intent {
        Intent::Factual => "LABEL_0",
        Intent::Continuation => "LABEL_1",
        Intent::Casual => "LABEL_2",
    }
}

// ============ Label model ============

// Continuation seeds point back (it, that, this, more, again); factual
// seeds name their topic.
const SEED_SAMPLES: &[(&str, Intent)] = &[
    ("what is caramelization", Intent::Factual),
    ("what is photosynthesis", Intent::Factual),
    ("what are the principles of stoicism", Intent::Factual),
    ("who wrote meditations", Intent::Factual),
    ("how does fermentation work", Intent::Factual),
    ("explain the maillard reaction", Intent::Factual),
    ("define mycelium", Intent::Factual),
    ("when was the printing press invented", Intent::Factual),
    ("describe the water cycle", Intent::Factual),
    ("what causes inflation", Intent::Factual),
    ("list the stoic virtues", Intent::Factual),
    ("how do you make sourdough bread", Intent::Factual),
    ("what do my notes say about sugar", Intent::Factual),
    ("where do mushrooms grow", Intent::Factual),
    ("summarize my notes on habits", Intent::Factual),
    ("what is the difference between yeast and baking soda", Intent::Factual),
    ("why is the ocean salty", Intent::Factual),
    ("why does bread rise", Intent::Factual),
    ("why do leaves change color in autumn", Intent::Factual),
    ("why is sleep important for memory", Intent::Factual),
    ("why do cats purr", Intent::Factual),
    ("why does metal rust", Intent::Factual),
    ("why is the sky dark at night", Intent::Factual),
    ("why do onions make you cry", Intent::Factual),
    ("why does caramel burn", Intent::Factual),
    ("how do plants make food", Intent::Factual),
    ("how does the heart pump blood", Intent::Factual),
    ("how is cheese made", Intent::Factual),
    ("is coffee bad for sleep", Intent::Factual),
    ("does caffeine affect memory", Intent::Factual),
    ("why do we need vitamins", Intent::Factual),
    ("why does dough need kneading", Intent::Factual),
    ("why shouldn't you rush it", Intent::Continuation),
    ("tell me more", Intent::Continuation),
    ("tell me more about it", Intent::Continuation),
    ("explain it again", Intent::Continuation),
    ("why is it important", Intent::Continuation),
    ("why does that happen", Intent::Continuation),
    ("how does it work", Intent::Continuation),
    ("what does it mean", Intent::Continuation),
    ("can you elaborate on that", Intent::Continuation),
    ("what about that", Intent::Continuation),
    ("and then what", Intent::Continuation),
    ("why is that", Intent::Continuation),
    ("how is it used", Intent::Continuation),
    ("go on", Intent::Continuation),
    ("what else", Intent::Continuation),
    ("why shouldn't you do that", Intent::Continuation),
    ("say that again", Intent::Continuation),
    ("more about this", Intent::Continuation),
    ("can you explain this again", Intent::Continuation),
    ("why would it matter", Intent::Continuation),
    ("what happens after that", Intent::Continuation),
    ("tell me again", Intent::Continuation),
    ("why does it do that", Intent::Continuation),
    ("how come it does that", Intent::Continuation),
    ("hello", Intent::Casual),
    ("hello there", Intent::Casual),
    ("hi", Intent::Casual),
    ("hey there", Intent::Casual),
    ("good morning", Intent::Casual),
    ("good night", Intent::Casual),
    ("how are you", Intent::Casual),
    ("how are you doing today", Intent::Casual),
    ("thanks", Intent::Casual),
    ("thank you so much", Intent::Casual),
    ("whats up", Intent::Casual),
    ("lol nice", Intent::Casual),
    ("cool thanks", Intent::Casual),
    ("you are awesome", Intent::Casual),
    ("bye", Intent::Casual),
    ("see you later", Intent::Casual),
];

/// Multinomial naive Bayes over normalized words, with add-one smoothing.
/// Words never seen during fitting are ignored at prediction time.
#[derive(Debug, Clone)]
pub struct LabelModel {
    labels: Vec<String>,
    log_priors: Vec<f64>,
    word_counts: Vec<HashMap<String, u32>>,
    totals: Vec<u32>,
    vocab_size: usize,
}

#[derive(Deserialize)]
struct LabelledRecord {
    text: String,
    label: serde_json::Value,
}

impl LabelModel {
    /// Fit from `(text, label id)` pairs.
    pub fn fit<'a, I>(samples: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut labels: Vec<String> = Vec::new();
        let mut docs: Vec<u32> = Vec::new();
        let mut word_counts: Vec<HashMap<String, u32>> = Vec::new();
        let mut totals: Vec<u32> = Vec::new();
        let mut vocab = std::collections::HashSet::new();

        for (sample, label) in samples {
            let idx = match labels.iter().position(|l| l == label) {
                Some(i) => i,
                None => {
                    labels.push(label.to_string());
                    docs.push(0);
                    word_counts.push(HashMap::new());
                    totals.push(0);
                    labels.len() - 1
                }
            };
            docs[idx] += 1;
            for word in text::words(sample) {
                *word_counts[idx].entry(word.clone()).or_insert(0) += 1;
                totals[idx] += 1;
                vocab.insert(word);
            }
        }

        let n_docs: u32 = docs.iter().sum();
        if n_docs == 0 {
            bail!("cannot fit intent model: no labelled samples");
        }
        let log_priors = docs
            .iter()
            .map(|&d| (d as f64 / n_docs as f64).ln())
            .collect();

        Ok(Self {
            labels,
            log_priors,
            word_counts,
            totals,
            vocab_size: vocab.len(),
        })
    }

    /// Fit from the built-in seed samples.
    pub fn seeded() -> Self {
        let samples: Vec<(&str, &str)> = SEED_SAMPLES
            .iter()
            .map(|(text, intent)| (*text, label_for_intent(*intent)))
            .collect();
        // The seed set is non-empty, so fitting cannot fail.
        Self::fit(samples).unwrap_or_else(|_| Self::empty())
    }

    fn empty() -> Self {
        Self {
            labels: Vec::new(),
            log_priors: Vec::new(),
            word_counts: Vec::new(),
            totals: Vec::new(),
            vocab_size: 0,
        }
    }

    /// Fit from a JSONL file. Labels may be integers (`0`), label ids
    /// (`"LABEL_0"`) or intent names (`"factual"`). Blank lines are skipped.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read intent data: {}", path.display()))?;

        let mut samples: Vec<(String, String)> = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record: LabelledRecord = serde_json::from_str(line).with_context(|| {
                format!("Invalid intent record at {}:{}", path.display(), lineno + 1)
            })?;
            let label = record_label(&record.label).with_context(|| {
                format!("Invalid label at {}:{}", path.display(), lineno + 1)
            })?;
            samples.push((record.text, label));
        }

        Self::fit(samples.iter().map(|(t, l)| (t.as_str(), l.as_str())))
            .with_context(|| format!("No usable samples in {}", path.display()))
    }

    /// Most likely label id, or `None` when the model knows none of the
    /// question's words.
    pub fn predict(&self, question: &str) -> Option<&str> {
        let words: Vec<String> = text::words(question)
            .into_iter()
            .filter(|w| self.word_counts.iter().any(|c| c.contains_key(w)))
            .collect();
        if words.is_empty() {
            return None;
        }

        let denom_extra = self.vocab_size as f64;
        let mut best: Option<(usize, f64)> = None;
        for (i, prior) in self.log_priors.iter().enumerate() {
            let denom = self.totals[i] as f64 + denom_extra;
            let score = words.iter().fold(*prior, |acc, w| {
                let count = self.word_counts[i].get(w).copied().unwrap_or(0) as f64;
                acc + ((count + 1.0) / denom).ln()
            });
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((i, score));
            }
        }
        best.map(|(i, _)| self.labels[i].as_str())
    }
}

fn record_label(value: &serde_json::Value) -> Result<String> {
    if let Some(n) = value.as_u64() {
        return Ok(format!("LABEL_{}", n));
    }
    match value.as_str() {
        Some(s) if s.starts_with("LABEL_") => Ok(s.to_string()),
        Some(s) => match Intent::from_name(s) {
            Some(intent) => Ok(label_for_intent(intent).to_string()),
            None => bail!("unknown intent label '{}'", s),
        },
        None => bail!("label must be an integer or string"),
    }
}

/// Classifies with a fitted [`LabelModel`].
pub struct ModelClassifier {
    model: LabelModel,
}

impl ModelClassifier {
    pub fn new(model: LabelModel) -> Self {
        Self { model }
    }

    /// Fit from `path` when given, else from the seed set.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let model = match path {
            Some(p) => LabelModel::from_jsonl(p)?,
            None => LabelModel::seeded(),
        };
        Ok(Self::new(model))
    }
}

#[async_trait]
impl IntentClassifier for ModelClassifier {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn classify(&self, question: &str) -> Intent {
        self.model
            .predict(question)
            .map(intent_for_label)
            .unwrap_or(Intent::Factual)
    }
}

// ============ Prompt ============

/// Asks the language model to name the category.
pub struct PromptClassifier {
    model: BoundedModel,
}

impl PromptClassifier {
    pub fn new(model: BoundedModel) -> Self {
        Self { model }
    }
}

fn intent_prompt(question: &str) -> String {
    format!(
        "Classify the user's message into exactly one category.\n\n\
         factual: a self-contained question about a topic.\n\
         continuation: a follow-up that refers to the previous question \
         (uses words like it, that, more, again).\n\
         casual: greetings, thanks, small talk.\n\n\
         MESSAGE: {}\n\n\
         Answer with one word: factual, continuation or casual.\nCategory:",
        question
    )
}

/// Accept a reply only when it names exactly one category.
fn parse_category(reply: &str) -> Option<Intent> {
    let found: Vec<Intent> = text::words(reply)
        .iter()
        .filter_map(|w| Intent::from_name(w))
        .collect();
    match found.as_slice() {
        [only] => Some(*only),
        [first, rest @ ..] if rest.iter().all(|i| i == first) => Some(*first),
        _ => None,
    }
}

#[async_trait]
impl IntentClassifier for PromptClassifier {
    fn name(&self) -> &'static str {
        "prompt"
    }

    async fn classify(&self, question: &str) -> Intent {
        let reply = self
            .model
            .generate(
                Stage::Intent,
                &intent_prompt(question),
                &GenerateOptions::greedy(5),
            )
            .await;
        match reply {
            Ok(text) => parse_category(&text).unwrap_or_else(|| {
                tracing::debug!(reply = %text.trim(), "ambiguous intent reply, using factual");
                Intent::Factual
            }),
            Err(e) => {
                tracing::warn!(error = %e, "intent prompt failed, using factual");
                Intent::Factual
            }
        }
    }
}

//! # Vault Assistant
//!
//! A question-answering assistant over a local folder of text notes (the
//! *vault*). Answers are grounded: the language model may only rephrase
//! sentences pulled from the notes, and follow-up questions are resolved
//! against the conversation so far.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌───────────┐
//! │  Intent  │──▶│ Resolver │──▶│  Index   │──▶│ Grounding │──▶│ Synthesis │
//! └──────────┘   └──────────┘   └────┬─────┘   └───────────┘   └─────┬─────┘
//!       ▲                            │ sync gate                     │
//!       │                       ┌────┴─────┐                   ┌─────▼─────┐
//!   question                    │  Vault   │                   │  Context  │
//!                               │ scanner  │                   │   store   │
//!                               └──────────┘                   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! vault --vault ~/notes ask "What is caramelization?"
//! vault --vault ~/notes chat
//! vault --config ./config/vault.toml serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types and fixed answers |
//! | [`error`] | Pipeline error type |
//! | [`text`] | Normalization, sentence splitting, dedup |
//! | [`chunk`] | Word-window chunking |
//! | [`vault`] | Vault scanning |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory index and sync gate |
//! | [`llm`] | Language model clients |
//! | [`context`] | Per-session conversation context |
//! | [`intent`] | Intent classification |
//! | [`resolver`] | Continuation resolution |
//! | [`grounding`] | Evidence sentence selection |
//! | [`synth`] | Answer and chat generation |
//! | [`pipeline`] | Request orchestration |
//! | [`study`] | Teach and quiz modes |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod grounding;
pub mod index;
pub mod intent;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod resolver;
pub mod server;
pub mod study;
pub mod synth;
pub mod text;
pub mod vault;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use vault_assistant::config::Config;
use vault_assistant::llm::{GenerateOptions, LanguageModel};
use vault_assistant::models::NO_INFORMATION;
use vault_assistant::pipeline::Assistant;
use vault_assistant::server::router;

/// Answers every prompt with the same line.
struct FixedModel;

#[async_trait]
impl LanguageModel for FixedModel {
    fn model_name(&self) -> &str {
        "fixed"
    }

    async fn generate(&self, prompt: &str, _options: &GenerateOptions) -> Result<String> {
        if prompt.starts_with("You are a friendly") {
            Ok("Hi! Nice to hear from you.".to_string())
        } else if prompt.starts_with("You are extracting") {
            Ok("Caramelization is the browning of sugar.".to_string())
        } else {
            Ok("Caramelization browns sugar.".to_string())
        }
    }
}

async fn spawn_server() -> (TempDir, String) {
    let tmp = TempDir::new().unwrap();
    fs::write(
        tmp.path().join("sugar.md"),
        "Caramelization is the browning of sugar. Rushing caramelization burns the sugar. \
         Gentle heat keeps caramel sweet and nutty.",
    )
    .unwrap();

    let config = Config::for_vault(tmp.path());
    let assistant = Arc::new(Assistant::with_model(config, Arc::new(FixedModel)).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(assistant)).await.unwrap();
    });

    (tmp, format!("http://{}", addr))
}

async fn post(base: &str, path: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn test_health() {
    let (_tmp, base) = spawn_server().await;
    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_ask_factual_returns_metadata_and_sync() {
    let (_tmp, base) = spawn_server().await;
    let (status, body) = post(&base, "/ask", json!({ "question": "What is caramelization?" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], "Caramelization browns sugar.");
    assert_eq!(body["metadata"]["intent"], "factual");
    assert_eq!(body["metadata"]["chunks_retrieved"], 1);
    assert_eq!(body["metadata"]["sentences_grounded"], 1);
    assert_eq!(body["sync_performed"]["indexed_files"], 1);
    assert!(body["sync_performed"]["last_indexed"].as_f64().unwrap() > 0.0);

    let (_, again) = post(&base, "/ask", json!({ "question": "What is caramelization?" })).await;
    assert!(again.get("sync_performed").is_none());
}

#[tokio::test]
async fn test_ask_continuation_without_history() {
    let (_tmp, base) = spawn_server().await;
    let (status, body) = post(
        &base,
        "/ask",
        json!({ "question": "Tell me more", "session_id": "fresh" }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["answer"], NO_INFORMATION);
    assert!(body.get("metadata").is_none());
}

#[tokio::test]
async fn test_ask_casual() {
    let (_tmp, base) = spawn_server().await;
    let (_, body) = post(&base, "/ask", json!({ "question": "hello there" })).await;
    assert_eq!(body["answer"], "Hi! Nice to hear from you.");
    assert!(body.get("metadata").is_none());
}

#[tokio::test]
async fn test_sync_endpoint() {
    let (_tmp, base) = spawn_server().await;
    let (status, body) = post(&base, "/sync", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(body["file_count"], 1);
    assert_eq!(body["indexed_files"], 1);
    assert_eq!(body["empty_files"], 0);
}

#[tokio::test]
async fn test_teach_returns_steps_and_context() {
    let (_tmp, base) = spawn_server().await;
    let (status, body) = post(&base, "/teach", json!({ "question": "What is caramelization?" })).await;
    assert_eq!(status, 200);
    assert_eq!(body["question"], "What is caramelization?");
    assert_eq!(body["steps"].as_array().unwrap().len(), 5);
    assert_eq!(body["context"].as_array().unwrap().len(), 1);

    let (status, body) = post(&base, "/teach", json!({ "question": "  " })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_quiz_question_then_feedback() {
    let (_tmp, base) = spawn_server().await;

    let (_, body) = post(&base, "/quiz", json!({ "topic": "caramelization" })).await;
    assert_eq!(body["mode"], "question");
    assert!(body["prompt"].as_str().unwrap().contains("caramelization"));

    // Two content words from the note are needed to retrieve it.
    let (status, body) = post(
        &base,
        "/quiz",
        json!({
            "topic": "caramelization sugar",
            "answer": "Gentle heat browns it, rushing burns it."
        }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "feedback");
    assert!(!body["feedback"].as_str().unwrap().is_empty());
    assert_eq!(body["context"].as_array().unwrap().len(), 1);

    let (status, _) = post(&base, "/quiz", json!({ "topic": "" })).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let (_tmp, base) = spawn_server().await;
    let response = reqwest::Client::new()
        .get(format!("{}/health", base))
        .header("Origin", "http://localhost:5173")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .unwrap(),
        "*"
    );
}

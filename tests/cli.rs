use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn vault_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_vault"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let notes = root.join("notes");
    fs::create_dir_all(notes.join("cooking")).unwrap();
    fs::write(
        notes.join("cooking/caramel.md"),
        "# Caramel\n\nCaramelization is the browning of sugar.\n\nNever rush it.",
    )
    .unwrap();
    fs::write(
        notes.join("fungi.txt"),
        "Mycelium is the root network of fungi.",
    )
    .unwrap();
    fs::write(notes.join("blank.md"), "").unwrap();
    fs::create_dir_all(notes.join(".obsidian")).unwrap();
    fs::write(notes.join(".obsidian/workspace.md"), "ui state").unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_path = config_dir.join("vault.toml");
    fs::write(
        &config_path,
        format!(
            r#"[vault]
root = "{}"

[retrieval]
backend = "keyword"
limit = 5

[llm]
provider = "ollama"
url = "http://127.0.0.1:9"
timeout_secs = 2
max_retries = 0
"#,
            notes.display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run_vault(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(vault_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run vault binary");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_sync_prints_summary() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_vault(&config, &["sync"]);
    assert!(ok, "sync failed: {}", stderr);

    let info: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(info["file_count"], 3);
    assert_eq!(info["indexed_files"], 2);
    assert_eq!(info["empty_files"], 1);
}

#[test]
fn test_ask_follow_up_without_history() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_vault(&config, &["ask", "Tell me more"]);
    assert!(ok, "ask failed: {}", stderr);
    assert_eq!(stdout.trim(), "I don't have that information in my vault yet.");
}

#[test]
fn test_ask_unknown_topic_json() {
    let (_tmp, config) = setup_test_env();
    let (stdout, stderr, ok) = run_vault(&config, &["ask", "What is zymurgy?", "--json"]);
    assert!(ok, "ask failed: {}", stderr);

    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["answer"], "I don't have that information in my vault yet.");
    assert_eq!(response["sync_performed"]["indexed_files"], 2);
}

#[test]
fn test_unreachable_model_apologizes() {
    let (_tmp, config) = setup_test_env();
    let (stdout, _stderr, ok) = run_vault(&config, &["ask", "What is caramelization?"]);
    assert!(ok);
    assert_eq!(stdout.trim(), "My brain just lagged. Say that again?");
}

#[test]
fn test_vault_flag_without_config_file() {
    let (tmp, _config) = setup_test_env();
    let missing = tmp.path().join("nope.toml");
    let notes = tmp.path().join("notes");
    let output = Command::new(vault_binary())
        .arg("--config")
        .arg(&missing)
        .arg("--vault")
        .arg(&notes)
        .arg("sync")
        .output()
        .unwrap();
    assert!(output.status.success());
    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info["indexed_files"], 2);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_stdout, stderr, ok) = run_vault(&tmp.path().join("nope.toml"), &["sync"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_invalid_strategy_rejected() {
    let (_tmp, config) = setup_test_env();
    let mut content = fs::read_to_string(&config).unwrap();
    content.push_str("\n[pipeline]\ngrounding = \"magic\"\n");
    fs::write(&config, content).unwrap();

    let (_stdout, stderr, ok) = run_vault(&config, &["sync"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown grounding strategy"));
}

#[test]
fn test_chat_reads_questions_until_exit() {
    let (_tmp, config) = setup_test_env();
    let mut child = Command::new(vault_binary())
        .arg("--config")
        .arg(&config)
        .arg("chat")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(b"Tell me more\n\nexit\nWhat is zymurgy?\n")
        .unwrap();

    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(
        stdout.matches("I don't have that information in my vault yet.").count(),
        1
    );
    assert!(stdout.starts_with("> "));
}

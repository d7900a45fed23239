//! In-memory vault index and sync gate.
//!
//! [`VaultIndex`] owns the current [`IndexSnapshot`] (every file's chunks
//! plus, for the semantic backend, one vector per distinct chunk text) and
//! the sync watermark. It is the only place vault state lives; the
//! pipeline receives it by `Arc` and never touches the filesystem itself.
//!
//! # Consistency
//!
//! A resync builds a complete new snapshot off to the side and swaps the
//! `Arc` in under a short write lock, so a query always sees either the
//! old or the new snapshot, never a half-built one. Syncs themselves are
//! serialized by an async mutex; the staleness check is repeated after the
//! mutex is acquired so concurrent requests trigger at most one rebuild.
//!
//! # Retrieval backends
//!
//! | Backend | Scoring | Cut-off |
//! |---------|---------|---------|
//! | `keyword` | number of normalized query words present in the chunk | `min_keyword_score` (2) |
//! | `semantic` | cosine similarity of query and chunk embeddings | `min_similarity` (0.2) |
//!
//! Both return at most `limit` chunks, best first, ties in vault order.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::embedding::{cosine_similarity, embed_batched, embed_query, Embedder};
use crate::models::{ScoredChunk, SyncInfo, VaultFile};
use crate::text::words;
use crate::vault::{latest_mtime, scan_vault};

/// An immutable view of the vault at one sync.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    pub files: Vec<VaultFile>,
    /// Chunk hash → embedding. Empty for the keyword backend.
    vectors: HashMap<String, Vec<f32>>,
}

impl IndexSnapshot {
    pub fn chunk_count(&self) -> usize {
        self.files.iter().map(|f| f.chunks.len()).sum()
    }
}

/// Watermark and counters from the most recent sync.
#[derive(Debug, Clone, Default)]
pub struct SyncState {
    pub synced: bool,
    pub last_known_mtime: Option<SystemTime>,
    pub indexed_file_count: usize,
}

pub struct VaultIndex {
    config: Arc<Config>,
    embedder: Option<Arc<dyn Embedder>>,
    snapshot: RwLock<Arc<IndexSnapshot>>,
    state: RwLock<SyncState>,
    sync_lock: tokio::sync::Mutex<()>,
}

impl VaultIndex {
    /// Create an empty, never-synced index. `embedder` is required when
    /// `retrieval.backend = "semantic"`.
    pub fn new(config: Arc<Config>, embedder: Option<Arc<dyn Embedder>>) -> Result<Self> {
        if config.retrieval.backend == "semantic" && embedder.is_none() {
            anyhow::bail!("semantic retrieval requires an embedding provider");
        }
        Ok(Self {
            config,
            embedder,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::default())),
            state: RwLock::new(SyncState::default()),
            sync_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn state(&self) -> SyncState {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// True if no sync has happened yet or a vault file is newer than the
    /// watermark.
    pub async fn is_stale(&self) -> Result<bool> {
        let state = self.state();
        if !state.synced {
            return Ok(true);
        }
        let latest = self.newest_mtime().await?;
        Ok(match (latest, state.last_known_mtime) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(latest), Some(known)) => latest > known,
        })
    }

    /// Resync only when stale. Returns the sync result if one ran.
    pub async fn sync_if_stale(&self) -> Result<Option<SyncInfo>> {
        if !self.is_stale().await? {
            return Ok(None);
        }
        let _guard = self.sync_lock.lock().await;
        // Another request may have finished a rebuild while we waited.
        if !self.is_stale().await? {
            return Ok(None);
        }
        self.rebuild().await.map(Some)
    }

    /// Newest vault mtime, walked off the async workers.
    async fn newest_mtime(&self) -> Result<Option<SystemTime>> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || latest_mtime(&config))
            .await
            .context("vault mtime task panicked")?
    }

    /// Unconditionally rescan the vault and swap in a new snapshot.
    pub async fn sync(&self) -> Result<SyncInfo> {
        let _guard = self.sync_lock.lock().await;
        self.rebuild().await
    }

    async fn rebuild(&self) -> Result<SyncInfo> {
        tracing::info!(vault = %self.config.vault.root.display(), "syncing vault");

        // Watermark first, so edits that land during the scan trigger
        // another sync next time.
        let watermark = self.newest_mtime().await?;
        let config = self.config.clone();
        let scan = tokio::task::spawn_blocking(move || scan_vault(&config))
            .await
            .context("vault scan task panicked")??;

        let vectors = match &self.embedder {
            Some(embedder) if self.config.retrieval.backend == "semantic" => {
                let previous = self.snapshot();
                self.embed_chunks(embedder.as_ref(), &scan.files, &previous)
                    .await?
            }
            _ => HashMap::new(),
        };

        let info = SyncInfo {
            vault_path: self.config.vault.root.display().to_string(),
            file_count: scan.file_count(),
            empty_files: scan.empty_files(),
            indexed_files: scan.indexed_files(),
            last_indexed: unix_now(),
        };

        let snapshot = Arc::new(IndexSnapshot {
            files: scan.files,
            vectors,
        });
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = SyncState {
            synced: true,
            last_known_mtime: watermark,
            indexed_file_count: info.indexed_files,
        };

        tracing::info!(
            files = info.file_count,
            indexed = info.indexed_files,
            empty = info.empty_files,
            "vault synced"
        );
        Ok(info)
    }

    /// Embed chunks whose text is new since the previous snapshot; reuse
    /// the rest.
    async fn embed_chunks(
        &self,
        embedder: &dyn Embedder,
        files: &[VaultFile],
        previous: &IndexSnapshot,
    ) -> Result<HashMap<String, Vec<f32>>> {
        let mut vectors = HashMap::new();
        let mut pending_hashes = Vec::new();
        let mut pending_texts = Vec::new();
        let mut queued = HashSet::new();

        for chunk in files.iter().flat_map(|f| f.chunks.iter()) {
            if let Some(v) = previous.vectors.get(&chunk.hash) {
                vectors.insert(chunk.hash.clone(), v.clone());
            } else if queued.insert(chunk.hash.clone()) {
                pending_hashes.push(chunk.hash.clone());
                pending_texts.push(chunk.text.clone());
            }
        }

        if !pending_texts.is_empty() {
            tracing::debug!(
                new = pending_texts.len(),
                reused = vectors.len(),
                "embedding vault chunks"
            );
            let embedded =
                embed_batched(embedder, &pending_texts, self.config.embedding.batch_size).await?;
            vectors.extend(pending_hashes.into_iter().zip(embedded));
        }

        Ok(vectors)
    }

    /// Rank chunks for `text` with the configured backend.
    pub async fn query(&self, text: &str, limit: usize) -> Result<Vec<ScoredChunk>> {
        let snapshot = self.snapshot();
        if text.trim().is_empty() || snapshot.chunk_count() == 0 {
            return Ok(Vec::new());
        }

        match (&self.embedder, self.config.retrieval.backend.as_str()) {
            (Some(embedder), "semantic") => {
                let query_vec = embed_query(embedder.as_ref(), text).await?;
                Ok(semantic_rank(
                    &snapshot,
                    &query_vec,
                    limit,
                    self.config.retrieval.min_similarity,
                ))
            }
            _ => Ok(keyword_rank(
                &snapshot,
                text,
                limit,
                self.config.retrieval.min_keyword_score,
            )),
        }
    }
}

/// Score every chunk by how many query words it contains.
pub fn keyword_rank(
    snapshot: &IndexSnapshot,
    query: &str,
    limit: usize,
    min_score: usize,
) -> Vec<ScoredChunk> {
    let query_words = words(query);
    if query_words.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<ScoredChunk> = Vec::new();
    for file in &snapshot.files {
        for chunk in &file.chunks {
            let chunk_words: HashSet<String> = words(&chunk.text).into_iter().collect();
            let score = query_words
                .iter()
                .filter(|w| chunk_words.contains(*w))
                .count();
            if score >= min_score {
                matches.push(ScoredChunk {
                    file: file.name.clone(),
                    chunk: chunk.text.clone(),
                    score: score as f64,
                });
            }
        }
    }

    sort_and_truncate(matches, limit)
}

fn semantic_rank(
    snapshot: &IndexSnapshot,
    query_vec: &[f32],
    limit: usize,
    min_similarity: f32,
) -> Vec<ScoredChunk> {
    let mut matches = Vec::new();
    for file in &snapshot.files {
        for chunk in &file.chunks {
            let Some(vector) = snapshot.vectors.get(&chunk.hash) else {
                continue;
            };
            let sim = cosine_similarity(query_vec, vector);
            if sim >= min_similarity {
                matches.push(ScoredChunk {
                    file: file.name.clone(),
                    chunk: chunk.text.clone(),
                    score: sim as f64,
                });
            }
        }
    }
    sort_and_truncate(matches, limit)
}

fn sort_and_truncate(mut matches: Vec<ScoredChunk>, limit: usize) -> Vec<ScoredChunk> {
    // Stable: equal scores keep vault order.
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(limit);
    matches
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_text;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn snapshot_of(files: &[(&str, &str)]) -> IndexSnapshot {
        IndexSnapshot {
            files: files
                .iter()
                .map(|(name, body)| VaultFile {
                    name: name.to_string(),
                    path: name.to_string(),
                    extension: ".md".to_string(),
                    chunks: chunk_text(name, body, 300, 0),
                })
                .collect(),
            vectors: HashMap::new(),
        }
    }

    #[test]
    fn test_keyword_requires_two_shared_words() {
        let snap = snapshot_of(&[
            ("sugar.md", "Caramelization is the browning of sugar through heat."),
            ("bread.md", "Bread rises because yeast produces gas."),
        ]);
        let hits = keyword_rank(&snap, "What is caramelization?", 5, 2);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "sugar.md");
        assert_eq!(hits[0].score, 2.0);

        assert!(keyword_rank(&snap, "caramelization", 5, 2).is_empty());
    }

    #[test]
    fn test_keyword_ranks_by_overlap_and_limits() {
        let snap = snapshot_of(&[
            ("a.md", "sugar heat"),
            ("b.md", "sugar heat browning"),
            ("c.md", "sugar heat browning flavor"),
        ]);
        let hits = keyword_rank(&snap, "sugar heat browning flavor", 2, 2);
        let files: Vec<&str> = hits.iter().map(|h| h.file.as_str()).collect();
        assert_eq!(files, vec!["c.md", "b.md"]);
    }

    #[test]
    fn test_keyword_ties_keep_vault_order() {
        let snap = snapshot_of(&[("a.md", "sugar heat"), ("b.md", "heat sugar")]);
        let hits = keyword_rank(&snap, "sugar heat", 5, 2);
        let files: Vec<&str> = hits.iter().map(|h| h.file.as_str()).collect();
        assert_eq!(files, vec!["a.md", "b.md"]);
    }

    /// Embeds text as counts of a handful of vocabulary words.
    struct VocabEmbedder {
        calls: AtomicUsize,
        embedded: AtomicUsize,
    }

    const VOCAB: &[&str] = &["sugar", "heat", "yeast", "bread"];

    #[async_trait]
    impl Embedder for VocabEmbedder {
        fn model_name(&self) -> &str {
            "vocab"
        }
        fn dims(&self) -> usize {
            VOCAB.len()
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let w = words(t);
                    VOCAB
                        .iter()
                        .map(|v| w.iter().filter(|x| x == v).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    fn write_vault(files: &[(&str, &str)]) -> TempDir {
        let tmp = TempDir::new().unwrap();
        for (name, body) in files {
            fs::write(tmp.path().join(name), body).unwrap();
        }
        tmp
    }

    #[tokio::test]
    async fn test_missing_vault_syncs_zero_files_once() {
        let config = Arc::new(Config::for_vault("/no/such/vault"));
        let index = VaultIndex::new(config, None).unwrap();

        let first = index.sync_if_stale().await.unwrap().unwrap();
        assert_eq!(first.file_count, 0);
        assert!(index.sync_if_stale().await.unwrap().is_none());
        assert!(index.query("anything at all", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_gate_is_idempotent() {
        let tmp = write_vault(&[("a.md", "sugar and heat"), ("b.md", "")]);
        let index = VaultIndex::new(Arc::new(Config::for_vault(tmp.path())), None).unwrap();

        let info = index.sync_if_stale().await.unwrap().expect("first sync");
        assert_eq!(info.file_count, 2);
        assert_eq!(info.indexed_files, 1);
        assert_eq!(info.empty_files, 1);

        assert!(index.sync_if_stale().await.unwrap().is_none());
        let again = index.sync().await.unwrap();
        assert_eq!(again.indexed_files, info.indexed_files);
        assert_eq!(index.state().indexed_file_count, 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_new_note_makes_index_stale() {
        let tmp = write_vault(&[("a.md", "sugar and heat")]);
        let index = VaultIndex::new(Arc::new(Config::for_vault(tmp.path())), None).unwrap();
        assert!(index.is_stale().await.unwrap());

        index.sync().await.unwrap();
        assert!(!index.is_stale().await.unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        fs::write(tmp.path().join("b.md"), "yeast and bread").unwrap();
        assert!(index.is_stale().await.unwrap());

        let info = index.sync_if_stale().await.unwrap().expect("resync");
        assert_eq!(info.indexed_files, 2);
    }

    #[tokio::test]
    async fn test_semantic_reuses_vectors_across_syncs() {
        let tmp = write_vault(&[
            ("sugar.md", "sugar heat sugar"),
            ("bread.md", "yeast bread"),
        ]);
        let mut config = Config::for_vault(tmp.path());
        config.retrieval.backend = "semantic".to_string();
        config.embedding.provider = "ollama".to_string();

        let embedder = Arc::new(VocabEmbedder {
            calls: AtomicUsize::new(0),
            embedded: AtomicUsize::new(0),
        });
        let index =
            VaultIndex::new(Arc::new(config), Some(embedder.clone() as Arc<dyn Embedder>)).unwrap();

        index.sync().await.unwrap();
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 2);

        index.sync().await.unwrap();
        assert_eq!(embedder.embedded.load(Ordering::SeqCst), 2);

        let hits = index.query("bread", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file, "bread.md");
        assert!(hits[0].score > 0.5);
    }

    #[test]
    fn test_semantic_requires_embedder() {
        let mut config = Config::for_vault("/tmp");
        config.retrieval.backend = "semantic".to_string();
        assert!(VaultIndex::new(Arc::new(config), None).is_err());
    }
}

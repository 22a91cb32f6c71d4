//! End-to-end turns through `ChatService` on a real SQLite database, with a
//! scripted generator and a bag-of-words embedder.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use personaplex::chat::ChatService;
use personaplex::config::Config;
use personaplex::extract::FileExtractor;
use personaplex::pipeline::{Pipeline, PipelineSettings, Stage, TurnOutcome};
use personaplex::sqlite_store::{SqliteConversationStore, SqliteIndexCatalog};
use personaplex::{db, migrate};
use personaplex_core::chunk::ChunkParams;
use personaplex_core::embedding::EmbeddingProvider;
use personaplex_core::generation::Generator;
use personaplex_core::models::Role;
use personaplex_core::reader::DocumentReader;
use personaplex_core::router::Category;

/// Records every prompt; answers the refinement prompt with a fixed
/// plain-text reply.
#[derive(Default)]
struct ScriptedGenerator {
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, prompt: &str) -> Result<String> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_string());
        if prompt.starts_with("Improve and clean") {
            Ok("Clean answer.".to_string())
        } else {
            Ok("## Draft answer".to_string())
        }
    }
}

const DIMS: usize = 64;

/// Hashes lowercase words into a fixed number of buckets. Can be switched
/// to fail, which makes question embedding (and so retrieval) fail.
#[derive(Default)]
struct BagOfWordsEmbedder {
    failing: AtomicBool,
}

fn bucket(word: &str) -> usize {
    word.bytes()
        .fold(7usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
        % DIMS
}

#[async_trait]
impl EmbeddingProvider for BagOfWordsEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("embedding backend down");
        }
        Ok(texts
            .iter()
            .map(|text| {
                let mut vec = vec![0.0f32; DIMS];
                for word in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|w| w.len() > 2)
                {
                    vec[bucket(word)] += 1.0;
                }
                vec
            })
            .collect())
    }
}

struct Harness {
    _tmp: TempDir,
    root: std::path::PathBuf,
    config: Config,
    generator: Arc<ScriptedGenerator>,
    embedder: Arc<BagOfWordsEmbedder>,
    chat: ChatService,
}

async fn build_chat(
    config: &Config,
    generator: Arc<ScriptedGenerator>,
    embedder: Option<Arc<BagOfWordsEmbedder>>,
) -> ChatService {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let reader: Arc<dyn DocumentReader> = Arc::new(FileExtractor);
    let embedder = embedder.map(|e| e as Arc<dyn EmbeddingProvider>);
    ChatService::new(
        Arc::new(SqliteConversationStore::new(
            pool.clone(),
            config.pipeline.title_chars,
        )),
        Arc::new(SqliteIndexCatalog::new(pool, embedder, 16)),
        reader.clone(),
        Pipeline::new(generator, reader, PipelineSettings::from_config(config)),
        ChunkParams::new(120, 20).unwrap(),
    )
}

async fn harness() -> Harness {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    let mut config = Config::minimal(root.join("data/plex.sqlite"));
    config.retrieval.top_k = 1;
    let generator = Arc::new(ScriptedGenerator::default());
    let embedder = Arc::new(BagOfWordsEmbedder::default());
    let chat = build_chat(&config, generator.clone(), Some(embedder.clone())).await;
    Harness {
        _tmp: tmp,
        root,
        config,
        generator,
        embedder,
        chat,
    }
}

fn write(root: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = root.join(name);
    fs::write(&path, content).unwrap();
    path
}

const HANDBOOK: &str = "Vacation policy: employees receive twenty five vacation days per year. \
    Unused vacation days expire in March.\n\n\
    Security policy: laptops must use full disk encryption and screen locks.\n\n\
    Expense policy: travel expenses need a receipt and manager approval within thirty days.";

#[tokio::test]
async fn test_summary_without_document() {
    let h = harness().await;
    let reply = h
        .chat
        .ask("alice", None, "Summarize this document")
        .await
        .unwrap();

    assert_eq!(reply.category, Category::Summary);
    assert_eq!(reply.stages, Stage::ALL.to_vec());
    assert_eq!(reply.outcome, TurnOutcome::Answered);
    assert_eq!(reply.answer, "Clean answer.");

    let session = h.chat.session(&reply.session_id).await.unwrap();
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.turns[0].role, Role::User);
    assert_eq!(session.turns[0].content, "Summarize this document");
    assert_eq!(session.turns[1].role, Role::Assistant);

    let prompts = h.generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("No document available."));
    assert!(prompts[1].contains("## Draft answer"));
}

#[tokio::test]
async fn test_n_turns_give_alternating_log_and_stable_title() {
    let h = harness().await;
    let first = h
        .chat
        .ask("alice", None, "What does the handbook say about vacation?")
        .await
        .unwrap();
    let id = first.session_id.clone();

    for q in ["explain the security theme", "give me the references", "score my resume"] {
        h.chat.ask("alice", Some(id.as_str()), q).await.unwrap();
    }

    let session = h.chat.session(&id).await.unwrap();
    assert_eq!(session.turns.len(), 8);
    for (i, turn) in session.turns.iter().enumerate() {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        assert_eq!(turn.role, expected);
    }
    assert_eq!(
        session.title.as_deref(),
        Some("What does the handbook say about vacation?")
    );
    assert_eq!(
        h.chat.last_answer(&id).await.unwrap().as_deref(),
        Some("Clean answer.")
    );
}

#[tokio::test]
async fn test_retrieval_grounds_generation_prompt() {
    let h = harness().await;
    let path = write(&h.root, "handbook.txt", HANDBOOK);
    let upload = h.chat.upload("alice", None, &path).await.unwrap();
    assert!(upload.indexed);
    assert!(upload.chunks > 1);
    assert!(upload.degraded.is_none());

    let reply = h
        .chat
        .ask(
            "alice",
            Some(upload.session_id.as_str()),
            "How many vacation days do employees receive?",
        )
        .await
        .unwrap();
    assert_eq!(reply.category, Category::Qa);

    let prompts = h.generator.prompts();
    let generation = &prompts[0];
    assert!(generation.starts_with("Answer strictly from the document."));
    assert!(generation.contains("twenty five vacation days"));
    assert!(!generation.contains("full disk encryption"));
}

#[tokio::test]
async fn test_retrieval_failure_falls_back_to_document_text() {
    let h = harness().await;
    let path = write(&h.root, "handbook.txt", HANDBOOK);
    let upload = h.chat.upload("alice", None, &path).await.unwrap();

    h.embedder.failing.store(true, Ordering::SeqCst);
    let reply = h
        .chat
        .ask("alice", Some(upload.session_id.as_str()), "What about expenses?")
        .await
        .unwrap();
    assert_eq!(reply.outcome, TurnOutcome::Answered);

    let generation = &h.generator.prompts()[0];
    assert!(generation.contains("Vacation policy"));
    assert!(generation.contains("Expense policy"));
}

#[tokio::test]
async fn test_reupload_replaces_document() {
    let h = harness().await;
    let first = write(&h.root, "handbook.txt", HANDBOOK);
    let upload = h.chat.upload("alice", None, &first).await.unwrap();
    let id = upload.session_id;

    let second = write(
        &h.root,
        "menu.txt",
        "Cafeteria menu: pasta on Monday, curry on Tuesday, tacos on Friday.",
    );
    h.chat.upload("alice", Some(id.as_str()), &second).await.unwrap();

    let doc = h.chat.document("alice", &id).await.unwrap().unwrap();
    assert_eq!(doc.file_name, "menu.txt");

    h.chat
        .ask("alice", Some(id.as_str()), "What is served on Friday?")
        .await
        .unwrap();
    let generation = &h.generator.prompts()[0];
    assert!(generation.contains("tacos"));
    assert!(!generation.contains("Vacation policy"));
}

#[tokio::test]
async fn test_unreadable_document_degrades_turn() {
    let h = harness().await;
    let path = write(&h.root, "slides.pptx", "not really slides");
    let upload = h.chat.upload("alice", None, &path).await.unwrap();
    assert_eq!(upload.degraded.as_deref(), Some("Unsupported file format."));
    assert!(!upload.indexed);

    let reply = h
        .chat
        .ask("alice", Some(upload.session_id.as_str()), "Summarize the slides")
        .await
        .unwrap();
    assert_eq!(reply.outcome, TurnOutcome::Answered);
    assert!(h.generator.prompts()[0].contains("Unsupported file format."));
}

#[tokio::test]
async fn test_sessions_newest_first_and_delete_cascades() {
    let h = harness().await;
    let older = h.chat.ask("alice", None, "first chat").await.unwrap();
    let path = write(&h.root, "handbook.txt", HANDBOOK);
    let newer = h.chat.upload("alice", None, &path).await.unwrap();
    h.chat.ask("bob", None, "bob's chat").await.unwrap();

    let listed = h.chat.list_sessions("alice").await.unwrap();
    let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec![newer.session_id.as_str(), older.session_id.as_str()]);
    assert_eq!(listed[0].title, "New Chat");

    assert!(!h.chat.delete_session("bob", &newer.session_id).await.unwrap());
    assert!(h.chat.delete_session("alice", &newer.session_id).await.unwrap());
    assert!(h.chat.session(&newer.session_id).await.is_err());
    assert!(h
        .chat
        .document("alice", &newer.session_id)
        .await
        .unwrap()
        .is_none());
    assert_eq!(h.chat.list_sessions("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_history_survives_restart() {
    let h = harness().await;
    let reply = h.chat.ask("alice", None, "remember this").await.unwrap();
    drop(h.chat);

    let reopened = build_chat(&h.config, Arc::new(ScriptedGenerator::default()), None).await;
    let session = reopened.session(&reply.session_id).await.unwrap();
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.title.as_deref(), Some("remember this"));
}

/// Never answers within the pipeline's timeout.
struct StalledGenerator;

#[async_trait]
impl Generator for StalledGenerator {
    fn name(&self) -> &str {
        "stalled"
    }
    async fn generate(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("never".into())
    }
}

#[tokio::test]
async fn test_generation_timeout_records_agent_error() {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("plex.sqlite"));
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();

    let mut settings = PipelineSettings::from_config(&config);
    settings.generation_timeout = Duration::from_millis(20);
    let reader: Arc<dyn DocumentReader> = Arc::new(FileExtractor);
    let chat = ChatService::new(
        Arc::new(SqliteConversationStore::new(pool.clone(), 60)),
        Arc::new(SqliteIndexCatalog::new(pool, None, 16)),
        reader.clone(),
        Pipeline::new(Arc::new(StalledGenerator), reader, settings),
        ChunkParams::default(),
    );

    let reply = chat.ask("alice", None, "hello?").await.unwrap();
    assert!(reply.answer.starts_with("Agent error: "));
    assert!(matches!(reply.outcome, TurnOutcome::Failed { .. }));

    let turns = chat.session(&reply.session_id).await.unwrap().turns;
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].content, reply.answer);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_turns_across_sessions_are_all_recorded() {
    let h = harness().await;
    let chat = Arc::new(h.chat);

    let mut sessions = Vec::new();
    for n in 0..8 {
        let reply = chat
            .ask("alice", None, &format!("opening question {}", n))
            .await
            .unwrap();
        sessions.push(reply.session_id);
    }

    let mut handles = Vec::new();
    for id in &sessions {
        for turn in 0..6 {
            let chat = chat.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                chat.ask("alice", Some(id.as_str()), &format!("follow up {}", turn))
                    .await
            }));
        }
    }
    let mut failures = Vec::new();
    for handle in handles {
        if let Err(e) = handle.await.unwrap() {
            failures.push(format!("{:#}", e));
        }
    }
    assert!(failures.is_empty(), "failed turns: {:?}", failures);

    for (n, id) in sessions.iter().enumerate() {
        let session = chat.session(id).await.unwrap();
        assert_eq!(session.turns.len(), 14);
        let expected = format!("opening question {}", n);
        assert_eq!(session.title.as_deref(), Some(expected.as_str()));
        for pair in session.turns.chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Assistant);
        }
    }
}

#[tokio::test]
async fn test_delete_of_foreign_session_keeps_history() {
    let h = harness().await;
    let path = write(&h.root, "handbook.txt", HANDBOOK);
    let upload = h.chat.upload("alice", None, &path).await.unwrap();
    let id = upload.session_id;
    h.chat
        .ask("alice", Some(id.as_str()), "How many vacation days?")
        .await
        .unwrap();

    assert!(!h.chat.delete_session("mallory", &id).await.unwrap());
    assert_eq!(h.chat.session(&id).await.unwrap().turns.len(), 2);
    assert!(h.chat.document("alice", &id).await.unwrap().is_some());

    assert!(h.chat.delete_session("alice", &id).await.unwrap());
    assert!(h.chat.document("alice", &id).await.unwrap().is_none());
}

//! Retrieval-augmented chat over a knowledge base.
//!
//! A chat turn runs as its own task: embed the question, retrieve the
//! closest chunks, prompt the model and forward its fragments as frames.
//! The turn stops as soon as its cancellation token fires or nobody is
//! reading its frames.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::embedding::Embedder;
use super::knowledge_base::KnowledgeBaseManager;
use super::llm::{ChatModel, CompletionRequest, PromptMessage};
use super::vector_store::VectorStore;
use crate::error::{ChatError, VectorStoreError};
use crate::models::{ChatConfig, ChatFrame, ChatMessage, ChatPhase, ChatRequest, ScoredChunk};

pub const NO_CONTEXT_ANSWER: &str = "I couldn't find any relevant information in the uploaded \
documents to answer your question. Please make sure you've uploaded documents related to your query.";

const SYSTEM_PROMPT: &str = "You are a helpful AI assistant that answers questions based on the \
provided document context.

Instructions:
1. Use the provided context to answer the user's question accurately and comprehensively.
2. If the context doesn't contain enough information to answer the question, say so clearly.
3. Always cite which documents or sources you're referencing when possible.
4. If asked about something not in the context, explain that you can only answer based on the \
uploaded documents.

Context from documents:
";

const FRAME_BUFFER: usize = 64;

/// Frames of one chat turn plus the task producing them.
///
/// The task resolves to the cited sources, or to why the turn ended early.
pub struct ChatStream {
    pub frames: mpsc::Receiver<ChatFrame>,
    pub task: JoinHandle<Result<Vec<String>, ChatError>>,
}

pub struct ChatService {
    kbs: Arc<KnowledgeBaseManager>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ChatModel>,
    config: ChatConfig,
}

impl ChatService {
    pub fn new(
        kbs: Arc<KnowledgeBaseManager>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        model: Arc<dyn ChatModel>,
        config: ChatConfig,
    ) -> Self {
        Self {
            kbs,
            embedder,
            store,
            model,
            config,
        }
    }

    /// Validate the request and start streaming an answer.
    ///
    /// Validation failures are returned before any frame is produced.
    pub async fn stream(
        &self,
        kb_id: &str,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChatStream, ChatError> {
        if !self.kbs.exists(kb_id).await {
            return Err(ChatError::NotFound(kb_id.to_string()));
        }
        let (message, temperature) = self.validate(request)?;

        let (tx, rx) = mpsc::channel(FRAME_BUFFER);
        let turn = ChatTurn {
            kb_id: kb_id.to_string(),
            message,
            temperature,
            top_k: self.config.top_k,
            embedder: Arc::clone(&self.embedder),
            store: Arc::clone(&self.store),
            model: Arc::clone(&self.model),
            frames: tx,
            cancel,
            phase: ChatPhase::Received,
        };

        Ok(ChatStream {
            frames: rx,
            task: tokio::spawn(turn.run()),
        })
    }

    /// Answer in one piece by draining a stream.
    pub async fn complete(
        &self,
        kb_id: &str,
        request: ChatRequest,
    ) -> Result<ChatMessage, ChatError> {
        let cancel = CancellationToken::new();
        let _stop = cancel.clone().drop_guard();
        let ChatStream { mut frames, task } = self.stream(kb_id, request, cancel).await?;

        let mut response = String::new();
        while let Some(frame) = frames.recv().await {
            if let ChatFrame::Content { content } = frame {
                response.push_str(&content);
            }
        }

        let sources = task
            .await
            .map_err(|e| ChatError::Failed(format!("chat task stopped: {e}")))??;
        Ok(ChatMessage::assistant(response, sources))
    }

    fn validate(&self, request: ChatRequest) -> Result<(String, f32), ChatError> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(ChatError::InvalidRequest(
                "message must not be empty".to_string(),
            ));
        }
        if message.chars().count() > self.config.max_message_chars {
            return Err(ChatError::InvalidRequest(format!(
                "message must be at most {} characters",
                self.config.max_message_chars
            )));
        }

        let temperature = request
            .temperature
            .unwrap_or(self.config.default_temperature);
        if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
            return Err(ChatError::InvalidRequest(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        Ok((message.to_string(), temperature))
    }
}

struct ChatTurn {
    kb_id: String,
    message: String,
    temperature: f32,
    top_k: usize,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    model: Arc<dyn ChatModel>,
    frames: mpsc::Sender<ChatFrame>,
    cancel: CancellationToken,
    phase: ChatPhase,
}

impl ChatTurn {
    async fn run(mut self) -> Result<Vec<String>, ChatError> {
        let result = self.execute().await;

        match &result {
            Ok(sources) => {
                self.enter(ChatPhase::Done);
                let _ = self
                    .frames
                    .send(ChatFrame::Done {
                        sources: sources.clone(),
                    })
                    .await;
            }
            Err(ChatError::Cancelled) => self.enter(ChatPhase::Cancelled),
            Err(e) => {
                self.enter(ChatPhase::Failed(e.to_string()));
                let _ = self
                    .frames
                    .send(ChatFrame::Error {
                        content: e.to_string(),
                    })
                    .await;
            }
        }

        result
    }

    async fn execute(&mut self) -> Result<Vec<String>, ChatError> {
        self.emit(ChatFrame::Start).await?;

        self.enter(ChatPhase::Embedding);
        let query = self.guarded(self.embedder.embed_query(&self.message)).await??;

        self.enter(ChatPhase::Retrieving);
        let hits = match self
            .guarded(self.store.search(&self.kb_id, &query, self.top_k))
            .await?
        {
            Ok(hits) => hits,
            Err(VectorStoreError::CollectionNotFound(_)) => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        if hits.is_empty() {
            info!(kb_id = %self.kb_id, "no relevant chunks; answering without the model");
            self.emit(ChatFrame::Content {
                content: NO_CONTEXT_ANSWER.to_string(),
            })
            .await?;
            return Ok(Vec::new());
        }

        self.enter(ChatPhase::Prompting);
        let sources = cited_sources(&hits);
        debug!(kb_id = %self.kb_id, chunks = hits.len(), ?sources, "retrieved context");
        let request = CompletionRequest {
            messages: vec![
                PromptMessage::system(build_system_prompt(&hits)),
                PromptMessage::user(self.message.clone()),
            ],
            temperature: self.temperature,
        };

        // Stops the upstream reader on every exit path.
        let upstream = self.cancel.child_token();
        let _stop_upstream = upstream.clone().drop_guard();
        let mut tokens = self
            .guarded(self.model.stream_chat(request, upstream))
            .await??;

        self.enter(ChatPhase::Streaming);
        while let Some(fragment) = self.guarded(tokens.recv()).await? {
            let fragment = fragment?;
            if !fragment.is_empty() {
                self.emit(ChatFrame::Content { content: fragment }).await?;
            }
        }

        Ok(sources)
    }

    fn enter(&mut self, phase: ChatPhase) {
        debug!(kb_id = %self.kb_id, from = %self.phase, to = %phase, "chat phase");
        if let ChatPhase::Failed(reason) = &phase {
            warn!(kb_id = %self.kb_id, %reason, "chat failed");
        }
        self.phase = phase;
    }

    async fn emit(&self, frame: ChatFrame) -> Result<(), ChatError> {
        if self.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        self.frames
            .send(frame)
            .await
            .map_err(|_| ChatError::Cancelled)
    }

    /// Await `work` unless the turn is cancelled or its reader goes away first.
    async fn guarded<F: Future>(&self, work: F) -> Result<F::Output, ChatError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ChatError::Cancelled),
            _ = self.frames.closed() => Err(ChatError::Cancelled),
            output = work => Ok(output),
        }
    }
}

fn build_system_prompt(hits: &[ScoredChunk]) -> String {
    let context = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| {
            format!(
                "Document {} (Source: {}, chunk {}/{}):\n{}",
                i + 1,
                hit.chunk.source,
                hit.chunk.chunk_index + 1,
                hit.chunk.total_chunks,
                hit.chunk.content.trim()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{SYSTEM_PROMPT}{context}\n\nPlease answer the following question based on the above context."
    )
}

/// Source file names in rank order, without repeats.
fn cited_sources(hits: &[ScoredChunk]) -> Vec<String> {
    let mut seen = HashSet::new();
    hits.iter()
        .filter(|hit| seen.insert(hit.chunk.source.as_str()))
        .map(|hit| hit.chunk.source.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::error::LlmError;
    use crate::models::{Role, UploadFile};
    use crate::testing::{
        EndlessChatModel, HashEmbedder, ScriptedChatModel, TEST_DIMENSION, embed_text,
        test_manager,
    };

    fn contract_text() -> String {
        let section = |sentence: &str| sentence.repeat(10);
        [
            section("The termination clause lets either party end this agreement with thirty days notice. "),
            section("Payment terms require invoices to be settled within forty five days of receipt. "),
            section("Confidential information must not be disclosed to any third party at any time. "),
        ]
        .join("\n\n")
    }

    async fn contracts_kb(dir: &std::path::Path) -> (Arc<KnowledgeBaseManager>, Arc<dyn VectorStore>, String) {
        let (manager, store) = test_manager(dir).await;
        let kb = manager
            .create(
                Some("Contracts".to_string()),
                vec![UploadFile::new("contract.txt", contract_text().into_bytes())],
            )
            .await
            .unwrap()
            .knowledge_base;
        let store: Arc<dyn VectorStore> = store;
        (manager, store, kb.id)
    }

    fn service(
        manager: Arc<KnowledgeBaseManager>,
        store: Arc<dyn VectorStore>,
        model: Arc<dyn ChatModel>,
    ) -> ChatService {
        ChatService::new(
            manager,
            Arc::new(HashEmbedder::new()),
            store,
            model,
            ChatConfig::default(),
        )
    }

    fn ask(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            temperature: None,
        }
    }

    async fn collect(stream: &mut ChatStream) -> Vec<ChatFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = stream.frames.recv().await {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_contracts_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        assert_eq!(manager.detail(&kb_id).await.unwrap().chunk_count, 3);

        let query = embed_text("What is the termination clause?", TEST_DIMENSION);
        let hits = store.search(&kb_id, &query, 4).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let model = Arc::new(ScriptedChatModel::new(&[
            "Either party ",
            "may terminate ",
            "with thirty days notice.",
        ]));
        let chat = service(manager, store, model.clone());

        let mut stream = chat
            .stream(&kb_id, ask("What is the termination clause?"), CancellationToken::new())
            .await
            .unwrap();
        let frames = collect(&mut stream).await;

        assert_eq!(frames.first(), Some(&ChatFrame::Start));
        assert_eq!(
            frames.last(),
            Some(&ChatFrame::Done {
                sources: vec!["contract.txt".to_string()]
            })
        );
        let answer: String = frames
            .iter()
            .filter_map(|f| match f {
                ChatFrame::Content { content } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(answer, "Either party may terminate with thirty days notice.");
        assert_eq!(frames.iter().filter(|f| f.is_terminal()).count(), 1);
        assert_eq!(stream.task.await.unwrap().unwrap(), vec!["contract.txt"]);

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0];
        assert_eq!(prompt.messages[0].role, Role::System);
        assert!(prompt.messages[0].content.contains("Source: contract.txt"));
        assert!(prompt.messages[0].content.contains("chunk 1/3"));
        assert_eq!(prompt.messages[1].content, "What is the termination clause?");
        assert!((prompt.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_validation_happens_before_streaming() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        let model = Arc::new(ScriptedChatModel::new(&["unused"]));
        let chat = service(manager, store, model.clone());

        assert!(matches!(
            chat.stream("missing", ask("hi"), CancellationToken::new()).await,
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            chat.stream(&kb_id, ask("   "), CancellationToken::new()).await,
            Err(ChatError::InvalidRequest(_))
        ));
        assert!(matches!(
            chat.stream(&kb_id, ask(&"x".repeat(4001)), CancellationToken::new()).await,
            Err(ChatError::InvalidRequest(_))
        ));
        let hot = ChatRequest {
            message: "hi".to_string(),
            temperature: Some(2.5),
        };
        assert!(matches!(
            chat.stream(&kb_id, hot, CancellationToken::new()).await,
            Err(ChatError::InvalidRequest(_))
        ));
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_no_context_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        store.delete_collection(&kb_id).await.unwrap();

        let model = Arc::new(ScriptedChatModel::new(&["unused"]));
        let chat = service(manager, store, model.clone());
        let mut stream = chat
            .stream(&kb_id, ask("anything?"), CancellationToken::new())
            .await
            .unwrap();

        let frames = collect(&mut stream).await;
        assert_eq!(
            frames,
            vec![
                ChatFrame::Start,
                ChatFrame::Content {
                    content: NO_CONTEXT_ANSWER.to_string()
                },
                ChatFrame::Done { sources: vec![] },
            ]
        );
        assert!(model.requests().is_empty());
    }

    #[tokio::test]
    async fn test_upstream_failure_ends_with_error_frame() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        let model = Arc::new(ScriptedChatModel::new(&["partial ", "never"]).failing_after(1));
        let chat = service(manager, store, model);

        let mut stream = chat
            .stream(&kb_id, ask("termination?"), CancellationToken::new())
            .await
            .unwrap();
        let frames = collect(&mut stream).await;

        assert_eq!(frames[0], ChatFrame::Start);
        assert_eq!(
            frames[1],
            ChatFrame::Content {
                content: "partial ".to_string()
            }
        );
        assert!(matches!(frames[2], ChatFrame::Error { .. }));
        assert_eq!(frames.len(), 3);
        assert!(matches!(
            stream.task.await.unwrap(),
            Err(ChatError::Llm(LlmError::StreamInterrupted))
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        let model = Arc::new(EndlessChatModel::new(Duration::from_millis(5)));
        let produced = Arc::clone(&model.produced);
        let chat = service(manager, store, model);

        let cancel = CancellationToken::new();
        let mut stream = chat
            .stream(&kb_id, ask("termination?"), cancel.clone())
            .await
            .unwrap();

        assert_eq!(stream.frames.recv().await, Some(ChatFrame::Start));
        for _ in 0..3 {
            assert!(matches!(
                stream.frames.recv().await,
                Some(ChatFrame::Content { .. })
            ));
        }
        cancel.cancel();

        assert!(matches!(stream.task.await.unwrap(), Err(ChatError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_cancel = produced.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(produced.load(Ordering::SeqCst), after_cancel);
    }

    #[tokio::test]
    async fn test_dropping_reader_cancels_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        let model = Arc::new(EndlessChatModel::new(Duration::from_millis(5)));
        let produced = Arc::clone(&model.produced);
        let chat = service(manager, store, model);

        let ChatStream { mut frames, task } = chat
            .stream(&kb_id, ask("termination?"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(frames.recv().await, Some(ChatFrame::Start));
        assert!(matches!(frames.recv().await, Some(ChatFrame::Content { .. })));
        drop(frames);

        assert!(matches!(task.await.unwrap(), Err(ChatError::Cancelled)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after_drop = produced.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(produced.load(Ordering::SeqCst), after_drop);
    }

    #[tokio::test]
    async fn test_complete_collects_answer() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        let model = Arc::new(ScriptedChatModel::new(&["Thirty ", "days."]));
        let chat = service(manager, store, model);

        let message = chat.complete(&kb_id, ask("notice period?")).await.unwrap();
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content, "Thirty days.");
        assert_eq!(message.sources, vec!["contract.txt"]);
    }

    #[tokio::test]
    async fn test_complete_surfaces_upstream_error() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, store, kb_id) = contracts_kb(dir.path()).await;
        let model = Arc::new(ScriptedChatModel::new(&["a"]).failing_after(0));
        let chat = service(manager, store, model);

        assert!(matches!(
            chat.complete(&kb_id, ask("notice period?")).await,
            Err(ChatError::Llm(_))
        ));
    }

    #[test]
    fn test_cited_sources_keep_rank_order() {
        let hit = |source: &str| ScoredChunk {
            chunk: crate::models::DocumentChunk::new(
                "kb",
                source,
                crate::models::TextChunk {
                    index: 0,
                    content: "text".into(),
                    start_offset: 0,
                    end_offset: 4,
                },
                1,
                "sum",
                Vec::new(),
            ),
            score: 1.0,
        };
        let hits = vec![hit("b.pdf"), hit("a.txt"), hit("b.pdf")];
        assert_eq!(cited_sources(&hits), vec!["b.pdf", "a.txt"]);
    }
}

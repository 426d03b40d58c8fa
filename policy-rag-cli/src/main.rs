//! policy-chat: ask questions about an insurance policy document.
//!
//! Loads the document (PDF or text), builds or loads its vector index, then
//! answers questions in a terminal loop. Commands:
//! - `/reset` forgets the conversation
//! - `/history` prints the conversation so far
//! - `/quit` exits

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{info, warn};

use policy_rag::{
    AnswerGenerator, ChatSession, EmbeddingProvider, MockEmbeddingProvider, MockGenerator,
    OpenAIAnswerGenerator, OpenAIEmbeddingProvider, RagConfig, RagError, RagPipeline, Role,
    VectorIndex, load_document,
};

/// Characters of each source chunk shown under an answer.
const EXCERPT_CHARS: usize = 300;

// ── CLI ──────────────────────────────────────────────────────────

/// Chat with an insurance policy document.
#[derive(Parser, Debug)]
#[command(name = "policy-chat", version, about)]
struct Cli {
    /// Policy document to load (PDF or plain text).
    #[arg(default_value = "insurance_policy.pdf")]
    document: PathBuf,

    /// OpenAI API key.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat model used to answer questions.
    #[arg(long, env = "POLICY_CHAT_MODEL", default_value = "gpt-3.5-turbo")]
    chat_model: String,

    /// Embedding model used for the index.
    #[arg(long, env = "POLICY_EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    embedding_model: String,

    /// JSON pipeline configuration; flags below override its values.
    #[arg(long, env = "POLICY_CHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Maximum chunk size in characters.
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Overlap between consecutive chunks in characters.
    #[arg(long)]
    chunk_overlap: Option<usize>,

    /// Number of chunks retrieved per question.
    #[arg(long)]
    top_k: Option<usize>,

    /// Use offline mock providers instead of OpenAI.
    #[arg(long)]
    offline: bool,

    /// Load a previously saved index instead of embedding the document.
    #[arg(long)]
    load_index: Option<PathBuf>,

    /// Save the index after building it.
    #[arg(long)]
    save_index: Option<PathBuf>,
}

impl Cli {
    fn rag_config(&self) -> anyhow::Result<RagConfig> {
        let mut config = match &self.config {
            Some(path) => RagConfig::from_json_file(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => RagConfig::default(),
        };
        if let Some(size) = self.chunk_size {
            config.chunk_size = size;
        }
        if let Some(overlap) = self.chunk_overlap {
            config.chunk_overlap = overlap;
        }
        if let Some(k) = self.top_k {
            config.top_k = k;
        }
        config.validate()?;
        Ok(config)
    }

    fn providers(
        &self,
    ) -> anyhow::Result<(Arc<dyn EmbeddingProvider>, Arc<dyn AnswerGenerator>)> {
        if self.offline {
            info!("using offline mock providers");
            let embedder = MockEmbeddingProvider::default();
            return Ok((Arc::new(embedder), Arc::new(MockGenerator::new())));
        }
        let Some(api_key) = self.api_key.clone() else {
            bail!("no OpenAI API key: set OPENAI_API_KEY, pass --api-key, or use --offline");
        };
        let embedder =
            OpenAIEmbeddingProvider::new(api_key.clone())?.with_model(&self.embedding_model);
        let generator = OpenAIAnswerGenerator::new(api_key)?.with_model(&self.chat_model);
        Ok((Arc::new(embedder), Arc::new(generator)))
    }
}

// ── main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = cli.rag_config()?;
    let (embedder, generator) = cli.providers()?;

    let pipeline = Arc::new(
        RagPipeline::builder()
            .config(config)
            .embedding_provider(embedder)
            .generator(generator)
            .build()?,
    );

    match &cli.load_index {
        Some(path) => {
            let index = VectorIndex::load(path)
                .with_context(|| format!("loading index {}", path.display()))?;
            pipeline.load_index(index).await?;
        }
        None => {
            let document = load_document(&cli.document)?;
            let index = pipeline.ingest(&document).await?;
            if let Some(path) = &cli.save_index {
                index.save(path).with_context(|| format!("saving index {}", path.display()))?;
            }
        }
    }

    let mut session = pipeline.session();
    chat(&mut session).await
}

async fn chat(session: &mut ChatSession) -> anyhow::Result<()> {
    let mut editor = DefaultEditor::new()?;
    println!("Ask a question about your policy. Commands: /reset, /history, /quit");

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        editor.add_history_entry(input)?;

        match input {
            "/quit" | "/exit" => break,
            "/reset" => {
                session.reset();
                println!("Conversation cleared.");
            }
            "/history" => print_history(session),
            question => match session.ask(question).await {
                Ok(answer) => {
                    println!("\n{}\n", answer.text);
                    for (i, excerpt) in answer.source_excerpts(EXCERPT_CHARS).iter().enumerate() {
                        println!("[Source {}] {}\n", i + 1, excerpt.trim());
                    }
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "question failed");
                    println!("Sorry, that didn't work: {e}");
                }
                Err(e @ (RagError::InvalidInput(_) | RagError::PromptTooLarge { .. })) => {
                    println!("{e}");
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    Ok(())
}

fn print_history(session: &ChatSession) {
    if session.history().is_empty() {
        println!("(no conversation yet)");
        return;
    }
    for turn in session.history() {
        let who = match turn.role {
            Role::User => "you",
            Role::Assistant => "bot",
        };
        println!("{who}: {}", turn.content);
    }
}

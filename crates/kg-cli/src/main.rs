use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use serde::Serialize;

use kg_construct::{EndpointQuotas, InMemoryTextSource, KnowledgeConstructor, LabelAliasTable, RelationMappingTable, RuleBasedNer};
use kg_core::config::SystemConfig;
use kg_core::traits::{Embedder, NerService, RelationalStore};
use kg_core::types::ProjectId;
use kg_retrieve::RetrievalAgent;
use kg_schema::tiers_from_config;
use kg_store::graphmirror::SurrealGraphMirror;
use kg_store::relational::RocksRelationalStore;

#[derive(Parser)]
#[command(name = "kg")]
#[command(about = "PDF knowledge graph pipeline: schema induction, knowledge construction and retrieval", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Path to the RocksDB relational store (env KG_STORAGE)
    #[arg(long, global = true, env = "KG_STORAGE", default_value = "./kg-data")]
    storage: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Project management
    #[command(subcommand)]
    Project(ProjectCommands),

    /// Propose and persist an ontology from a document's extracted text (Stage A)
    InduceSchemas {
        /// Project ID
        project_id: String,

        /// Path to a UTF-8 text file with the document's extracted text
        #[arg(long)]
        text_file: PathBuf,

        /// Optional path to a JSON file of caller-supplied hints
        #[arg(long)]
        hints_file: Option<PathBuf>,
    },

    /// Register a document's text and turn it into nodes, edges and chunks (Stage B)
    BuildKnowledge {
        /// Project ID
        project_id: String,

        /// Path to a UTF-8 text file standing in for the document's extracted text
        #[arg(long)]
        file: PathBuf,

        /// Filename recorded on the created document
        #[arg(long)]
        filename: Option<String>,
    },

    /// Answer a natural-language question against a project's knowledge graph (Stage C)
    Answer {
        /// Project ID
        project_id: String,

        /// The question to answer
        query: String,
    },

    /// Schema inspection
    #[command(subcommand)]
    Schema(SchemaCommands),

    /// System information and configuration summary
    Status,
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a new project
    Create {
        /// Project name
        name: String,
    },

    /// Show project details
    Show {
        /// Project ID
        project_id: String,
    },
}

#[derive(Subcommand)]
enum SchemaCommands {
    /// List a project's active schemas
    List {
        /// Project ID
        project_id: String,
    },
}

// Output structures (spec §4 public operation return shapes, flattened for display).
#[derive(Serialize)]
struct ProjectResult {
    project_id: String,
    project_name: String,
    created_at: String,
}

#[derive(Serialize)]
struct SchemaResult {
    schema_id: String,
    schema_name: String,
    entity_type: String,
    version: String,
    is_active: bool,
}

#[derive(Serialize)]
struct InduceResult {
    source_tier: u8,
    nodes_created: usize,
    edges_created: usize,
    rejected: usize,
    summary: String,
}

#[derive(Serialize)]
struct ConstructResult {
    documents_processed: usize,
    chunks_created: usize,
    nodes_created: usize,
    edges_created: usize,
    embeddings_generated: usize,
    entities_dropped_unknown_label: usize,
}

#[derive(Serialize)]
struct AnswerOutput {
    text: String,
    citations: Vec<String>,
    tools_used: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "kg=info,warn".into()))
        .init();

    let cli = Cli::parse();
    let config = SystemConfig::load().context("failed to load configuration")?;
    let runtime = CoreRuntime::start(config, cli.storage.clone())
        .await
        .context("failed to initialize runtime")?;

    let result = execute_command(&cli.command, &runtime).await;
    runtime.shutdown().await;

    match result {
        Ok(value) => {
            print_output(&cli.output, &value)?;
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

/// Everything a CLI invocation needs: an open relational store, a
/// connected graph mirror, and the constructor/retrieval collaborators
/// built from configuration, exactly the set `codegraph-api::state::AppState`
/// assembles once per process for the HTTP server, here assembled once per
/// CLI invocation instead.
struct CoreRuntime {
    store: Arc<RocksRelationalStore>,
    mirror: Arc<SurrealGraphMirror>,
    embedder: Arc<dyn Embedder>,
    ner: Arc<dyn NerService>,
    text_source: Arc<InMemoryTextSource>,
    config: SystemConfig,
    drain_handle: tokio::task::JoinHandle<()>,
}

impl CoreRuntime {
    async fn start(config: SystemConfig, storage_path: PathBuf) -> Result<Self> {
        let store = Arc::new(RocksRelationalStore::open(&storage_path).context("failed to open relational store")?);
        config
            .check_dimension_matches(store.existing_embedding_dimension())
            .context("embedding dimension mismatch")?;

        let graph_url = config.graph.store_url.clone().unwrap_or_else(|| "mem://".to_string());
        let mirror = if graph_url == "mem://" {
            Arc::new(SurrealGraphMirror::connect_in_memory().await.context("failed to start in-memory graph mirror")?)
        } else {
            let user = config.graph.user.clone();
            let password = {
                use secrecy::ExposeSecret;
                config.graph.password.as_ref().map(|s| s.expose_secret().to_string())
            };
            Arc::new(
                SurrealGraphMirror::connect(&graph_url, "kg", "kg", user.as_deref(), password.as_deref())
                    .await
                    .context("failed to connect to graph mirror")?,
            )
        };

        let embedder: Arc<dyn Embedder> = Arc::new(kg_chunk::embedding::LocalHashEmbedder::new(config.embedding.dimension));
        let ner: Arc<dyn NerService> = Arc::new(RuleBasedNer);
        let text_source = Arc::new(InMemoryTextSource::new());

        let drain_handle = kg_store::drain::spawn_periodic_drain(
            store.clone(),
            mirror.clone(),
            std::time::Duration::from_secs(config.timeouts.mirror_drain_interval_secs),
        );

        Ok(Self {
            store,
            mirror,
            embedder,
            ner,
            text_source,
            config,
            drain_handle,
        })
    }

    async fn shutdown(self) {
        self.drain_handle.abort();
    }
}

fn parse_project_id(raw: &str) -> Result<ProjectId> {
    uuid::Uuid::parse_str(raw).context("invalid project ID format")
}

async fn execute_command(command: &Commands, runtime: &CoreRuntime) -> Result<serde_json::Value> {
    match command {
        Commands::Project(cmd) => execute_project_command(cmd, runtime).await,
        Commands::InduceSchemas { project_id, text_file, hints_file } => {
            execute_induce_schemas(project_id, text_file, hints_file.as_deref(), runtime).await
        }
        Commands::BuildKnowledge { project_id, file, filename } => {
            execute_build_knowledge(project_id, file, filename.as_deref(), runtime).await
        }
        Commands::Answer { project_id, query } => execute_answer(project_id, query, runtime).await,
        Commands::Schema(cmd) => execute_schema_command(cmd, runtime).await,
        Commands::Status => execute_status(runtime).await,
    }
}

async fn execute_project_command(cmd: &ProjectCommands, runtime: &CoreRuntime) -> Result<serde_json::Value> {
    match cmd {
        ProjectCommands::Create { name } => {
            let project = runtime.store.create_project(name).await.context("failed to create project")?;
            let result = ProjectResult {
                project_id: project.project_id.to_string(),
                project_name: project.project_name,
                created_at: project.created_at.to_rfc3339(),
            };
            Ok(serde_json::to_value(result)?)
        }
        ProjectCommands::Show { project_id } => {
            let id = parse_project_id(project_id)?;
            let project = runtime.store.get_project(id).await.context("failed to get project")?;
            let result = ProjectResult {
                project_id: project.project_id.to_string(),
                project_name: project.project_name,
                created_at: project.created_at.to_rfc3339(),
            };
            Ok(serde_json::to_value(result)?)
        }
    }
}

async fn execute_schema_command(cmd: &SchemaCommands, runtime: &CoreRuntime) -> Result<serde_json::Value> {
    match cmd {
        SchemaCommands::List { project_id } => {
            let id = parse_project_id(project_id)?;
            let schemas = runtime.store.list_schemas(id, None, true).await.context("failed to list schemas")?;
            let results: Vec<SchemaResult> = schemas
                .into_iter()
                .map(|s| SchemaResult {
                    schema_id: s.schema_id.to_string(),
                    schema_name: s.schema_name,
                    entity_type: s.entity_type.to_string(),
                    version: s.version.to_string(),
                    is_active: s.is_active,
                })
                .collect();
            Ok(serde_json::to_value(results)?)
        }
    }
}

async fn execute_induce_schemas(
    project_id: &str,
    text_file: &std::path::Path,
    hints_file: Option<&std::path::Path>,
    runtime: &CoreRuntime,
) -> Result<serde_json::Value> {
    let id = parse_project_id(project_id)?;
    let document_text = std::fs::read_to_string(text_file)
        .with_context(|| format!("failed to read {}", text_file.display()))?;
    let hints = match hints_file {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("hints file is not valid JSON")?
        }
        None => serde_json::json!({}),
    };

    let tiers = tiers_from_config(&runtime.config);
    let proposal = kg_schema::induce_schemas(runtime.store.as_ref(), id, &document_text, &hints, &tiers)
        .await
        .context("schema induction failed")?;

    let result = InduceResult {
        source_tier: proposal.source_tier,
        nodes_created: proposal.nodes.len(),
        edges_created: proposal.edges.len(),
        rejected: proposal.rejected.len(),
        summary: proposal.summary,
    };
    Ok(serde_json::to_value(result)?)
}

async fn execute_build_knowledge(
    project_id: &str,
    file: &std::path::Path,
    filename: Option<&str>,
    runtime: &CoreRuntime,
) -> Result<serde_json::Value> {
    let id = parse_project_id(project_id)?;
    let text = std::fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
    let filename = filename.unwrap_or_else(|| file.file_name().and_then(|n| n.to_str()).unwrap_or("document.txt"));

    let document = runtime
        .store
        .create_document(id, filename, text.len() as u64, 1)
        .await
        .context("failed to create document")?;
    runtime.text_source.insert(document.document_id, text);

    let constructor = KnowledgeConstructor::new(
        runtime.store.clone(),
        runtime.mirror.clone(),
        runtime.embedder.clone(),
        runtime.ner.clone(),
        runtime.text_source.clone(),
        EndpointQuotas::default(),
        LabelAliasTable::default(),
        RelationMappingTable::default(),
        runtime.config.ner.confidence_threshold,
        kg_chunk::chunker::ChunkConfig {
            chunk_size: runtime.config.pipeline.chunk_size,
            overlap: runtime.config.pipeline.chunk_overlap,
        },
    );

    let stats = constructor.build_knowledge(id).await.context("knowledge construction failed")?;
    let result = ConstructResult {
        documents_processed: stats.documents_processed,
        chunks_created: stats.chunks_created,
        nodes_created: stats.nodes_created,
        edges_created: stats.edges_created,
        embeddings_generated: stats.embeddings_generated,
        entities_dropped_unknown_label: stats.entities_dropped_unknown_label,
    };
    Ok(serde_json::to_value(result)?)
}

async fn execute_answer(project_id: &str, query: &str, runtime: &CoreRuntime) -> Result<serde_json::Value> {
    let id = parse_project_id(project_id)?;
    let agent = RetrievalAgent::new(
        runtime.store.clone(),
        runtime.mirror.clone(),
        runtime.embedder.clone(),
        tiers_from_config(&runtime.config),
        tiers_from_config(&runtime.config),
        std::time::Duration::from_secs(runtime.config.timeouts.tool_secs),
        std::time::Duration::from_secs(runtime.config.timeouts.answer_secs),
        runtime.config.pipeline.similarity_top_k,
    );

    let answer = agent.answer(id, query, &[]).await.context("answer failed")?;
    let result = AnswerOutput {
        text: answer.text,
        citations: answer.citations,
        tools_used: answer.tools_used.iter().map(|u| format!("{}: {:?}", u.tool.as_str(), u.status)).collect(),
    };
    Ok(serde_json::to_value(result)?)
}

async fn execute_status(runtime: &CoreRuntime) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "embedding_model": runtime.config.embedding.model_id,
        "embedding_dimension": runtime.config.embedding.dimension,
        "ner_model": runtime.config.ner.model_id,
        "chunk_size": runtime.config.pipeline.chunk_size,
        "chunk_overlap": runtime.config.pipeline.chunk_overlap,
        "similarity_top_k": runtime.config.pipeline.similarity_top_k,
        "status": "ok",
    }))
}

fn print_output(format: &OutputFormat, value: &serde_json::Value) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Pretty => {
            print_pretty(value)?;
        }
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => println!("{}: {}", key_colored, s.green()),
                    serde_json::Value::Number(n) => println!("{}: {}", key_colored, n.to_string().yellow()),
                    serde_json::Value::Bool(b) => {
                        let val_colored = if *b { "true".green() } else { "false".red() };
                        println!("{}: {}", key_colored, val_colored);
                    }
                    _ => println!("{}: {}", key_colored, val),
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for (i, item) in arr.iter().enumerate() {
                println!("\n{}{}:", "Item ".cyan(), (i + 1).to_string().yellow());
                print_pretty(item)?;
            }
        }
        _ => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

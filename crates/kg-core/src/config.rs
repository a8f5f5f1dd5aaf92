//! System configuration surface (spec §6). Grounded on
//! `codegraph_core::config`'s pattern of small `Default`-able sub-structs
//! loaded through the `config` crate, with secrets wrapped in
//! `secrecy::SecretString`.

use config::{Config, Environment};
use schemars::JsonSchema;
use secrecy::SecretString;
use serde::Deserialize;

fn secret_schema(gen: &mut schemars::SchemaGenerator) -> schemars::Schema {
    <Option<String>>::json_schema(gen)
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RelationalConfig {
    pub store_url: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "secret_schema")]
    pub password: Option<SecretString>,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            user: None,
            password: None,
            database: None,
            schema: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GraphConfig {
    pub store_url: Option<String>,
    pub user: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "secret_schema")]
    pub password: Option<SecretString>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            store_url: None,
            user: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LlmConfig {
    pub primary_url: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "secret_schema")]
    pub primary_key: Option<SecretString>,
    pub primary_model: Option<String>,
    pub fallback_url: Option<String>,
    #[serde(default)]
    #[schemars(schema_with = "secret_schema")]
    pub fallback_key: Option<SecretString>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            primary_key: None,
            primary_model: None,
            fallback_url: None,
            fallback_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EmbeddingConfig {
    #[serde(default = "EmbeddingConfig::default_model_id")]
    pub model_id: String,
    #[serde(default = "EmbeddingConfig::default_dimension")]
    pub dimension: usize,
}

impl EmbeddingConfig {
    fn default_model_id() -> String {
        "all-MiniLM-L6-v2".to_string()
    }
    fn default_dimension() -> usize {
        384
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: Self::default_model_id(),
            dimension: Self::default_dimension(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct NerConfig {
    #[serde(default = "NerConfig::default_model_id")]
    pub model_id: String,
    #[serde(default = "NerConfig::default_confidence_threshold")]
    pub confidence_threshold: f32,
}

impl NerConfig {
    fn default_model_id() -> String {
        "bert-base-NER".to_string()
    }
    fn default_confidence_threshold() -> f32 {
        0.7
    }
}

impl Default for NerConfig {
    fn default() -> Self {
        Self {
            model_id: Self::default_model_id(),
            confidence_threshold: Self::default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    #[serde(default = "PipelineConfig::default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "PipelineConfig::default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "PipelineConfig::default_similarity_top_k")]
    pub similarity_top_k: usize,
}

impl PipelineConfig {
    fn default_chunk_size() -> usize {
        500
    }
    fn default_chunk_overlap() -> usize {
        50
    }
    fn default_similarity_top_k() -> usize {
        10
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: Self::default_chunk_size(),
            chunk_overlap: Self::default_chunk_overlap(),
            similarity_top_k: Self::default_similarity_top_k(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct PoolConfig {
    #[serde(default = "PoolConfig::default_size")]
    pub size: usize,
    #[serde(default = "PoolConfig::default_overflow")]
    pub overflow: usize,
}

impl PoolConfig {
    fn default_size() -> usize {
        5
    }
    fn default_overflow() -> usize {
        10
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: Self::default_size(),
            overflow: Self::default_overflow(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct TimeoutConfig {
    #[serde(default = "TimeoutConfig::default_stage_a_secs")]
    pub stage_a_secs: u64,
    #[serde(default = "TimeoutConfig::default_tool_secs")]
    pub tool_secs: u64,
    #[serde(default = "TimeoutConfig::default_answer_secs")]
    pub answer_secs: u64,
    #[serde(default = "TimeoutConfig::default_mirror_drain_interval_secs")]
    pub mirror_drain_interval_secs: u64,
    #[serde(default = "TimeoutConfig::default_tier1_secs")]
    pub tier1_secs: u64,
    #[serde(default = "TimeoutConfig::default_tier2_secs")]
    pub tier2_secs: u64,
}

impl TimeoutConfig {
    fn default_stage_a_secs() -> u64 {
        60
    }
    fn default_tool_secs() -> u64 {
        10
    }
    fn default_answer_secs() -> u64 {
        30
    }
    fn default_mirror_drain_interval_secs() -> u64 {
        30
    }
    fn default_tier1_secs() -> u64 {
        20
    }
    fn default_tier2_secs() -> u64 {
        30
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            stage_a_secs: Self::default_stage_a_secs(),
            tool_secs: Self::default_tool_secs(),
            answer_secs: Self::default_answer_secs(),
            mirror_drain_interval_secs: Self::default_mirror_drain_interval_secs(),
            tier1_secs: Self::default_tier1_secs(),
            tier2_secs: Self::default_tier2_secs(),
        }
    }
}

/// The full configuration surface of spec §6, assembled from environment
/// variables layered over the defaults named in that table.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SystemConfig {
    #[serde(default)]
    pub relational: RelationalConfig,
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ner: NerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl SystemConfig {
    /// Loads configuration the way `codegraph_core::config` layers
    /// defaults under an `Environment` source: env vars named in spec §6
    /// (e.g. `RELATIONAL_STORE_URL`, `LLM_PRIMARY_URL`) override the
    /// per-field defaults above.
    pub fn load() -> anyhow::Result<Self> {
        let cfg = Config::builder()
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // `config`'s flat Environment source doesn't nest automatically
        // under our grouped field names, so the well-known spec §6
        // variable names are re-mapped explicitly, mirroring
        // `codegraph_core::config_manager`'s manual override pass.
        let mut system = cfg.try_deserialize::<SystemConfig>().unwrap_or_default();
        system.apply_named_env_overrides();
        Ok(system)
    }

    fn apply_named_env_overrides(&mut self) {
        use std::env;

        macro_rules! str_override {
            ($field:expr, $var:expr) => {
                if let Ok(v) = env::var($var) {
                    $field = Some(v);
                }
            };
        }
        macro_rules! secret_override {
            ($field:expr, $var:expr) => {
                if let Ok(v) = env::var($var) {
                    $field = Some(SecretString::from(v));
                }
            };
        }
        macro_rules! num_override {
            ($field:expr, $var:expr) => {
                if let Ok(v) = env::var($var) {
                    if let Ok(parsed) = v.parse() {
                        $field = parsed;
                    }
                }
            };
        }

        str_override!(self.relational.store_url, "RELATIONAL_STORE_URL");
        str_override!(self.relational.user, "RELATIONAL_USER");
        secret_override!(self.relational.password, "RELATIONAL_PASSWORD");
        str_override!(self.relational.database, "RELATIONAL_DATABASE");
        str_override!(self.relational.schema, "RELATIONAL_SCHEMA");

        str_override!(self.graph.store_url, "GRAPH_STORE_URL");
        str_override!(self.graph.user, "GRAPH_USER");
        secret_override!(self.graph.password, "GRAPH_PASSWORD");

        str_override!(self.llm.primary_url, "LLM_PRIMARY_URL");
        secret_override!(self.llm.primary_key, "LLM_PRIMARY_KEY");
        str_override!(self.llm.primary_model, "LLM_PRIMARY_MODEL");
        str_override!(self.llm.fallback_url, "LLM_FALLBACK_URL");
        secret_override!(self.llm.fallback_key, "LLM_FALLBACK_KEY");

        if let Ok(v) = env::var("EMBEDDING_MODEL_ID") {
            self.embedding.model_id = v;
        }
        num_override!(self.embedding.dimension, "EMBEDDING_DIMENSION");
        if let Ok(v) = env::var("NER_MODEL_ID") {
            self.ner.model_id = v;
        }
        num_override!(self.ner.confidence_threshold, "NER_CONFIDENCE_THRESHOLD");

        num_override!(self.pipeline.chunk_size, "CHUNK_SIZE");
        num_override!(self.pipeline.chunk_overlap, "CHUNK_OVERLAP");
        num_override!(self.pipeline.similarity_top_k, "SIMILARITY_TOP_K");

        num_override!(self.pool.size, "CONNECTION_POOL_SIZE");
        num_override!(self.pool.overflow, "CONNECTION_POOL_OVERFLOW");

        num_override!(self.timeouts.stage_a_secs, "STAGE_A_TIMEOUT_SECONDS");
        num_override!(self.timeouts.tool_secs, "TOOL_TIMEOUT_SECONDS");
        num_override!(self.timeouts.answer_secs, "ANSWER_TIMEOUT_SECONDS");
        num_override!(
            self.timeouts.mirror_drain_interval_secs,
            "GRAPH_MIRROR_DRAIN_INTERVAL_SECONDS"
        );
    }

    /// Fatal-at-startup check (spec §7 "Fatal at startup only"): the
    /// configured embedding dimension must match what an existing
    /// project's data was written with. Callers pass the dimension
    /// recorded on the project at creation time, if any.
    pub fn check_dimension_matches(&self, existing_dimension: Option<usize>) -> anyhow::Result<()> {
        if let Some(existing) = existing_dimension {
            if existing != self.embedding.dimension {
                anyhow::bail!(
                    "embedding dimension mismatch: deployment configured for {} but existing project data uses {}",
                    self.embedding.dimension,
                    existing
                );
            }
        }
        Ok(())
    }
}

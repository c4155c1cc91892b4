use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub floor: FloorConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub intent: IntentConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// When true, responses carry `meta.debug` (plan, candidate counts,
    /// fusion trace). Off by default so internal reasoning never leaks.
    #[serde(default)]
    pub debug_meta: bool,
    #[serde(default = "default_request_budget_ms")]
    pub request_budget_ms: u64,
}

fn default_request_budget_ms() -> u64 {
    4500
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Candidate pool requested per query variant.
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Emitted fact bound (hard cap on `sources`).
    #[serde(default = "default_max_facts")]
    pub max_facts: usize,
    /// Fusion pool bound: merged candidates considered before cap enforcement.
    #[serde(default = "default_fact_cap")]
    pub fact_cap: usize,
    #[serde(default = "default_per_source_cap")]
    pub per_source_cap: usize,
    /// Query variants per plan, original included. Must stay in 1..=5.
    #[serde(default = "default_variants")]
    pub variants: usize,
    #[serde(default = "default_snippet_display_chars")]
    pub snippet_display_chars: usize,
    /// Individual timeout for one variant search.
    #[serde(default = "default_variant_timeout_ms")]
    pub variant_timeout_ms: u64,
    /// Aggregate deadline for the whole retrieval phase; stragglers are
    /// abandoned once the deadline passes.
    #[serde(default = "default_phase_budget_ms")]
    pub phase_budget_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_facts: default_max_facts(),
            fact_cap: default_fact_cap(),
            per_source_cap: default_per_source_cap(),
            variants: default_variants(),
            snippet_display_chars: default_snippet_display_chars(),
            variant_timeout_ms: default_variant_timeout_ms(),
            phase_budget_ms: default_phase_budget_ms(),
        }
    }
}

fn default_top_k() -> i64 {
    24
}
fn default_max_facts() -> usize {
    6
}
fn default_fact_cap() -> usize {
    24
}
fn default_per_source_cap() -> usize {
    2
}
fn default_variants() -> usize {
    3
}
fn default_snippet_display_chars() -> usize {
    320
}
fn default_variant_timeout_ms() -> u64 {
    1500
}
fn default_phase_budget_ms() -> u64 {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct FloorConfig {
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
    /// `enforce` refuses low-confidence answers, `monitor` logs the breach
    /// but composes normally, `off` skips the check.
    #[serde(default = "default_floor_mode")]
    pub mode: String,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            mode: default_floor_mode(),
        }
    }
}

fn default_similarity_floor() -> f64 {
    0.58
}
fn default_floor_mode() -> String {
    "enforce".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_rate_max_requests")]
    pub max_requests: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_rate_window_secs(),
            max_requests: default_rate_max_requests(),
        }
    }
}

fn default_rate_window_secs() -> u64 {
    60
}
fn default_rate_max_requests() -> usize {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// When true, a corpus/model dimension mismatch refuses to serve traffic
    /// at startup instead of degrading at request time.
    #[serde(default = "default_strict_parity")]
    pub strict_parity: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashed".to_string(),
            model: Some("hashed-v1".to_string()),
            dims: Some(256),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
            strict_parity: true,
        }
    }
}

fn default_embedding_provider() -> String {
    "hashed".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_strict_parity() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Master switch for the generation-augmented path. The rule-based
    /// planner and templated composer must keep working with this off.
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_generation_provider(),
            model: None,
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
        }
    }
}

fn default_generation_provider() -> String {
    "disabled".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    20
}
fn default_generation_max_retries() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntentConfig {
    #[serde(default = "default_small_talk_phrases")]
    pub small_talk_phrases: Vec<String>,
    #[serde(default = "default_suggestions")]
    pub suggestions: Vec<String>,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            small_talk_phrases: default_small_talk_phrases(),
            suggestions: default_suggestions(),
        }
    }
}

fn default_small_talk_phrases() -> Vec<String> {
    [
        "hi",
        "hello",
        "hey",
        "hi there",
        "hello there",
        "good morning",
        "good afternoon",
        "good evening",
        "thanks",
        "thank you",
        "thanks a lot",
        "help",
        "what can you do",
        "who are you",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_suggestions() -> Vec<String> {
    [
        "Is Microsoft in the TECH100 index?",
        "What does the CSRD require of large companies?",
        "Show me NVIDIA's ESG profile.",
        "How is the TECH100 index weighted?",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled && self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate retrieval
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.retrieval.max_facts == 0 {
        anyhow::bail!("retrieval.max_facts must be > 0");
    }
    if config.retrieval.per_source_cap == 0 {
        anyhow::bail!("retrieval.per_source_cap must be > 0");
    }
    if !(1..=5).contains(&config.retrieval.variants) {
        anyhow::bail!("retrieval.variants must be in 1..=5");
    }

    // Validate floor
    if !(0.0..=1.0).contains(&config.floor.similarity_floor) {
        anyhow::bail!("floor.similarity_floor must be in [0.0, 1.0]");
    }
    match config.floor.mode.as_str() {
        "enforce" | "monitor" | "off" => {}
        other => anyhow::bail!(
            "Unknown floor.mode: '{}'. Must be enforce, monitor, or off.",
            other
        ),
    }

    // Validate rate limit
    if config.rate_limit.window_secs == 0 {
        anyhow::bail!("rate_limit.window_secs must be > 0");
    }
    if config.rate_limit.max_requests == 0 {
        anyhow::bail!("rate_limit.max_requests must be > 0");
    }

    // Validate embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "hashed" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or hashed.",
            other
        ),
    }

    // Validate generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        anyhow::bail!("generation.model must be specified when generation is enabled");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ask2.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_minimal_config_applies_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "./data/ask2.sqlite"

[server]
bind = "127.0.0.1:8088"
"#,
        );
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.retrieval.top_k, 24);
        assert_eq!(cfg.retrieval.max_facts, 6);
        assert_eq!(cfg.retrieval.per_source_cap, 2);
        assert_eq!(cfg.retrieval.variants, 3);
        assert!((cfg.floor.similarity_floor - 0.58).abs() < 1e-9);
        assert_eq!(cfg.floor.mode, "enforce");
        assert!(!cfg.generation.is_enabled());
        assert!(!cfg.server.debug_meta);
    }

    #[test]
    fn test_rejects_bad_floor_mode() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "./data/ask2.sqlite"

[server]
bind = "127.0.0.1:8088"

[floor]
mode = "loud"
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_variants() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_config(
            tmp.path(),
            r#"
[db]
path = "./data/ask2.sqlite"

[server]
bind = "127.0.0.1:8088"

[retrieval]
variants = 9
"#,
        );
        assert!(load_config(&path).is_err());
    }
}

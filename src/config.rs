//! Configuração do locflow carregada a partir de `locflow.toml`.
//!
//! A struct [`LocflowConfig`] agrupa as seções `[llm]`, `[pool]` e
//! `[checkpoint]`. Valores ausentes no arquivo usam defaults sensíveis.
//! A chave da API vem de `OPENAI_API_KEY` ou `DEEPSEEK_API_KEY` (conforme o
//! provedor) e tem precedência sobre o arquivo; flags da CLI têm precedência
//! sobre ambos.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{MonitorConfig, RetryPolicy};
use crate::error::LocflowError;

/// Arquivo procurado no diretório atual quando `--config` não é passado.
pub const DEFAULT_CONFIG_FILE: &str = "locflow.toml";

/// Provedor de API compatível com OpenAI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    /// DeepSeek servido por um gateway compatível (SiliconFlow por padrão).
    DeepSeek,
}

impl Provider {
    /// Variável de ambiente que fornece a chave deste provedor.
    pub fn env_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com/v1",
            Provider::DeepSeek => "https://api.siliconflow.cn",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::DeepSeek => "deepseek-ai/DeepSeek-V3.2-Exp",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::DeepSeek => write!(f, "deepseek"),
        }
    }
}

/// Configuração de nível superior carregada de `locflow.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocflowConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Seção `[llm]`: provedor, modelo e parâmetros do prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub provider: Provider,

    /// URL base; sem valor usa o preset do provedor.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Modelo; sem valor usa o preset do provedor.
    #[serde(default)]
    pub model: Option<String>,

    /// Chave da API (sobrescrita pela variável de ambiente do provedor).
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Rótulo do idioma de destino usado no prompt.
    #[serde(default = "default_target_lang")]
    pub target_lang: String,

    /// Marcas que nunca são traduzidas.
    #[serde(default = "default_brands")]
    pub brands: Vec<String>,

    /// Linhas vizinhas (antes e depois) incluídas como contexto de cena.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

/// Seção `[pool]`: limites de concorrência, ritmo e retentativas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,
    /// Teto de requisições por minuto.
    #[serde(default = "default_rpm")]
    pub rpm: u32,
    /// Teto opcional de tokens estimados por minuto.
    #[serde(default)]
    pub tpm: Option<u32>,
    /// Prazo de cada chamada ao provedor.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Retentativas após a primeira chamada antes de marcar o item como falho.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_grow_after_successes")]
    pub grow_after_successes: u32,
    #[serde(default = "default_shrink_after_failures")]
    pub shrink_after_failures: u32,
    #[serde(default = "default_throttle_factor")]
    pub throttle_factor: f64,
    #[serde(default = "default_window")]
    pub window: usize,
}

/// Seção `[checkpoint]`: arquivo de progresso e cadência de flush.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Arquivo explícito. Sem ele, cada entrada tem o seu próprio
    /// checkpoint ao lado (`<entrada>.ckpt.jsonl`).
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    800
}

fn default_target_lang() -> String {
    "Simplified Chinese".to_string()
}

fn default_brands() -> Vec<String> {
    ["Patreon", "Instagram", "Lovense"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_context_window() -> usize {
    2
}

fn default_min_workers() -> usize {
    2
}

fn default_max_workers() -> usize {
    12
}

fn default_initial_workers() -> usize {
    6
}

fn default_rpm() -> u32 {
    60
}

fn default_call_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    20_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_grow_after_successes() -> u32 {
    10
}

fn default_shrink_after_failures() -> u32 {
    3
}

fn default_throttle_factor() -> f64 {
    0.5
}

fn default_window() -> usize {
    50
}

fn default_flush_every() -> usize {
    1
}

fn default_flush_interval_ms() -> u64 {
    1000
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            base_url: None,
            model: None,
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            target_lang: default_target_lang(),
            brands: default_brands(),
            context_window: default_context_window(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            initial_workers: default_initial_workers(),
            rpm: default_rpm(),
            tpm: None,
            call_timeout_ms: default_call_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            jitter_ms: default_jitter_ms(),
            grow_after_successes: default_grow_after_successes(),
            shrink_after_failures: default_shrink_after_failures(),
            throttle_factor: default_throttle_factor(),
            window: default_window(),
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_every: default_flush_every(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl LlmConfig {
    /// URL base efetiva, sempre terminando em `/v1`.
    pub fn resolved_base_url(&self) -> String {
        let base = self
            .base_url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(self.provider.default_base_url());
        ensure_v1(base)
    }

    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }
}

impl PoolConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl CheckpointConfig {
    /// Checkpoint usado para `input`: `lines.jsonl` → `lines.ckpt.jsonl`.
    pub fn path_for(&self, input: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| input.with_extension("ckpt.jsonl"))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Valores vindos da linha de comando que sobrescrevem o arquivo.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub rpm: Option<u32>,
    pub tpm: Option<u32>,
    pub min_workers: Option<usize>,
    pub max_workers: Option<usize>,
    pub workers: Option<usize>,
    pub max_retries: Option<u32>,
    pub checkpoint: Option<PathBuf>,
}

impl LocflowConfig {
    /// Carrega a configuração de `path` (ou de `locflow.toml` no diretório
    /// atual), aplica as flags da CLI e a chave do ambiente.
    ///
    /// Um `path` explícito inexistente é erro; o arquivo padrão ausente
    /// resulta nos valores padrão.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, LocflowError> {
        let mut config = match path {
            Some(p) if !p.exists() => {
                return Err(LocflowError::Config(format!(
                    "config file not found: {}",
                    p.display()
                )));
            }
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };

        config.apply_overrides(overrides);
        config.apply_env_key(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, LocflowError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(provider) = o.provider {
            self.llm.provider = provider;
        }
        if let Some(model) = &o.model {
            self.llm.model = Some(model.clone());
        }
        if let Some(rpm) = o.rpm {
            self.pool.rpm = rpm;
        }
        if let Some(tpm) = o.tpm {
            self.pool.tpm = Some(tpm);
        }
        if let Some(min) = o.min_workers {
            self.pool.min_workers = min;
        }
        if let Some(max) = o.max_workers {
            self.pool.max_workers = max;
        }
        if let Some(workers) = o.workers {
            self.pool.initial_workers = workers;
        }
        if let Some(retries) = o.max_retries {
            self.pool.max_retries = retries;
        }
        if let Some(path) = &o.checkpoint {
            self.checkpoint.path = Some(path.clone());
        }
    }

    /// A variável de ambiente do provedor tem precedência sobre o arquivo.
    pub fn apply_env_key(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup(self.llm.provider.env_var())
            && !key.trim().is_empty()
        {
            self.llm.api_key = key.trim().to_string();
        }
    }

    /// Valida limites do pool e da checkpoint. Não exige chave de API.
    pub fn validate(&self) -> Result<(), LocflowError> {
        let p = &self.pool;
        if p.min_workers < 1 {
            return Err(config_err("pool.min_workers must be at least 1"));
        }
        if p.min_workers > p.max_workers {
            return Err(config_err(format!(
                "pool.min_workers ({}) exceeds pool.max_workers ({})",
                p.min_workers, p.max_workers
            )));
        }
        if p.initial_workers < p.min_workers || p.initial_workers > p.max_workers {
            return Err(config_err(format!(
                "pool.initial_workers ({}) must be within [{}, {}]",
                p.initial_workers, p.min_workers, p.max_workers
            )));
        }
        if p.rpm == 0 {
            return Err(config_err("pool.rpm must be greater than 0"));
        }
        if p.tpm == Some(0) {
            return Err(config_err("pool.tpm must be greater than 0 when set"));
        }
        if p.call_timeout_ms == 0 {
            return Err(config_err("pool.call_timeout_ms must be greater than 0"));
        }
        if !(p.throttle_factor > 0.0 && p.throttle_factor < 1.0) {
            return Err(config_err(format!(
                "pool.throttle_factor ({}) must be strictly between 0 and 1",
                p.throttle_factor
            )));
        }
        if p.grow_after_successes == 0 || p.shrink_after_failures == 0 {
            return Err(config_err(
                "pool.grow_after_successes and pool.shrink_after_failures must be at least 1",
            ));
        }
        if p.window == 0 {
            return Err(config_err("pool.window must be at least 1"));
        }
        if p.backoff_base_ms > p.backoff_max_ms {
            return Err(config_err("pool.backoff_base_ms exceeds pool.backoff_max_ms"));
        }
        if self.checkpoint.flush_every < 1 {
            return Err(config_err("checkpoint.flush_every must be at least 1"));
        }
        if self.checkpoint.flush_interval_ms == 0 {
            return Err(config_err("checkpoint.flush_interval_ms must be greater than 0"));
        }
        Ok(())
    }

    /// Chave da API, ou erro indicando onde defini-la.
    pub fn require_api_key(&self) -> Result<&str, LocflowError> {
        if self.llm.api_key.trim().is_empty() {
            return Err(config_err(format!(
                "missing API key: set {} or llm.api_key",
                self.llm.provider.env_var()
            )));
        }
        Ok(&self.llm.api_key)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let p = &self.pool;
        MonitorConfig {
            min_workers: p.min_workers,
            max_workers: p.max_workers,
            initial_workers: p.initial_workers,
            target_rpm: p.rpm,
            grow_after_successes: p.grow_after_successes,
            shrink_after_failures: p.shrink_after_failures,
            throttle_factor: p.throttle_factor,
            window: p.window,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.pool.max_retries,
            backoff_base_ms: self.pool.backoff_base_ms,
            backoff_max_ms: self.pool.backoff_max_ms,
            jitter_ms: self.pool.jitter_ms,
        }
    }
}

fn config_err(message: impl Into<String>) -> LocflowError {
    LocflowError::Config(message.into())
}

/// Garante o sufixo `/v1` exigido pelos endpoints compatíveis com OpenAI.
pub fn ensure_v1(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.ends_with("/v1") {
        url.to_string()
    } else {
        format!("{url}/v1")
    }
}

//! Tipos de erro para o cliente de chat compatível com a API OpenAI.
//!
//! Define [`ApiError`] com variantes para rate limiting, erros HTTP,
//! prazos estourados e erros de rede. O pool de workers usa
//! [`ApiError::is_rate_limit`], [`ApiError::retry_after`] e
//! [`ApiError::is_retryable`] para classificar cada chamada em um `Outcome`.

use std::time::Duration;

use thiserror::Error;

/// Erros que podem ocorrer ao chamar o endpoint de chat completions.
///
/// - [`RateLimited`](ApiError::RateLimited): o servidor retornou HTTP 429
/// - [`Status`](ApiError::Status): qualquer outro erro HTTP (4xx/5xx)
/// - [`Timeout`](ApiError::Timeout): a chamada excedeu o prazo
/// - [`Decode`](ApiError::Decode): resposta 2xx sem conteúdo utilizável
/// - [`Network`](ApiError::Network): falha na camada de rede
#[derive(Debug, Error)]
pub enum ApiError {
    /// O servidor retornou HTTP 429.
    /// `retry_after_ms` vem do cabeçalho `retry-after`, quando presente.
    #[error("rate limited{}", retry_after_suffix(.retry_after_ms))]
    RateLimited { retry_after_ms: Option<u64> },

    /// Erro retornado pela API (ex.: 401 chave inválida, 500 erro interno).
    #[error("API error (status {status}): {message}")]
    Status { status: u16, message: String },

    /// A chamada não terminou dentro do prazo configurado.
    #[error("request timed out")]
    Timeout,

    /// Resposta bem-sucedida, mas sem texto de tradução.
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// Falha de rede subjacente (DNS, conexão recusada, timeout do reqwest).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

fn retry_after_suffix(retry_after_ms: &Option<u64>) -> String {
    match retry_after_ms {
        Some(ms) => format!(", retry after {ms}ms"),
        None => String::new(),
    }
}

impl ApiError {
    /// Sinal explícito de limite de taxa.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ApiError::RateLimited { .. })
    }

    /// Espera sugerida pelo servidor em um 429, se houver.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after_ms } => retry_after_ms.map(Duration::from_millis),
            _ => None,
        }
    }

    /// Erros transitórios que merecem nova tentativa com backoff.
    ///
    /// 408 e 5xx são tratados como transitórios; os demais 4xx não.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } | ApiError::Timeout => true,
            ApiError::Status { status, .. } => *status == 408 || *status >= 500,
            ApiError::Decode(_) => false,
            ApiError::Network(e) => !e.is_builder() && !e.is_decode(),
        }
    }
}

//! Tipos de dados para o endpoint `/v1/chat/completions` (formato OpenAI).
//!
//! Todas as structs derivam `Serialize` e `Deserialize`. Provedores
//! compatíveis (DeepSeek, SiliconFlow) aceitam o mesmo formato.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para o endpoint de chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Identificador do modelo (ex.: "gpt-4o-mini").
    pub model: String,
    /// Mensagens da conversa (system e user).
    pub messages: Vec<ChatMessage>,
    /// Temperatura de amostragem.
    pub temperature: f32,
    /// Limite de tokens na resposta.
    pub max_tokens: u32,
}

/// Uma única mensagem em uma conversa.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Papel do remetente: "system", "user" ou "assistant".
    pub role: String,
    /// Conteúdo textual da mensagem.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Resposta retornada pelo endpoint de chat completions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Identificador único da resposta.
    #[serde(default)]
    pub id: String,
    /// Alternativas geradas; usamos apenas a primeira.
    pub choices: Vec<Choice>,
    /// Estatísticas de uso de tokens, quando o provedor as envia.
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// Texto da primeira alternativa, sem espaços nas pontas.
    pub fn first_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

/// Uma alternativa dentro da resposta.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Mensagem do assistente; `content` pode vir nulo.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
}

/// Estatísticas de consumo de tokens para uma chamada.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_serializes_roles() {
        let req = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage::system("be terse"), ChatMessage::user("Hello")],
            temperature: 0.2,
            max_tokens: 300,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hello");
        assert_eq!(json["max_tokens"], 300);
    }

    #[test]
    fn chat_response_deserialize_from_api_format() {
        let api_json = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "  你好  "},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;
        let resp: ChatResponse = serde_json::from_str(api_json).unwrap();
        assert_eq!(resp.id, "chatcmpl-123");
        assert_eq!(resp.first_text(), Some("你好"));
        assert_eq!(resp.usage.unwrap().completion_tokens, 3);
    }

    #[test]
    fn first_text_none_for_null_or_blank_content() {
        let json = r#"{"choices": [{"message": {"role": "assistant", "content": null}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_text(), None);

        let json = r#"{"choices": [{"message": {"role": "assistant", "content": "   "}}]}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_text(), None);

        let json = r#"{"choices": []}"#;
        let resp: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.first_text(), None);
    }
}

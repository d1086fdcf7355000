//! LLM-backed implementation of [`Translate`].
//!
//! Builds a system prompt (target language, placeholder and brand rules) and
//! a per-line user prompt (speaker tone, scene context, alternate-language
//! text), then sends both through a [`ChatSender`].

use crate::config::LlmConfig;
use crate::engine::{Translate, WorkItem};
use crate::llm::{ApiError, ChatMessage, ChatRequest, ChatSender};

const PLACEHOLDER_EXAMPLES: &str =
    "[mcname], [mcsurname], mcname, {{mcname}}, {{var}}, [var], <tag>, {name}, {0}, %(name)s";

pub struct LlmTranslator<C> {
    client: C,
    model: String,
    temperature: f32,
    max_tokens: u32,
    target_lang: String,
    system_prompt: String,
}

impl<C: ChatSender> LlmTranslator<C> {
    pub fn new(client: C, config: &LlmConfig) -> Self {
        Self {
            client,
            model: config.resolved_model(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            target_lang: config.target_lang.clone(),
            system_prompt: system_prompt(&config.target_lang, &config.brands),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The chat request sent for `item`.
    pub fn request_for(&self, item: &WorkItem) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage::system(self.system_prompt.clone()),
                ChatMessage::user(user_prompt(&self.target_lang, item)),
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl<C: ChatSender + 'static> Translate for LlmTranslator<C> {
    async fn translate(&self, item: &WorkItem) -> Result<String, ApiError> {
        let request = self.request_for(item);
        let response = self.client.send_chat(&request).await?;
        response
            .first_text()
            .map(clean_output)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ApiError::Decode("completion had no text".to_string()))
    }
}

fn system_prompt(target_lang: &str, brands: &[String]) -> String {
    let mut prompt = String::from(
        "You are a senior localizer for dialogue-heavy games.\n\
         Translate the given line into natural, immersive text for players.\n\n\
         Rules:\n\
         - Output ONLY the final translation: no quotes, notes or explanations.\n",
    );
    prompt.push_str(&format!(
        "- Keep ALL placeholders, variables and markup unchanged, e.g. {PLACEHOLDER_EXAMPLES}. \
         Do not add or remove spaces inside brackets or change bracket types.\n"
    ));
    if !brands.is_empty() {
        prompt.push_str(&format!("- Brand names stay as-is: {}.\n", brands.join(", ")));
    }
    prompt.push_str(
        "- Use the primary text for literal meaning and the alternate text, when given, for mood and subtext.\n\
         - Adapt tone to the speaker; keep interjections and half-sentences natural.\n",
    );
    prompt.push_str(&format!("\nTarget language: {target_lang}"));
    prompt
}

fn user_prompt(target_lang: &str, item: &WorkItem) -> String {
    let payload = &item.payload;
    let speaker = payload.speaker.as_deref().unwrap_or("");
    let mut sections = Vec::new();

    if let Some(context) = payload.context.as_deref().filter(|c| !c.is_empty()) {
        sections.push(format!("CONTEXT (nearby lines):\n{context}"));
    }
    sections.push(format!("SPEAKER: {speaker}"));
    sections.push(format!("TONE: {}", speaker_tone(speaker)));
    sections.push(format!("TEXT:\n{}", payload.text));
    if let Some(alt) = payload.alt_text.as_deref().filter(|a| !a.is_empty()) {
        sections.push(format!("ALT:\n{alt}"));
    }
    sections.push(format!("Translate TEXT to {target_lang}."));
    sections.join("\n\n")
}

/// Tone hint derived from the speaker tag.
fn speaker_tone(speaker: &str) -> &'static str {
    let sp = speaker.to_lowercase();
    if sp == "string" {
        "UI label or location; concise noun phrase, no list-style breaks"
    } else if ["principal", "teacher", "professor", "dean", "librarian"]
        .iter()
        .any(|k| sp.contains(k))
    {
        "academic and authoritative, still natural speech"
    } else if ["coach", "trainer"].iter().any(|k| sp.contains(k)) {
        "energetic and direct"
    } else if ["mrs", "lady", "madam", "secretary", "mother"]
        .iter()
        .any(|k| sp.contains(k))
    {
        "polite and restrained, without forced honorifics"
    } else {
        "natural and colloquial with emotional tension; avoid literal list-like phrasing"
    }
}

/// Strip whitespace and one pair of wrapping quotes the model may add.
fn clean_output(text: &str) -> String {
    let text = text.trim();
    for (open, close) in [('"', '"'), ('“', '”'), ('「', '」')] {
        if let Some(inner) = text
            .strip_prefix(open)
            .and_then(|rest| rest.strip_suffix(close))
            && !inner.contains(open)
            && !inner.contains(close)
        {
            return inner.trim().to_string();
        }
    }
    text.to_string()
}

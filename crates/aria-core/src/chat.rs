//! Turn-based chat client against the `generateContent` REST endpoint.

use crate::peer::ChatModel;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const GENERATE_CONTENT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Clone, Serialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct TextPart {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Candidate {
    pub content: CandidateContent,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CandidatePart {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InlineData {
    pub data: String,
}

pub(crate) fn generate_content_url(model: &str, api_key: &str) -> String {
    format!("{GENERATE_CONTENT_ENDPOINT}/{model}:generateContent?key={api_key}")
}

/// Multi-turn chat: keeps the running history so each request carries the
/// whole conversation. Created lazily on first use and kept for the process
/// lifetime.
pub struct GeminiChatClient {
    client: Client,
    api_key: String,
    model: String,
    history: Vec<Content>,
}

impl GeminiChatClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            history: Vec::new(),
        }
    }
}

#[async_trait]
impl ChatModel for GeminiChatClient {
    async fn send(&mut self, text: &str) -> Result<String> {
        self.history.push(Content {
            role: Some("user".to_string()),
            parts: vec![TextPart {
                text: text.to_string(),
            }],
        });

        let body = serde_json::json!({ "contents": self.history });
        let resp = self
            .client
            .post(generate_content_url(&self.model, &self.api_key))
            .json(&body)
            .send()
            .await
            .context("chat request failed")?
            .error_for_status()
            .context("chat request rejected")?
            .json::<GenerateContentResponse>()
            .await
            .context("chat response was not valid JSON")?;

        let reply: String = resp
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if reply.is_empty() {
            // Roll back the failed turn so history stays consistent.
            self.history.pop();
            anyhow::bail!("chat response contained no text");
        }

        self.history.push(Content {
            role: Some("model".to_string()),
            parts: vec![TextPart {
                text: reply.clone(),
            }],
        });
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_embeds_model_and_key() {
        let url = generate_content_url("gemini-2.5-flash", "k123");
        assert!(url.ends_with("models/gemini-2.5-flash:generateContent?key=k123"));
    }

    #[test]
    fn response_parses_text_parts() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"text": "Hello "}, {"text": "there"}]}}
            ]
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let text: String = resp.candidates[0]
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        assert_eq!(text, "Hello there");
    }

    #[test]
    fn response_tolerates_missing_candidates() {
        let resp: GenerateContentResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.candidates.is_empty());
    }
}

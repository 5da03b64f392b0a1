//! Speech synthesis client against the `generateContent` REST endpoint.

use crate::chat::{GenerateContentResponse, generate_content_url};
use crate::peer::SpeechSynthesizer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;

/// One-shot text-to-speech requests. Stateless between calls; the voice is
/// chosen per request so text mode follows the session voice setting.
pub struct GeminiTtsClient {
    client: Client,
    api_key: String,
    model: String,
}

impl GeminiTtsClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiTtsClient {
    async fn synthesize(&mut self, text: &str, voice: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                }
            }
        });

        let resp = self
            .client
            .post(generate_content_url(&self.model, &self.api_key))
            .json(&body)
            .send()
            .await
            .context("speech synthesis request failed")?
            .error_for_status()
            .context("speech synthesis request rejected")?
            .json::<GenerateContentResponse>()
            .await
            .context("speech synthesis response was not valid JSON")?;

        resp.candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .and_then(|p| p.inline_data.as_ref())
            .map(|d| d.data.clone())
            .context("speech synthesis response contained no audio")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_surfaces_inline_audio() {
        let raw = r#"{
            "candidates": [
                {"content": {"parts": [{"inlineData": {"data": "UEtN"}}]}}
            ]
        }"#;
        let resp: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let data = resp
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .and_then(|p| p.inline_data.as_ref())
            .map(|d| d.data.clone());
        assert_eq!(data.as_deref(), Some("UEtN"));
    }
}

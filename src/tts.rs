use crate::config::{Channel, Channels};
use anyhow::Context;
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL_PATH: &str = "models/gemini-2.5-pro-preview-tts";

/// One call to the speech provider.
#[derive(Debug, Clone)]
pub struct SynthesisCall {
    pub id: u32,
    pub prompt: String,
    pub voices: BTreeMap<Channel, String>,
    pub temperature: f32,
    pub timeout: Duration,
}

impl SynthesisCall {
    pub fn voices_from(channels: &Channels) -> BTreeMap<Channel, String> {
        Channel::ALL
            .into_iter()
            .map(|c| (c, channels.get(c).voice.clone()))
            .collect()
    }
}

/// Prompt + voices in, audio bytes out: either a complete WAV container or
/// raw samples of the fixed profile. Implementations enforce `call.timeout`.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, call: &SynthesisCall) -> anyhow::Result<Vec<u8>>;
}

pub struct GeminiTts {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model_path: String,
}

impl GeminiTts {
    pub fn new(api_key: impl Into<String>, model: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            model_path: model_path(model),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model_path(&self) -> &str {
        &self.model_path
    }
}

/// `models/` is prepended when the override omits it.
pub fn model_path(model: Option<&str>) -> String {
    match model.map(str::trim).filter(|m| !m.is_empty()) {
        None => DEFAULT_MODEL_PATH.to_string(),
        Some(m) if m.starts_with("models/") => m.to_string(),
        Some(m) => format!("models/{m}"),
    }
}

pub fn request_body(call: &SynthesisCall) -> serde_json::Value {
    let voice_configs: Vec<_> = call
        .voices
        .iter()
        .map(|(channel, voice)| {
            json!({
                "speaker": channel.as_str(),
                "voiceConfig": {"prebuiltVoiceConfig": {"voiceName": voice}},
            })
        })
        .collect();
    json!({
        "contents": [{"parts": [{"text": call.prompt}]}],
        "generationConfig": {
            "responseModalities": ["AUDIO"],
            "temperature": call.temperature,
            "speechConfig": {
                "multiSpeakerVoiceConfig": {"speakerVoiceConfigs": voice_configs}
            },
        },
    })
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(rename = "inlineData", alias = "inline_data")]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
}

/// Decode the first candidate's inline audio.
pub fn decode_audio(body: &str) -> anyhow::Result<Vec<u8>> {
    let resp: GenerateResponse = serde_json::from_str(body).context("invalid response JSON")?;
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("response has no candidates"))?;
    let part = candidate
        .content
        .and_then(|c| c.parts.into_iter().next())
        .ok_or_else(|| anyhow::anyhow!("response has no content.parts"))?;
    let data = part
        .inline_data
        .map(|d| d.data)
        .filter(|d| !d.is_empty())
        .ok_or_else(|| anyhow::anyhow!("response inlineData.data is empty"))?;
    let audio = base64::engine::general_purpose::STANDARD
        .decode(data.as_bytes())
        .context("inlineData.data is not valid base64")?;
    Ok(audio)
}

#[async_trait]
impl Synthesizer for GeminiTts {
    async fn synthesize(&self, call: &SynthesisCall) -> anyhow::Result<Vec<u8>> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model_path);
        debug!("Calling Gemini TTS for turn {} ({} chars)", call.id, call.prompt.chars().count());

        let res = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .timeout(call.timeout)
            .json(&request_body(call))
            .send()
            .await
            .with_context(|| format!("Gemini TTS request failed for turn {}", call.id))?;

        let status = res.status();
        let text = res.text().await?;
        if !status.is_success() {
            error!("Gemini TTS HTTP {} for turn {}", status, call.id);
            error!("Gemini error body: {}", text.chars().take(2000).collect::<String>());
            anyhow::bail!("Gemini TTS returned HTTP {}", status);
        }
        decode_audio(&text)
    }
}

use crate::error::{PipelineError, Result};
use crate::script::Speaker;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const DEFAULT_BATCH_WAIT_MARGIN_SECONDS: f64 = 30.0;
const MAX_GAP_SECONDS: f64 = 3600.0;

pub const DEFAULT_INSTRUCTION: &str = "Podcast-style Korean U.S. stock market close briefing: brisk and professional; \
     Host sounds warm and conversational, Analyst sounds confident and data-driven;";

/// Synthesis-side identity a speaker role is rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Speaker1,
    Speaker2,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Speaker1, Channel::Speaker2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Speaker1 => "speaker1",
            Channel::Speaker2 => "speaker2",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChannelConfig {
    pub voice: String,
    pub instruction: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Channels {
    pub speaker1: ChannelConfig,
    pub speaker2: ChannelConfig,
}

impl Channels {
    pub fn get(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Speaker1 => &self.speaker1,
            Channel::Speaker2 => &self.speaker2,
        }
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self {
            speaker1: ChannelConfig {
                voice: "Zephyr".to_string(),
                instruction: DEFAULT_INSTRUCTION.to_string(),
            },
            speaker2: ChannelConfig {
                voice: "Charon".to_string(),
                instruction: DEFAULT_INSTRUCTION.to_string(),
            },
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Channels::default().speaker1
    }
}

/// Fixed role → channel mapping.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpeakerChannels {
    pub host: Channel,
    pub analyst: Channel,
}

impl SpeakerChannels {
    pub fn channel_for(&self, speaker: Speaker) -> Channel {
        match speaker {
            Speaker::Host => self.host,
            Speaker::Analyst => self.analyst,
        }
    }
}

impl Default for SpeakerChannels {
    fn default() -> Self {
        Self {
            host: Channel::Speaker1,
            analyst: Channel::Speaker2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub channels: Channels,
    pub speakers: SpeakerChannels,
    pub temperature: f32,
    pub timeout_seconds: f64,
    /// Defaults to `timeout_seconds + 30`.
    pub batch_wait_seconds: Option<f64>,
    pub max_parallel_requests: usize,
    pub batch_cooldown_seconds: f64,
    pub common_gap_seconds: f64,
    pub chapter_gap_seconds: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channels: Channels::default(),
            speakers: SpeakerChannels::default(),
            temperature: 1.0,
            timeout_seconds: 120.0,
            batch_wait_seconds: None,
            max_parallel_requests: 4,
            batch_cooldown_seconds: 0.0,
            common_gap_seconds: 0.25,
            chapter_gap_seconds: 0.5,
        }
    }
}

impl PipelineConfig {
    /// Load from a TOML file. Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        info!("Loaded pipeline config from {}", path.display());
        Ok(config)
    }

    /// Load from `path` if given, else defaults; validated either way.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for channel in Channel::ALL {
            let c = self.channels.get(channel);
            if c.voice.trim().is_empty() {
                return Err(PipelineError::config(
                    format!("channels.{channel}.voice"),
                    "must not be empty",
                ));
            }
            if c.instruction.trim().is_empty() {
                return Err(PipelineError::config(
                    format!("channels.{channel}.instruction"),
                    "must not be empty",
                ));
            }
        }
        if self.speakers.host == self.speakers.analyst {
            return Err(PipelineError::config(
                "speakers",
                "host and analyst must map to different channels",
            ));
        }
        if !self.temperature.is_finite() || !(0.0..=2.0).contains(&self.temperature) {
            return Err(PipelineError::config(
                "temperature",
                format!("must be within 0.0..=2.0, got {}", self.temperature),
            ));
        }
        positive("timeout_seconds", self.timeout_seconds)?;
        if let Some(wait) = self.batch_wait_seconds {
            positive("batch_wait_seconds", wait)?;
            if wait < self.timeout_seconds {
                return Err(PipelineError::config(
                    "batch_wait_seconds",
                    format!("must be >= timeout_seconds ({})", self.timeout_seconds),
                ));
            }
        }
        if self.max_parallel_requests == 0 {
            return Err(PipelineError::config(
                "max_parallel_requests",
                "must be at least 1",
            ));
        }
        non_negative("batch_cooldown_seconds", self.batch_cooldown_seconds)?;
        non_negative("common_gap_seconds", self.common_gap_seconds)?;
        non_negative("chapter_gap_seconds", self.chapter_gap_seconds)?;

        // every duration built later must be representable
        fits_duration("timeout_seconds", self.timeout_seconds)?;
        fits_duration("batch_wait_seconds", self.batch_wait_seconds_or_default())?;
        fits_duration("batch_cooldown_seconds", self.batch_cooldown_seconds)?;
        at_most("common_gap_seconds", self.common_gap_seconds, MAX_GAP_SECONDS)?;
        at_most("chapter_gap_seconds", self.chapter_gap_seconds, MAX_GAP_SECONDS)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs_f64(self.batch_wait_seconds_or_default())
    }

    fn batch_wait_seconds_or_default(&self) -> f64 {
        self.batch_wait_seconds
            .unwrap_or(self.timeout_seconds + DEFAULT_BATCH_WAIT_MARGIN_SECONDS)
    }

    pub fn batch_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.batch_cooldown_seconds)
    }

    pub fn common_gap_ms(&self) -> u64 {
        seconds_to_ms(self.common_gap_seconds)
    }

    pub fn chapter_gap_ms(&self) -> u64 {
        seconds_to_ms(self.chapter_gap_seconds)
    }
}

fn fits_duration(key: &str, value: f64) -> Result<()> {
    if Duration::try_from_secs_f64(value).is_err() {
        return Err(PipelineError::config(key, format!("{value} seconds is out of range")));
    }
    Ok(())
}

fn at_most(key: &str, value: f64, max: f64) -> Result<()> {
    if value > max {
        return Err(PipelineError::config(key, format!("must be <= {max}, got {value}")));
    }
    Ok(())
}

fn positive(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(PipelineError::config(key, format!("must be > 0, got {value}")));
    }
    Ok(())
}

fn non_negative(key: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(PipelineError::config(key, format!("must be >= 0, got {value}")));
    }
    Ok(())
}

// Gaps are whole milliseconds so gap frames are an exact multiple of frames-per-ms.
fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds * 1000.0).round() as u64
}

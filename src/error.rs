//! Error types for the synthesis/assembly pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    // Configuration errors: detected before any network activity
    #[error("Invalid configuration value for {key}: {message}")]
    Config { key: String, message: String },

    #[error("Invalid script {path}: {message}")]
    Script { path: PathBuf, message: String },

    // Audio format errors
    #[error("Audio format mismatch in {path}: {parameter} expected {expected}, got {actual}")]
    Format {
        path: String,
        parameter: &'static str,
        expected: u32,
        actual: u32,
    },

    #[error("Raw PCM payload for turn {id} has {len} bytes, not a multiple of the {frame_bytes}-byte frame")]
    RawPcmLength { id: u32, len: usize, frame_bytes: usize },

    // Concurrency errors
    #[error("Batch did not complete within {wait_seconds}s; pending turn ids: {pending:?}")]
    BatchTimeout { wait_seconds: f64, pending: Vec<u32> },

    #[error("Synthesis for turn {id} did not finish within the {timeout_seconds}s request timeout")]
    RequestTimeout { id: u32, timeout_seconds: f64 },

    // Collaborator errors
    #[error("Synthesis failed for turn {id}: {message}")]
    Synthesis { id: u32, message: String },

    // Consistency errors
    #[error("Script turn {id} has no timeline entry")]
    MissingTimelineEntry { id: u32 },

    #[error("Final audio file is missing: {path}")]
    MissingFinalAudio { path: PathBuf },

    #[error("Frame count mismatch for {what}: expected {expected}, got {actual}")]
    FrameMismatch {
        what: String,
        expected: u64,
        actual: u64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl PipelineError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before any synthesis call could have happened.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            PipelineError::Config { .. } | PipelineError::Script { .. } | PipelineError::Toml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_display_names_parameter() {
        let error = PipelineError::Format {
            path: "out/03.wav".to_string(),
            parameter: "sample_rate",
            expected: 24000,
            actual: 44100,
        };
        assert_eq!(
            error.to_string(),
            "Audio format mismatch in out/03.wav: sample_rate expected 24000, got 44100"
        );
    }

    #[test]
    fn test_batch_timeout_lists_pending_ids() {
        let error = PipelineError::BatchTimeout {
            wait_seconds: 150.0,
            pending: vec![4, 7],
        };
        assert!(error.to_string().contains("[4, 7]"));
    }

    #[test]
    fn test_request_timeout_names_turn() {
        let error = PipelineError::RequestTimeout {
            id: 5,
            timeout_seconds: 120.0,
        };
        assert_eq!(
            error.to_string(),
            "Synthesis for turn 5 did not finish within the 120s request timeout"
        );
    }

    #[test]
    fn test_is_config() {
        assert!(PipelineError::config("timeout_seconds", "must be > 0").is_config());
        assert!(!PipelineError::MissingTimelineEntry { id: 1 }.is_config());
    }
}

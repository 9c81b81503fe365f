//! Turn-level speech synthesis and timeline assembly for two-speaker scripts.

pub mod args;
pub mod assemble;
pub mod audio;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod request;
pub mod scheduler;
pub mod script;
pub mod subtitle;
pub mod timeline;
pub mod tts;

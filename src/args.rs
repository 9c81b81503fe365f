use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(about = "Turn-level multi-speaker TTS: script.json -> one gapped WAV + timeline")]
pub struct Args {
    /// Briefing date, YYYYMMDD or YYYY-MM-DD
    pub date: String,

    #[clap(long, default_value = ".")]
    pub root: PathBuf,

    /// Defaults to <root>/Podcast/<date>/script.json
    #[clap(long)]
    pub script: Option<PathBuf>,

    /// Defaults to <root>/Podcast/<date>/tts
    #[clap(long)]
    pub out_dir: Option<PathBuf>,

    /// TOML pipeline config; built-in defaults when omitted
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Also write an SRT subtitle file next to the final WAV
    #[clap(long)]
    pub srt: bool,

    #[clap(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[clap(long, env = "GEMINI_TTS_MODEL")]
    pub model: Option<String>,
}

impl Args {
    pub fn script_path(&self, date: &str) -> PathBuf {
        self.script
            .clone()
            .unwrap_or_else(|| self.root.join("Podcast").join(date).join("script.json"))
    }

    pub fn out_dir(&self, date: &str) -> PathBuf {
        self.out_dir
            .clone()
            .unwrap_or_else(|| self.root.join("Podcast").join(date).join("tts"))
    }
}

/// Normalise `YYYYMMDD` or `YYYY-MM-DD` to `YYYYMMDD`.
pub fn parse_date_arg(date: &str) -> anyhow::Result<String> {
    let date = date.trim();
    let format = if date.contains('-') { "%Y-%m-%d" } else { "%Y%m%d" };
    let parsed = NaiveDate::parse_from_str(date, format)
        .map_err(|e| anyhow::anyhow!("invalid date '{}': {}", date, e))?;
    Ok(parsed.format("%Y%m%d").to_string())
}

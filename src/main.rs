use clap::Parser;
use podcast_tts::args::{Args, parse_date_arg};
use podcast_tts::config::PipelineConfig;
use podcast_tts::pipeline::{RunOptions, run};
use podcast_tts::tts::GeminiTts;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let date = match parse_date_arg(&args.date) {
        Ok(date) => date,
        Err(e) => {
            error!("Date parsing failed: {}", e);
            return ExitCode::from(2);
        }
    };
    let Some(api_key) = args.api_key.clone().filter(|k| !k.trim().is_empty()) else {
        error!("GEMINI_API_KEY is not set (environment or --api-key)");
        return ExitCode::from(2);
    };
    let config = match PipelineConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(2);
        }
    };

    let synthesizer = GeminiTts::new(api_key, args.model.as_deref());
    info!(
        "Starting TTS pipeline for {} (model {}, parallel {})",
        date,
        synthesizer.model_path(),
        config.max_parallel_requests
    );

    let opts = RunOptions {
        script_path: args.script_path(&date),
        out_dir: args.out_dir(&date),
        date,
        write_srt: args.srt,
    };

    match run(&opts, &config, Arc::new(synthesizer)).await {
        Ok(summary) => {
            info!(
                "Saved: {} ({} turns, {} fresh calls, {} frames)",
                summary.out_wav.display(),
                summary.turns,
                summary.fresh_calls,
                summary.total_frames
            );
            info!("Timeline: {}", summary.manifest.display());
            info!("Timed script: {}", summary.timed_script.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("TTS generation failed: {}", e);
            if e.is_config() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

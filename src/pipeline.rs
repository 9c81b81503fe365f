use crate::assemble::assemble;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::output::{AudioFormat, Gaps, TimelineManifest, write_manifest, write_timed_script};
use crate::request::build_requests;
use crate::scheduler::{SchedulerOptions, migrate_legacy_layout, synthesize_all};
use crate::script::ScriptDocument;
use crate::subtitle::{cues, write_srt};
use crate::timeline::{GapFrames, build_timeline};
use crate::tts::Synthesizer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// `YYYYMMDD`
    pub date: String,
    pub script_path: PathBuf,
    pub out_dir: PathBuf,
    pub write_srt: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub out_wav: PathBuf,
    pub manifest: PathBuf,
    pub timed_script: PathBuf,
    pub srt: Option<PathBuf>,
    pub turns: usize,
    pub fresh_calls: usize,
    pub total_frames: u64,
}

/// Per-turn files are `<digits>.wav`; the suffix keeps the date-named
/// output from ever landing on one of them.
pub fn final_wav_name(date: &str) -> String {
    format!("{date}_final.wav")
}

/// Script in, one gapped WAV plus timing metadata out.
///
/// Everything that can be rejected without touching the output directory or
/// the network is checked first. Per-turn files written before a failure stay
/// in `out_dir` and are reused by the next run.
pub async fn run(
    opts: &RunOptions,
    config: &PipelineConfig,
    synthesizer: Arc<dyn Synthesizer>,
) -> Result<RunSummary> {
    config.validate()?;
    let script = ScriptDocument::load(&opts.script_path)?;
    let requests = build_requests(&script.turns, config)?;
    info!("Built {} synthesis requests", requests.len());

    migrate_legacy_layout(&opts.out_dir);
    let report = synthesize_all(
        &requests,
        &opts.out_dir,
        synthesizer,
        &SchedulerOptions::from_config(config),
    )
    .await?;
    if report.artifacts.len() != script.turns.len() {
        return Err(PipelineError::FrameMismatch {
            what: "artifact count".to_string(),
            expected: script.turns.len() as u64,
            actual: report.artifacts.len() as u64,
        });
    }
    info!(
        "Synthesis complete: {} fresh, {} resumed",
        report.fresh_total(),
        report.artifacts.len() - report.fresh_total()
    );

    let gaps = GapFrames::from_ms(config.common_gap_ms(), config.chapter_gap_ms());
    let timeline = build_timeline(&report.artifacts, gaps);

    let final_name = final_wav_name(&opts.date);
    let out_wav = opts.out_dir.join(&final_name);
    let total_frames = assemble(
        &report.artifacts,
        &timeline.gaps_after_frames,
        &opts.out_dir,
        &out_wav,
    )?;

    let manifest = TimelineManifest {
        date: opts.date.clone(),
        audio: AudioFormat::fixed(),
        gaps: Gaps {
            common_gap_ms: config.common_gap_ms(),
            chapter_gap_ms: config.chapter_gap_ms(),
        },
        turns: timeline.entries.clone(),
        final_wav: final_name,
    };
    let manifest_path = write_manifest(&opts.out_dir, &manifest)?;
    let timed_script = write_timed_script(&opts.script_path, &opts.date, &timeline.entries)?;

    let srt = if opts.write_srt {
        let path = opts.out_dir.join(format!("{}.srt", opts.date));
        write_srt(&path, &cues(&script.turns, &timeline.entries))?;
        info!("Subtitles written to {}", path.display());
        Some(path)
    } else {
        None
    };

    Ok(RunSummary {
        out_wav,
        manifest: manifest_path,
        timed_script,
        srt,
        turns: script.turns.len(),
        fresh_calls: report.fresh_total(),
        total_frames,
    })
}

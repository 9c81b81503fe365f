use crate::audio::{self, wav_spec};
use crate::error::{PipelineError, Result};
use crate::scheduler::TurnAudioArtifact;
use hound::{WavReader, WavWriter};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

pub const CHUNK_FRAMES: usize = 8192;

/// Stream every artifact plus its trailing silence into one WAV at `out_path`.
///
/// Only artifact order and `gaps_after_frames` decide the layout; no timing
/// is computed here. Returns the frame count of the written file.
pub fn assemble(
    artifacts: &[TurnAudioArtifact],
    gaps_after_frames: &[u64],
    base_dir: &Path,
    out_path: &Path,
) -> Result<u64> {
    if artifacts.len() != gaps_after_frames.len() {
        return Err(PipelineError::FrameMismatch {
            what: "gap-after array length".to_string(),
            expected: artifacts.len() as u64,
            actual: gaps_after_frames.len() as u64,
        });
    }

    let tmp = audio::part_path(out_path);
    let mut writer = WavWriter::create(&tmp, wav_spec())?;
    let mut silence: HashMap<u64, Vec<i16>> = HashMap::new();
    let mut chunk = Vec::with_capacity(CHUNK_FRAMES);
    let mut expected_total = 0u64;

    for (artifact, &gap) in artifacts.iter().zip(gaps_after_frames) {
        let path = base_dir.join(&artifact.wav);
        let mut reader = WavReader::open(&path)?;
        audio::check_spec(&reader.spec(), &path.display().to_string())?;

        let mut copied = 0u64;
        let mut samples = reader.samples::<i16>();
        loop {
            chunk.clear();
            for sample in samples.by_ref().take(CHUNK_FRAMES) {
                chunk.push(sample?);
            }
            if chunk.is_empty() {
                break;
            }
            for &s in &chunk {
                writer.write_sample(s)?;
            }
            copied += chunk.len() as u64;
        }
        if copied != artifact.frames {
            return Err(PipelineError::FrameMismatch {
                what: path.display().to_string(),
                expected: artifact.frames,
                actual: copied,
            });
        }

        if gap > 0 {
            let buf = silence
                .entry(gap)
                .or_insert_with(|| vec![0i16; gap as usize]);
            for &s in buf.iter() {
                writer.write_sample(s)?;
            }
        }
        debug!("Appended turn {} ({} frames, gap {})", artifact.id, copied, gap);
        expected_total += copied + gap;
    }
    writer.finalize()?;
    std::fs::rename(&tmp, out_path)?;

    let written = audio::wav_frames(out_path)?;
    if written != expected_total {
        return Err(PipelineError::FrameMismatch {
            what: out_path.display().to_string(),
            expected: expected_total,
            actual: written,
        });
    }
    info!("Assembled {} turns into {} ({} frames)", artifacts.len(), out_path.display(), written);
    Ok(written)
}

use crate::audio::{CHANNELS, SAMPLE_RATE_HZ, SAMPLE_WIDTH_BYTES};
use crate::error::{PipelineError, Result};
use crate::script::{ScriptDocument, parse_id};
use crate::timeline::TimelineEntry;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "timeline.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub sample_width_bytes: u16,
}

impl AudioFormat {
    pub fn fixed() -> Self {
        Self {
            sample_rate_hz: SAMPLE_RATE_HZ,
            channels: CHANNELS,
            sample_width_bytes: SAMPLE_WIDTH_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gaps {
    pub common_gap_ms: u64,
    pub chapter_gap_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineManifest {
    pub date: String,
    pub audio: AudioFormat,
    pub gaps: Gaps,
    pub turns: Vec<TimelineEntry>,
    /// Relative to the manifest's directory.
    pub final_wav: String,
}

/// Write `timeline.json` into `out_dir`. The final WAV must already exist there.
pub fn write_manifest(out_dir: &Path, manifest: &TimelineManifest) -> Result<PathBuf> {
    let final_wav = out_dir.join(&manifest.final_wav);
    if !final_wav.is_file() {
        return Err(PipelineError::MissingFinalAudio { path: final_wav });
    }
    let path = out_dir.join(MANIFEST_FILE);
    let data = serde_json::to_string_pretty(manifest)?;
    fs::write(&path, data)?;
    info!("Timeline manifest written to {}", path.display());
    Ok(path)
}

/// `script.json` → `script_<date>_timed.json` next to the source.
pub fn timed_script_path(source: &Path, date: &str) -> PathBuf {
    let stem = source
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("script");
    source.with_file_name(format!("{stem}_{date}_timed.json"))
}

/// Copy of the raw script with `time: [start_ms, end_ms]` on every turn.
pub fn inject_times(raw: &Value, timeline: &[TimelineEntry]) -> Result<Value> {
    let times: HashMap<u32, &TimelineEntry> = timeline.iter().map(|e| (e.id, e)).collect();
    let mut doc = raw.clone();
    if let Some(turns) = doc.get_mut("scripts").and_then(Value::as_array_mut) {
        for turn in turns {
            let id = turn
                .get("id")
                .and_then(parse_id)
                .ok_or_else(|| PipelineError::config("scripts", format!("turn without an integer id: {turn}")))?;
            let entry = times
                .get(&id)
                .ok_or(PipelineError::MissingTimelineEntry { id })?;
            if let Some(obj) = turn.as_object_mut() {
                obj.insert(
                    "time".to_string(),
                    json!([entry.start_time_ms, entry.end_time_ms]),
                );
            }
        }
    }
    Ok(doc)
}

/// Reload the source script, inject times and save a dated snapshot beside it.
pub fn write_timed_script(script_path: &Path, date: &str, timeline: &[TimelineEntry]) -> Result<PathBuf> {
    let source = ScriptDocument::load(script_path)?;
    let timed = inject_times(&source.raw, timeline)?;
    let path = timed_script_path(script_path, date);
    if path == script_path {
        return Err(PipelineError::config("script", "timed snapshot would overwrite the source"));
    }
    fs::write(&path, serde_json::to_string_pretty(&timed)?)?;
    info!("Timed script written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Speaker;

    fn entry(id: u32, start: u64, end: u64) -> TimelineEntry {
        TimelineEntry {
            id,
            chapter: "opening".to_string(),
            speaker: Speaker::Host,
            wav: format!("{id:02}.wav"),
            start_time_ms: start,
            end_time_ms: end,
            duration_ms: end - start,
        }
    }

    #[test]
    fn test_inject_times_keeps_other_fields() {
        let raw = json!({
            "scripts": [
                {"id": 0, "speaker": "진행자", "text": "a", "sources": [{"url": "x"}]},
                {"id": "1", "speaker": "해설자", "text": "b"}
            ],
            "chapter": [{"name": "opening", "start_id": 0, "end_id": 1}]
        });
        let timed = inject_times(&raw, &[entry(0, 0, 1000), entry(1, 1250, 2750)]).unwrap();
        assert_eq!(timed["scripts"][0]["time"], json!([0, 1000]));
        assert_eq!(timed["scripts"][1]["time"], json!([1250, 2750]));
        assert_eq!(timed["scripts"][0]["sources"][0]["url"], "x");
        assert_eq!(timed["chapter"], raw["chapter"]);
        assert!(raw["scripts"][0].get("time").is_none());
    }

    #[test]
    fn test_missing_timeline_entry_is_fatal() {
        let raw = json!({"scripts": [{"id": 0}, {"id": 5}]});
        let err = inject_times(&raw, &[entry(0, 0, 10)]).unwrap_err();
        assert!(matches!(err, PipelineError::MissingTimelineEntry { id: 5 }));
    }

    #[test]
    fn test_timed_script_path_differs_from_source() {
        let source = Path::new("/data/Podcast/20261018/script.json");
        assert_eq!(
            timed_script_path(source, "20261018"),
            Path::new("/data/Podcast/20261018/script_20261018_timed.json")
        );
    }

    #[test]
    fn test_manifest_requires_final_wav() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = TimelineManifest {
            date: "20261018".to_string(),
            audio: AudioFormat::fixed(),
            gaps: Gaps {
                common_gap_ms: 250,
                chapter_gap_ms: 500,
            },
            turns: vec![entry(0, 0, 10)],
            final_wav: "20261018.wav".to_string(),
        };
        let err = write_manifest(dir.path(), &manifest).unwrap_err();
        assert!(matches!(err, PipelineError::MissingFinalAudio { .. }));

        crate::audio::write_wav(&dir.path().join("20261018.wav"), &[0; 240]).unwrap();
        let path = write_manifest(dir.path(), &manifest).unwrap();
        let loaded: TimelineManifest =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.audio.sample_rate_hz, 24_000);
    }
}

use crate::audio::SAMPLE_RATE_HZ;
use crate::scheduler::TurnAudioArtifact;
use crate::script::{Speaker, is_known_chapter};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: u32,
    pub chapter: String,
    pub speaker: Speaker,
    pub wav: String,
    pub start_time_ms: u64,
    pub end_time_ms: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapFrames {
    pub common: u64,
    pub chapter: u64,
}

impl GapFrames {
    pub fn from_ms(common_gap_ms: u64, chapter_gap_ms: u64) -> Self {
        Self {
            common: ms_to_frames(common_gap_ms),
            chapter: ms_to_frames(chapter_gap_ms),
        }
    }

    /// Chapter gap only between two different recognised chapters.
    pub fn between(&self, prev: &str, next: &str) -> u64 {
        if prev != next && is_known_chapter(prev) && is_known_chapter(next) {
            self.chapter
        } else {
            self.common
        }
    }
}

#[derive(Debug, Clone)]
pub struct Timeline {
    pub entries: Vec<TimelineEntry>,
    pub gaps_after_frames: Vec<u64>,
    pub total_frames: u64,
}

/// `round(frames * 1000 / rate)`, half up, in integer arithmetic.
pub fn frames_to_ms(frames: u64) -> u64 {
    let rate = u64::from(SAMPLE_RATE_HZ);
    (frames * 1000 + rate / 2) / rate
}

pub fn ms_to_frames(ms: u64) -> u64 {
    // exact for rates that are whole kHz
    (ms * u64::from(SAMPLE_RATE_HZ) + 500) / 1000
}

/// One gap per artifact; the last is always zero.
pub fn gaps_after(artifacts: &[TurnAudioArtifact], gaps: GapFrames) -> Vec<u64> {
    let mut out: Vec<u64> = artifacts
        .windows(2)
        .map(|pair| gaps.between(&pair[0].chapter, &pair[1].chapter))
        .collect();
    if !artifacts.is_empty() {
        out.push(0);
    }
    out
}

/// Frame-accurate timeline over artifacts already sorted by id.
pub fn build_timeline(artifacts: &[TurnAudioArtifact], gaps: GapFrames) -> Timeline {
    let gaps_after_frames = gaps_after(artifacts, gaps);
    let mut entries = Vec::with_capacity(artifacts.len());
    let mut cursor = 0u64;

    for (artifact, gap) in artifacts.iter().zip(&gaps_after_frames) {
        let start_frames = cursor;
        let end_frames = start_frames + artifact.frames;
        cursor = end_frames + gap;

        // both ends rounded independently so adjacent entries never drift
        let start_time_ms = frames_to_ms(start_frames);
        let end_time_ms = frames_to_ms(end_frames);
        entries.push(TimelineEntry {
            id: artifact.id,
            chapter: artifact.chapter.clone(),
            speaker: artifact.speaker,
            wav: artifact.wav.clone(),
            start_time_ms,
            end_time_ms,
            duration_ms: end_time_ms - start_time_ms,
        });
    }

    info!(
        "Timeline: {} turns, {} frames ({} ms)",
        entries.len(),
        cursor,
        frames_to_ms(cursor)
    );
    Timeline {
        entries,
        gaps_after_frames,
        total_frames: cursor,
    }
}

//! SRT sidecar rendered straight from the timeline, one cue per turn.

use crate::error::Result;
use crate::script::Turn;
use crate::timeline::TimelineEntry;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

const LINE_WIDTH: usize = 80;

/// `HH:MM:SS,mmm`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrtTime(pub u64);

impl fmt::Display for SrtTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (secs, ms) = (self.0 / 1000, self.0 % 1000);
        let (mins, secs) = (secs / 60, secs % 60);
        let (hours, mins) = (mins / 60, mins % 60);
        write!(f, "{hours:02}:{mins:02}:{secs:02},{ms:03}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtCue {
    /// 1-based.
    pub index: usize,
    pub start: SrtTime,
    pub end: SrtTime,
    pub lines: Vec<String>,
}

impl fmt::Display for SrtCue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.index)?;
        writeln!(f, "{} --> {}", self.start, self.end)?;
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        writeln!(f)
    }
}

/// Cues in timeline order. A timeline entry whose turn is unknown gets no cue.
pub fn cues(turns: &[Turn], timeline: &[TimelineEntry]) -> Vec<SrtCue> {
    let text_by_id: HashMap<u32, &str> = turns.iter().map(|t| (t.id, t.text.as_str())).collect();
    timeline
        .iter()
        .filter_map(|entry| Some((entry, *text_by_id.get(&entry.id)?)))
        .enumerate()
        .map(|(i, (entry, text))| SrtCue {
            index: i + 1,
            start: SrtTime(entry.start_time_ms),
            end: SrtTime(entry.end_time_ms),
            lines: break_lines(text, LINE_WIDTH),
        })
        .collect()
}

pub fn write_srt(path: &Path, cues: &[SrtCue]) -> Result<()> {
    let body: String = cues.iter().map(SrtCue::to_string).collect();
    fs::write(path, body)?;
    Ok(())
}

/// Greedy break on whitespace, measured in chars. A word longer than `width`
/// gets a line to itself.
fn break_lines(text: &str, width: usize) -> Vec<String> {
    text.split_whitespace().fold(Vec::new(), |mut lines: Vec<String>, word| {
        match lines.last_mut() {
            Some(line) if line.chars().count() + 1 + word.chars().count() <= width => {
                line.push(' ');
                line.push_str(word);
            }
            _ => lines.push(word.to_string()),
        }
        lines
    })
}

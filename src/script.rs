use crate::error::{PipelineError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

/// Label given to turns outside every declared chapter range.
pub const UNASSIGNED_CHAPTER: &str = "unassigned";

/// Chapter names that take the chapter gap at a boundary.
pub const KNOWN_CHAPTERS: [&str; 3] = ["opening", "theme", "closing"];

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

pub fn is_known_chapter(name: &str) -> bool {
    KNOWN_CHAPTERS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "진행자", alias = "host")]
    Host,
    #[serde(rename = "해설자", alias = "analyst")]
    Analyst,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterRange {
    pub name: String,
    pub start_id: u32,
    pub end_id: u32,
}

impl ChapterRange {
    pub fn contains(&self, id: u32) -> bool {
        self.start_id <= id && id <= self.end_id
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    pub id: u32,
    pub speaker: Speaker,
    pub chapter: String,
    pub text: String,
}

/// Parsed script. `raw` keeps the untouched document for the timed snapshot.
#[derive(Debug, Clone)]
pub struct ScriptDocument {
    pub path: PathBuf,
    pub raw: Value,
    pub turns: Vec<Turn>,
    pub chapters: Vec<ChapterRange>,
}

impl ScriptDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path).map_err(|e| PipelineError::Script {
            path: path.to_path_buf(),
            message: format!("cannot read: {e}"),
        })?;
        let raw: Value = serde_json::from_str(&data).map_err(|e| PipelineError::Script {
            path: path.to_path_buf(),
            message: format!("invalid JSON: {e}"),
        })?;
        Self::from_value(path, raw)
    }

    pub fn from_value(path: &Path, raw: Value) -> Result<Self> {
        let invalid = |message: String| PipelineError::Script {
            path: path.to_path_buf(),
            message,
        };

        let chapters = parse_chapters(&raw).map_err(invalid)?;
        let entries = raw
            .get("scripts")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("missing 'scripts' array".to_string()))?;

        let mut seen = HashSet::new();
        let mut turns = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            let turn = parse_turn(entry, &chapters)
                .map_err(|m| invalid(format!("scripts[{index}]: {m}")))?;
            if !seen.insert(turn.id) {
                return Err(invalid(format!("duplicate turn id {}", turn.id)));
            }
            turns.push(turn);
        }
        turns.sort_by_key(|t| t.id);

        info!(
            "Loaded {} turns and {} chapter ranges from {}",
            turns.len(),
            chapters.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            raw,
            turns,
            chapters,
        })
    }
}

/// First declared range containing `id` wins.
pub fn chapter_for(id: u32, chapters: &[ChapterRange]) -> String {
    chapters
        .iter()
        .find(|c| c.contains(id))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| UNASSIGNED_CHAPTER.to_string())
}

/// Collapse all whitespace runs (newlines included) to single spaces.
pub fn one_line(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Accepts a JSON integer or a string of decimal digits.
pub fn parse_id(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok()
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_turn(entry: &Value, chapters: &[ChapterRange]) -> std::result::Result<Turn, String> {
    let id = entry
        .get("id")
        .and_then(parse_id)
        .ok_or_else(|| format!("missing or non-integer id: {}", entry.get("id").unwrap_or(&Value::Null)))?;
    let speaker_raw = entry.get("speaker").cloned().unwrap_or(Value::Null);
    let speaker: Speaker = serde_json::from_value(speaker_raw.clone())
        .map_err(|_| format!("turn {id}: unsupported speaker {speaker_raw}"))?;
    let text = entry
        .get("text")
        .and_then(Value::as_str)
        .map(one_line)
        .unwrap_or_default();
    if text.is_empty() {
        return Err(format!("turn {id}: text is empty"));
    }
    let chapter = chapter_for(id, chapters);
    debug!("Turn {} mapped to chapter '{}'", id, chapter);
    Ok(Turn {
        id,
        speaker,
        chapter,
        text,
    })
}

fn parse_chapters(raw: &Value) -> std::result::Result<Vec<ChapterRange>, String> {
    let Some(items) = raw.get("chapter") else {
        return Ok(Vec::new());
    };
    if items.is_null() {
        return Ok(Vec::new());
    }
    let items = items
        .as_array()
        .ok_or_else(|| "'chapter' must be an array".to_string())?;

    let mut out = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("chapter[{index}]: missing name"))?;
        let start_id = item
            .get("start_id")
            .and_then(parse_id)
            .ok_or_else(|| format!("chapter[{index}] '{name}': invalid start_id"))?;
        let end_id = item
            .get("end_id")
            .and_then(parse_id)
            .ok_or_else(|| format!("chapter[{index}] '{name}': invalid end_id"))?;
        if end_id < start_id {
            return Err(format!(
                "chapter[{index}] '{name}': end_id {end_id} < start_id {start_id}"
            ));
        }
        out.push(ChapterRange {
            name: name.to_string(),
            start_id,
            end_id,
        });
    }
    Ok(out)
}

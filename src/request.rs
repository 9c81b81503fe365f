use crate::config::{Channel, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::script::{Speaker, Turn, one_line};

#[derive(Debug, Clone, PartialEq)]
pub struct TurnSynthesisRequest {
    pub id: u32,
    pub speaker: Speaker,
    pub channel: Channel,
    pub chapter: String,
    pub prompt: String,
}

/// `instruction`, a blank line, then `<channel>: <text>`.
pub fn render_prompt(instruction: &str, channel: Channel, text: &str) -> String {
    format!("{}\n\n{}: {}", instruction.trim(), channel, one_line(text))
}

pub fn build_requests(turns: &[Turn], config: &PipelineConfig) -> Result<Vec<TurnSynthesisRequest>> {
    for channel in Channel::ALL {
        if config.channels.get(channel).instruction.trim().is_empty() {
            return Err(PipelineError::config(
                format!("channels.{channel}.instruction"),
                "must not be empty",
            ));
        }
    }

    let requests = turns
        .iter()
        .map(|turn| {
            let channel = config.speakers.channel_for(turn.speaker);
            TurnSynthesisRequest {
                id: turn.id,
                speaker: turn.speaker,
                channel,
                chapter: turn.chapter.clone(),
                prompt: render_prompt(&config.channels.get(channel).instruction, channel, &turn.text),
            }
        })
        .collect();
    Ok(requests)
}

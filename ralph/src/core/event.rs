//! Agent event stream decoding.
//!
//! The agent writes newline-delimited JSON objects to stdout. Each object has a
//! `type` discriminator; only `assistant` text parts and the terminal `result`
//! matter to the loop. Everything else is carried through to the run log
//! untouched.

use serde::Deserialize;

/// A decoded event relevant to the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// Incremental assistant text.
    Text(String),
    /// Terminal result text of the invocation.
    Result(String),
}

/// Classification of one raw stdout line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLine {
    /// Not a JSON object line (banner text, progress noise). Never logged.
    Ignored,
    /// Looked like a JSON object but did not decode.
    Malformed(String),
    /// Valid object with a type the loop does not act on.
    Other,
    /// Decoded events, in the order they appear in the object.
    Events(Vec<AgentEvent>),
}

impl StreamLine {
    /// Whether the raw line belongs in the run log.
    pub fn is_recorded(&self) -> bool {
        !matches!(self, StreamLine::Ignored)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireObject {
    Assistant {
        #[serde(default)]
        message: WireMessage,
    },
    Result {
        #[serde(default)]
        result: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Vec<WirePart>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WirePart {
    Text {
        #[serde(default)]
        text: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Classify a single line of agent stdout.
pub fn classify_line(line: &str) -> StreamLine {
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.starts_with('{') {
        return StreamLine::Ignored;
    }

    let object: WireObject = match serde_json::from_str(line) {
        Ok(object) => object,
        Err(err) => return StreamLine::Malformed(err.to_string()),
    };

    match object {
        WireObject::Assistant { message } => StreamLine::Events(
            message
                .content
                .into_iter()
                .filter_map(|part| match part {
                    WirePart::Text { text } => text.map(AgentEvent::Text),
                    WirePart::Other => None,
                })
                .collect(),
        ),
        WireObject::Result { result } => {
            StreamLine::Events(vec![AgentEvent::Result(result.unwrap_or_default())])
        }
        WireObject::Other => StreamLine::Other,
    }
}

/// Normalize an assistant text chunk for live terminal output.
///
/// Bare newlines become `\r\n` and every chunk ends with a blank line, so
/// consecutive chunks stay visually separated in raw terminal modes.
pub fn render_text_chunk(text: &str) -> String {
    let mut rendered = text.replace('\n', "\r\n");
    rendered.push_str("\r\n\n");
    rendered
}

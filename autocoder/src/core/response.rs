//! Response parser: one model reply in, an ordered command list out.
//!
//! Block format wins whenever a block start marker is present, so a broken
//! block response surfaces its own error instead of a misleading JSON one.
//! Otherwise the reply is decoded as a JSON command array.

use std::collections::BTreeMap;

use jsonschema::validator_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::block::{has_block, parse_blocks};
use crate::core::command::{Command, CommandFields, LineMap};
use crate::error::{Error, Result};

const COMMANDS_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/commands/v1.schema.json"
));

const FENCE: &str = "```";

/// Command grammar: the one a reply was decoded from, or the one a prompt asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    #[default]
    Blocks,
    Json,
}

/// Parse a model reply into commands. All-or-nothing: any error rejects the reply.
#[instrument(skip_all, fields(response_bytes = text.len()))]
pub fn parse_response(text: &str) -> Result<Vec<Command>> {
    debug!(response = %text, "raw model response");
    let (format, commands) = if has_block(text) {
        (WireFormat::Blocks, parse_blocks(text)?)
    } else {
        (WireFormat::Json, parse_json(text)?)
    };
    if commands.is_empty() {
        return Err(Error::ParseFailure("no commands found".to_string()));
    }
    info!(count = commands.len(), format = ?format, "parsed commands");
    Ok(commands)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireCommand {
    #[serde(rename = "Type")]
    kind: String,
    path: Option<String>,
    content: Option<String>,
    lines: Option<BTreeMap<String, String>>,
    src_path: Option<String>,
    dst_path: Option<String>,
}

impl WireCommand {
    fn into_command(self, index: usize) -> Result<Command> {
        let origin = format!("element {index}");
        let mut lines = LineMap::new();
        for (key, text) in self.lines.unwrap_or_default() {
            let line: i64 = key.trim().parse().map_err(|_| {
                Error::InvalidCommand(format!("{origin}: line key '{key}' is not an integer"))
            })?;
            lines.insert(line, text);
        }
        Command::from_fields(
            CommandFields {
                kind: Some(self.kind),
                path: self.path.unwrap_or_default(),
                content: self.content.unwrap_or_default(),
                lines,
                src_path: self.src_path.unwrap_or_default(),
                dst_path: self.dst_path.unwrap_or_default(),
            },
            &origin,
        )
    }
}

fn parse_json(text: &str) -> Result<Vec<Command>> {
    let payload = strip_fence(text.trim());
    if payload.is_empty() {
        return Err(Error::ParseFailure("no commands found".to_string()));
    }
    let value: Value = serde_json::from_str(payload).map_err(|err| {
        Error::ParseFailure(format!(
            "response is neither command blocks nor a JSON command array: {err}"
        ))
    })?;
    validate_schema(&value)?;
    let wire: Vec<WireCommand> = serde_json::from_value(value)
        .map_err(|err| Error::ParseFailure(format!("decode command array: {err}")))?;
    wire.into_iter()
        .enumerate()
        .map(|(idx, cmd)| cmd.into_command(idx + 1))
        .collect()
}

fn validate_schema(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(COMMANDS_SCHEMA)
        .map_err(|err| Error::ParseFailure(format!("embedded command schema: {err}")))?;
    let validator = validator_for(&schema)
        .map_err(|err| Error::ParseFailure(format!("invalid command schema: {err}")))?;
    let messages: Vec<String> = validator
        .iter_errors(value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(Error::ParseFailure(format!(
            "command array schema validation failed: {}",
            messages.join("; ")
        )));
    }
    Ok(())
}

/// Drop one surrounding fenced-code wrapper (```` ```json ... ``` ````) if present.
fn strip_fence(text: &str) -> &str {
    let first_break = text.find('\n');
    let last_break = text.rfind('\n');
    let (Some(first), Some(last)) = (first_break, last_break) else {
        return text;
    };
    let opens = text[..first].trim_start().starts_with(FENCE);
    let closes = text[last + 1..].trim() == FENCE;
    if !opens || !closes {
        return text;
    }
    if first >= last {
        return "";
    }
    text[first + 1..last].trim()
}

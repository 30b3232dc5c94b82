//! Command model: the vocabulary of filesystem mutations a model may request.
//!
//! Commands are built only by the response parser, after field validation.
//! Fields are private; the executor reads them through accessors and
//! re-checks every precondition against the live filesystem.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// Line number (1-based) to text. Signed so out-of-range keys such as `0`
/// survive parsing and are reported by the executor.
pub type LineMap = BTreeMap<i64, String>;

/// Command variant, keyed by the human-readable label used on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Create,
    Delete,
    Edit,
    AddLines,
    DeleteLines,
    Copy,
    Move,
    Read,
    Compile,
    /// Label outside the fixed table, kept verbatim for the executor to reject.
    Unknown(String),
}

/// Fixed label table (case-sensitive, exact match).
pub const KIND_LABELS: [(&str, CommandKind); 9] = [
    ("create", CommandKind::Create),
    ("delete", CommandKind::Delete),
    ("edit", CommandKind::Edit),
    ("add-lines", CommandKind::AddLines),
    ("delete-lines", CommandKind::DeleteLines),
    ("copy", CommandKind::Copy),
    ("move", CommandKind::Move),
    ("read", CommandKind::Read),
    ("compile", CommandKind::Compile),
];

impl CommandKind {
    pub fn from_label(label: &str) -> Self {
        KIND_LABELS
            .iter()
            .find(|(known, _)| *known == label)
            .map(|(_, kind)| kind.clone())
            .unwrap_or_else(|| CommandKind::Unknown(label.to_string()))
    }

    pub fn label(&self) -> &str {
        match self {
            CommandKind::Create => "create",
            CommandKind::Delete => "delete",
            CommandKind::Edit => "edit",
            CommandKind::AddLines => "add-lines",
            CommandKind::DeleteLines => "delete-lines",
            CommandKind::Copy => "copy",
            CommandKind::Move => "move",
            CommandKind::Read => "read",
            CommandKind::Compile => "compile",
            CommandKind::Unknown(label) => label,
        }
    }

    fn needs_path(&self) -> bool {
        matches!(
            self,
            CommandKind::Create
                | CommandKind::Delete
                | CommandKind::Edit
                | CommandKind::AddLines
                | CommandKind::DeleteLines
                | CommandKind::Read
                | CommandKind::Compile
        )
    }

    fn needs_src_dst(&self) -> bool {
        matches!(self, CommandKind::Copy | CommandKind::Move)
    }
}

impl Serialize for CommandKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw field set gathered by either wire format before validation.
#[derive(Debug, Clone, Default)]
pub(crate) struct CommandFields {
    pub kind: Option<String>,
    pub path: String,
    pub content: String,
    pub lines: LineMap,
    pub src_path: String,
    pub dst_path: String,
}

/// One validated filesystem mutation instruction.
///
/// Serializes to the JSON wire shape; empty fields are omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Command {
    #[serde(rename = "Type")]
    kind: CommandKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    content: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    lines: LineMap,
    #[serde(skip_serializing_if = "String::is_empty")]
    src_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    dst_path: String,
}

impl Command {
    /// Validate a raw field set. `origin` names the block/element for error messages.
    pub(crate) fn from_fields(fields: CommandFields, origin: &str) -> Result<Self> {
        let label = fields
            .kind
            .map(|kind| kind.trim().to_string())
            .filter(|kind| !kind.is_empty())
            .ok_or_else(|| Error::ParseFailure(format!("{origin}: missing 'type' field")))?;
        let kind = CommandKind::from_label(&label);

        if kind.needs_path() && fields.path.trim().is_empty() {
            return Err(Error::InvalidCommand(format!(
                "{origin}: '{kind}' requires a path"
            )));
        }
        if kind.needs_src_dst()
            && (fields.src_path.trim().is_empty() || fields.dst_path.trim().is_empty())
        {
            return Err(Error::InvalidCommand(format!(
                "{origin}: '{kind}' requires both source and destination paths"
            )));
        }

        Ok(Self {
            kind,
            path: fields.path.trim().to_string(),
            content: fields.content,
            lines: fields.lines,
            src_path: fields.src_path.trim().to_string(),
            dst_path: fields.dst_path.trim().to_string(),
        })
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn lines(&self) -> &LineMap {
        &self.lines
    }

    pub fn src_path(&self) -> &str {
        &self.src_path
    }

    pub fn dst_path(&self) -> &str {
        &self.dst_path
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            CommandKind::Copy | CommandKind::Move => {
                write!(f, "{} {} -> {}", self.kind, self.src_path, self.dst_path)
            }
            CommandKind::Create => write!(
                f,
                "{} {} ({} bytes)",
                self.kind,
                self.path,
                self.content.len()
            ),
            CommandKind::Edit | CommandKind::AddLines | CommandKind::DeleteLines => {
                let keys: Vec<String> = self.lines.keys().map(i64::to_string).collect();
                write!(f, "{} {} [{}]", self.kind, self.path, keys.join(", "))
            }
            _ => write!(f, "{} {}", self.kind, self.path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(kind: &str) -> CommandFields {
        CommandFields {
            kind: Some(kind.to_string()),
            ..CommandFields::default()
        }
    }

    #[test]
    fn labels_map_exactly_and_case_sensitively() {
        for (label, kind) in &KIND_LABELS {
            assert_eq!(&CommandKind::from_label(label), kind);
            assert_eq!(kind.label(), *label);
        }
        assert_eq!(
            CommandKind::from_label("Create"),
            CommandKind::Unknown("Create".to_string())
        );
        assert_eq!(
            CommandKind::from_label("rename"),
            CommandKind::Unknown("rename".to_string())
        );
    }

    #[test]
    fn missing_type_is_a_parse_failure() {
        let err = Command::from_fields(CommandFields::default(), "block 1").unwrap_err();
        assert!(matches!(err, Error::ParseFailure(ref msg) if msg.contains("block 1")));
    }

    #[test]
    fn path_fields_are_required_for_known_kinds() {
        let err = Command::from_fields(fields("delete"), "block 2").unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));

        let mut copy = fields("copy");
        copy.src_path = "a.go".to_string();
        let err = Command::from_fields(copy, "block 3").unwrap_err();
        assert!(matches!(err, Error::InvalidCommand(_)));
    }

    #[test]
    fn unknown_kinds_skip_field_validation() {
        let cmd = Command::from_fields(fields("rename"), "block 1").expect("command");
        assert_eq!(cmd.kind(), &CommandKind::Unknown("rename".to_string()));
    }

    #[test]
    fn serializes_to_the_json_wire_shape() {
        let mut edit = fields("edit");
        edit.path = "main.go".to_string();
        edit.lines = LineMap::from([(2, "x".to_string())]);
        let cmd = Command::from_fields(edit, "block 1").expect("command");
        let json = serde_json::to_string(&cmd).expect("json");
        assert_eq!(json, r#"{"Type":"edit","Path":"main.go","Lines":{"2":"x"}}"#);
    }

    #[test]
    fn display_summarizes_the_operation() {
        let mut edit = fields("edit");
        edit.path = "main.go".to_string();
        edit.lines = LineMap::from([(3, "x".to_string()), (1, "y".to_string())]);
        let cmd = Command::from_fields(edit, "block 1").expect("command");
        assert_eq!(cmd.to_string(), "edit main.go [1, 3]");
    }
}

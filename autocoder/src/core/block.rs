//! Delimited block grammar for model responses.
//!
//! ```text
//! Begin command:
//! type: edit
//! path: task_1/main.go
//! lines: {3: "	return a + b", 7: "}"}
//! End command.
//! ```
//!
//! The tokenizer is an explicit state machine (outside a block, in the block
//! header, capturing `content:`, capturing a `lines:` map). Malformed
//! structure fails the whole response; nothing is partially returned.

use crate::core::command::{Command, CommandFields, LineMap};
use crate::error::{Error, Result};

pub const BLOCK_START: &str = "Begin command:";
pub const BLOCK_END: &str = "End command.";

pub const FIELD_TYPE: &str = "type";
pub const FIELD_PATH: &str = "path";
pub const FIELD_SRC_PATH: &str = "src-path";
pub const FIELD_DST_PATH: &str = "dst-path";
pub const FIELD_CONTENT: &str = "content";
pub const FIELD_LINES: &str = "lines";

const QUOTES: [char; 3] = ['"', '\'', '`'];

/// True if any line of `text` opens a block.
pub fn has_block(text: &str) -> bool {
    text.lines().any(|line| line.trim().starts_with(BLOCK_START))
}

enum State {
    Outside,
    Header,
    Content,
    Lines,
}

struct OpenBlock {
    ordinal: usize,
    start_line: usize,
    fields: CommandFields,
    content: Vec<String>,
    lines_raw: String,
}

impl OpenBlock {
    fn origin(&self) -> String {
        format!("block {} (line {})", self.ordinal, self.start_line)
    }

    fn finish_content(&mut self) {
        self.fields.content = self.content.join("\n").trim().to_string();
        self.content.clear();
    }

    fn finish_lines(&mut self) -> Result<()> {
        let origin = self.origin();
        self.fields.lines = parse_line_map(&self.lines_raw, &origin)?;
        self.lines_raw.clear();
        Ok(())
    }
}

/// Parse every block in `text`, in order.
pub fn parse_blocks(text: &str) -> Result<Vec<Command>> {
    let mut commands = Vec::new();
    let mut state = State::Outside;
    let mut block: Option<OpenBlock> = None;
    let mut ordinal = 0usize;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();

        state = match state {
            State::Outside => {
                if trimmed.starts_with(BLOCK_START) {
                    ordinal += 1;
                    block = Some(OpenBlock {
                        ordinal,
                        start_line: line_no,
                        fields: CommandFields::default(),
                        content: Vec::new(),
                        lines_raw: String::new(),
                    });
                    State::Header
                } else if trimmed.starts_with(BLOCK_END) {
                    return Err(Error::ParseFailure(format!(
                        "line {line_no}: '{BLOCK_END}' without a matching '{BLOCK_START}'"
                    )));
                } else {
                    State::Outside
                }
            }
            State::Header => {
                if trimmed.starts_with(BLOCK_END) {
                    commands.push(close(&mut block)?);
                    State::Outside
                } else {
                    let open = current(&mut block, line_no)?;
                    if trimmed.starts_with(BLOCK_START) {
                        return Err(Error::ParseFailure(format!(
                            "line {line_no}: '{BLOCK_START}' inside {}",
                            open.origin()
                        )));
                    }
                    header_line(open, trimmed)?
                }
            }
            State::Content => {
                let open = current(&mut block, line_no)?;
                if trimmed.starts_with(BLOCK_END) {
                    open.finish_content();
                    commands.push(close(&mut block)?);
                    State::Outside
                } else if trimmed.is_empty() {
                    open.finish_content();
                    State::Header
                } else {
                    open.content.push(raw.to_string());
                    State::Content
                }
            }
            State::Lines => {
                let open = current(&mut block, line_no)?;
                if trimmed.starts_with(BLOCK_END) {
                    return Err(Error::InvalidCommand(format!(
                        "{}: 'lines' map is not closed before '{BLOCK_END}'",
                        open.origin()
                    )));
                }
                open.lines_raw.push('\n');
                open.lines_raw.push_str(raw);
                if map_closed(&open.lines_raw) {
                    open.finish_lines()?;
                    State::Header
                } else {
                    State::Lines
                }
            }
        };
    }

    if let Some(open) = block {
        return Err(Error::ParseFailure(format!(
            "{} is never closed with '{BLOCK_END}'",
            open.origin()
        )));
    }
    Ok(commands)
}

fn current(block: &mut Option<OpenBlock>, line_no: usize) -> Result<&mut OpenBlock> {
    block
        .as_mut()
        .ok_or_else(|| Error::ParseFailure(format!("line {line_no}: no open block")))
}

fn close(block: &mut Option<OpenBlock>) -> Result<Command> {
    let open = block
        .take()
        .ok_or_else(|| Error::ParseFailure("no open block to close".to_string()))?;
    let origin = open.origin();
    Command::from_fields(open.fields, &origin)
}

fn header_line(open: &mut OpenBlock, trimmed: &str) -> Result<State> {
    let Some((key, value)) = trimmed.split_once(':') else {
        return Ok(State::Header);
    };
    let value = value.trim();
    match key.trim() {
        FIELD_TYPE => open.fields.kind = Some(value.to_string()),
        FIELD_PATH => open.fields.path = value.to_string(),
        FIELD_SRC_PATH => open.fields.src_path = value.to_string(),
        FIELD_DST_PATH => open.fields.dst_path = value.to_string(),
        FIELD_CONTENT => {
            open.content.clear();
            if !value.is_empty() {
                open.content.push(value.to_string());
            }
            return Ok(State::Content);
        }
        FIELD_LINES => {
            open.lines_raw = value.to_string();
            if map_closed(&open.lines_raw) {
                open.finish_lines()?;
                return Ok(State::Header);
            }
            return Ok(State::Lines);
        }
        _ => {}
    }
    Ok(State::Header)
}

/// Scanner over a `lines:` payload that tracks quoting and bracket depth.
///
/// A quote char opens a quoted value only at the start of a key or value
/// (after `{`, `,` or `:`), so apostrophes inside bare text stay literal.
struct Scanner {
    quote: Option<char>,
    escaped: bool,
    depth: i32,
    value_start: bool,
}

impl Scanner {
    fn new() -> Self {
        Self {
            quote: None,
            escaped: false,
            depth: 0,
            value_start: true,
        }
    }

    /// Feed one char; returns true if it is structural (outside quotes).
    fn step(&mut self, ch: char) -> bool {
        if let Some(open) = self.quote {
            if self.escaped {
                self.escaped = false;
            } else if ch == '\\' {
                self.escaped = true;
            } else if ch == open {
                self.quote = None;
                self.value_start = false;
            }
            return false;
        }
        if self.value_start && QUOTES.contains(&ch) {
            self.quote = Some(ch);
            return false;
        }
        match ch {
            '{' | '[' | '(' => self.depth += 1,
            '}' | ']' | ')' => self.depth -= 1,
            _ => {}
        }
        if matches!(ch, '{' | ',' | ':') {
            self.value_start = true;
        } else if !ch.is_whitespace() {
            self.value_start = false;
        }
        true
    }
}

/// Byte range of the text between the first `{` and its matching `}`.
fn map_bounds(raw: &str) -> Option<(usize, usize)> {
    let open = raw.find('{')?;
    let mut scanner = Scanner::new();
    for (offset, ch) in raw[open..].char_indices() {
        if scanner.step(ch) && ch == '}' && scanner.depth == 0 {
            return Some((open + 1, open + offset));
        }
    }
    None
}

fn map_closed(raw: &str) -> bool {
    map_bounds(raw).is_some()
}

/// Parse a `{1: "text", 2: 'more'}` payload into a line map.
pub fn parse_line_map(raw: &str, origin: &str) -> Result<LineMap> {
    let (start, end) = map_bounds(raw).ok_or_else(|| {
        Error::InvalidCommand(format!("{origin}: 'lines' needs a {{...}} map"))
    })?;
    let mut map = LineMap::new();
    for fragment in split_top_level(&raw[start..end]) {
        let fragment = fragment.trim();
        if fragment.is_empty() {
            continue;
        }
        let (key, value) = fragment.split_once(':').unwrap_or((fragment, ""));
        let key = key.trim();
        let line: i64 = key.parse().map_err(|_| {
            Error::InvalidCommand(format!("{origin}: line key '{key}' is not an integer"))
        })?;
        map.insert(line, unquote(value.trim()));
    }
    Ok(map)
}

fn split_top_level(payload: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut scanner = Scanner::new();
    let mut last = 0;
    for (idx, ch) in payload.char_indices() {
        if scanner.step(ch) && ch == ',' && scanner.depth == 0 {
            parts.push(&payload[last..idx]);
            last = idx + 1;
        }
    }
    parts.push(&payload[last..]);
    parts
}

/// Strip matching outer quotes and decode `\<quote>` and `\\`.
///
/// Other backslash sequences such as `\n` are kept verbatim: they belong to
/// the source text being written. Bare values are returned as is.
fn unquote(value: &str) -> String {
    let mut chars = value.chars();
    let quote = match (chars.next(), chars.next_back()) {
        (Some(first), Some(last)) if first == last && QUOTES.contains(&first) => first,
        _ => return value.to_string(),
    };
    let inner = &value[quote.len_utf8()..value.len() - quote.len_utf8()];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\'
            && let Some(&next) = chars.peek()
            && (next == quote || next == '\\')
        {
            out.push(next);
            chars.next();
            continue;
        }
        out.push(ch);
    }
    out
}

//! Prompt builder for model requests.
//!
//! The system prompt is rendered from the parser's own marker, field and
//! label constants, so the grammar the model is taught and the grammar the
//! parser accepts cannot drift apart.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use tracing::debug;

use crate::core::block::{
    BLOCK_END, BLOCK_START, FIELD_CONTENT, FIELD_DST_PATH, FIELD_LINES, FIELD_PATH,
    FIELD_SRC_PATH, FIELD_TYPE,
};
use crate::core::command::CommandKind;
use crate::core::response::WireFormat;
use crate::core::task::Task;
use crate::io::config::PromptConfig;

const SYSTEM_BLOCKS_TEMPLATE: &str = include_str!("prompts/system_blocks.md");
const SYSTEM_JSON_TEMPLATE: &str = include_str!("prompts/system_json.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const COMPILE_FIX_TEMPLATE: &str = include_str!("prompts/compile_fix.md");
const TESTS_TEMPLATE: &str = include_str!("prompts/tests.md");

/// Command types offered to the model. `compile` is left out: compiling is
/// driven by the orchestrator.
const COMMAND_HELP: [(CommandKind, &str); 8] = [
    (CommandKind::Create, "create a new file with the given content"),
    (CommandKind::Delete, "delete an existing file"),
    (CommandKind::Edit, "replace existing lines of a file"),
    (
        CommandKind::AddLines,
        "append lines; numbering continues right after the last line",
    ),
    (CommandKind::DeleteLines, "remove the listed lines"),
    (CommandKind::Copy, "copy a file to a new path"),
    (CommandKind::Move, "move a file to a new path"),
    (
        CommandKind::Read,
        "show a file's content in the next fix request",
    ),
];

#[derive(Debug, Serialize)]
struct CommandHelp {
    label: String,
    help: &'static str,
}

/// File content returned by a `read` command, echoed into the next fix prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadResult {
    pub path: String,
    pub content: String,
}

/// Directory a task's files are expected under, by convention.
pub fn task_dir(num: u32) -> String {
    format!("task_{num}/")
}

/// Renders every prompt the orchestrator sends.
pub struct PromptBuilder {
    env: Environment<'static>,
    language: String,
    wire_format: WireFormat,
}

impl PromptBuilder {
    pub fn new(config: &PromptConfig) -> Result<Self> {
        let mut env = Environment::new();
        for (name, source) in [
            ("system_blocks", SYSTEM_BLOCKS_TEMPLATE),
            ("system_json", SYSTEM_JSON_TEMPLATE),
            ("task", TASK_TEMPLATE),
            ("compile_fix", COMPILE_FIX_TEMPLATE),
            ("tests", TESTS_TEMPLATE),
        ] {
            env.add_template(name, source)
                .with_context(|| format!("load prompt template {name}"))?;
        }
        Ok(Self {
            env,
            language: config.language.clone(),
            wire_format: config.wire_format,
        })
    }

    /// System prompt fixing the reply grammar.
    pub fn system(&self) -> Result<String> {
        let name = match self.wire_format {
            WireFormat::Blocks => "system_blocks",
            WireFormat::Json => "system_json",
        };
        let commands: Vec<CommandHelp> = COMMAND_HELP
            .iter()
            .map(|(kind, help)| CommandHelp {
                label: kind.label().to_string(),
                help,
            })
            .collect();
        self.render(
            name,
            context! {
                language => self.language,
                commands => commands,
                block_start => BLOCK_START,
                block_end => BLOCK_END,
                field_type => FIELD_TYPE,
                field_path => FIELD_PATH,
                field_src_path => FIELD_SRC_PATH,
                field_dst_path => FIELD_DST_PATH,
                field_content => FIELD_CONTENT,
                field_lines => FIELD_LINES,
                create => CommandKind::Create.label(),
                edit => CommandKind::Edit.label(),
                delete_lines => CommandKind::DeleteLines.label(),
            },
        )
    }

    /// Initial request to solve `task`.
    pub fn task(&self, task: &Task) -> Result<String> {
        self.render(
            "task",
            context! {
                task => task,
                task_dir => task_dir(task.num),
            },
        )
    }

    /// Follow-up request carrying a failed compile log and any `read` results.
    pub fn compile_fix(&self, path: &str, log: &str, reads: &[ReadResult]) -> Result<String> {
        self.render(
            "compile_fix",
            context! {
                path => path,
                log => log.trim(),
                reads => reads,
            },
        )
    }

    /// Request for tests covering an already solved `task`.
    pub fn tests(&self, task: &Task) -> Result<String> {
        self.render(
            "tests",
            context! {
                task => task,
                language => self.language,
                task_dir => task_dir(task.num),
                test_stem => test_stem(&task.func_signature),
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self
            .env
            .get_template(name)?
            .render(ctx)
            .with_context(|| format!("render prompt {name}"))?;
        debug!(template = name, bytes = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

/// Lowercased function name from a signature such as `func Greet(name string) string`.
fn test_stem(signature: &str) -> Option<String> {
    let mut rest = signature.trim();
    if let Some(stripped) = rest.strip_prefix("func") {
        rest = stripped.trim_start();
        if rest.starts_with('(') {
            rest = rest.split_once(')')?.1.trim_start();
        }
    }
    let head = rest.split('(').next()?;
    let name: String = head
        .split_whitespace()
        .last()?
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then(|| name.to_lowercase())
}

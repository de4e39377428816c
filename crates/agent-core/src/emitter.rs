//! Script artifact accumulation.
//!
//! Every validated action contributes one statement; the result is a
//! runnable Playwright test that replays the successful path. The file
//! emitter streams to disk as the run progresses so a crashed run still
//! leaves a usable prefix; the memory emitter backs hosted (in-process) use.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::errors::AgentError;
use double_check::escape_literal;

/// Common contract for script sinks.
pub trait ScriptEmitter: Send {
    /// Open the scaffold for a run with the given goal.
    fn init(&mut self, goal: &str) -> Result<(), AgentError>;
    /// Append one validated statement, optionally prefaced by the planner's
    /// reasoning as a comment.
    fn append_code(&mut self, code: &str, thought: Option<&str>) -> Result<(), AgentError>;
    /// Close the scaffold.
    fn finish(&mut self) -> Result<(), AgentError>;
    /// The artifact: a file path (file mode) or the script text (memory mode).
    fn output(&self) -> String;
}

fn scaffold_header(goal: &str) -> String {
    format!(
        "// Generated by flash-loop on {}\n\
         import {{ test, expect }} from '@playwright/test';\n\n\
         test('{}', async ({{ page, context }}) => {{\n",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        escape_literal(goal)
    )
}

fn format_statement(code: &str, thought: Option<&str>) -> String {
    let mut block = String::new();
    if let Some(thought) = thought.filter(|t| !t.trim().is_empty()) {
        for line in thought.trim().lines() {
            block.push_str("  // ");
            block.push_str(line.trim());
            block.push('\n');
        }
    }
    for line in code.trim().lines() {
        block.push_str("  ");
        block.push_str(line.trim_end());
        block.push('\n');
    }
    block
}

const SCAFFOLD_FOOTER: &str = "});\n";

/// Streams the script into a timestamped `.spec.ts` file.
pub struct FileEmitter {
    path: PathBuf,
    initialized: bool,
}

impl FileEmitter {
    /// Place the artifact in `dir`, named after the start time.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        let name = format!("flash-loop-{}.spec.ts", Local::now().format("%Y%m%d-%H%M%S"));
        Self {
            path: dir.as_ref().join(name),
            initialized: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, chunk: &str) -> Result<(), AgentError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|err| AgentError::System(format!("cannot open script file: {err}")))?;
        file.write_all(chunk.as_bytes())
            .map_err(|err| AgentError::System(format!("cannot write script file: {err}")))
    }
}

impl ScriptEmitter for FileEmitter {
    fn init(&mut self, goal: &str) -> Result<(), AgentError> {
        self.append(&scaffold_header(goal))?;
        self.initialized = true;
        Ok(())
    }

    fn append_code(&mut self, code: &str, thought: Option<&str>) -> Result<(), AgentError> {
        if !self.initialized {
            return Err(AgentError::System("emitter used before init".to_string()));
        }
        self.append(&format_statement(code, thought))
    }

    fn finish(&mut self) -> Result<(), AgentError> {
        if self.initialized {
            self.append(SCAFFOLD_FOOTER)?;
        }
        Ok(())
    }

    fn output(&self) -> String {
        self.path.display().to_string()
    }
}

/// Accumulates the script in memory; used when a host process embeds the
/// agent.
#[derive(Default)]
pub struct MemoryEmitter {
    script: String,
    initialized: bool,
}

impl MemoryEmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScriptEmitter for MemoryEmitter {
    fn init(&mut self, goal: &str) -> Result<(), AgentError> {
        self.script.push_str(&scaffold_header(goal));
        self.initialized = true;
        Ok(())
    }

    fn append_code(&mut self, code: &str, thought: Option<&str>) -> Result<(), AgentError> {
        if !self.initialized {
            return Err(AgentError::System("emitter used before init".to_string()));
        }
        self.script.push_str(&format_statement(code, thought));
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AgentError> {
        if self.initialized {
            self.script.push_str(SCAFFOLD_FOOTER);
        }
        Ok(())
    }

    fn output(&self) -> String {
        self.script.clone()
    }
}

use std::{io::Write, mem};

use rustyline::{DefaultEditor, error::ReadlineError};

use crate::{
    diagnostics::{MiniPyError, Result},
    runtime::Interpreter,
};

pub const PRIMARY_PROMPT: &str = ">>> ";
pub const CONTINUATION_PROMPT: &str = "... ";

/// What happened to a line fed to the REPL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Appended to the pending block.
    Buffered,
    /// A blank line with nothing pending.
    Empty,
    /// The pending block ran to completion.
    Ran,
    /// The pending block failed to parse or aborted; it was discarded.
    Failed,
    Quit,
}

/// Line-buffering shell around one [`Interpreter`]. Lines accumulate
/// until a blank line runs them as a module; definitions persist between
/// blocks.
pub struct Repl {
    interpreter: Interpreter,
    buffer: String,
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

impl Repl {
    pub fn new() -> Self {
        Self::with_interpreter(Interpreter::new())
    }

    pub fn with_interpreter(interpreter: Interpreter) -> Self {
        Self {
            interpreter,
            buffer: String::new(),
        }
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn prompt(&self) -> &'static str {
        if self.buffer.is_empty() {
            PRIMARY_PROMPT
        } else {
            CONTINUATION_PROMPT
        }
    }

    pub fn feed_line(&mut self, line: &str) -> Result<LineOutcome> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line == ":q" || line == ":quit" {
            return Ok(LineOutcome::Quit);
        }
        if line.is_empty() {
            return self.run_pending();
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
        Ok(LineOutcome::Buffered)
    }

    /// Runs whatever block is pending.
    pub fn run_pending(&mut self) -> Result<LineOutcome> {
        if self.buffer.is_empty() {
            return Ok(LineOutcome::Empty);
        }
        let source = mem::take(&mut self.buffer);
        match self.interpreter.run_source(&source) {
            Ok(()) => Ok(LineOutcome::Ran),
            Err(MiniPyError::Parse(_)) => {
                writeln!(self.interpreter.streams_mut().err, "parse failed")?;
                Ok(LineOutcome::Failed)
            }
            // Already written to the diagnostic stream by the interpreter.
            Err(MiniPyError::Runtime(_)) => Ok(LineOutcome::Failed),
            Err(err) => Err(err),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        writeln!(
            self.interpreter.streams_mut().out,
            "MiniPy REPL (blank line runs the block, :q quits)"
        )?;
        loop {
            match editor.readline(self.prompt()) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        editor.add_history_entry(line.as_str()).ok();
                    }
                    if self.feed_line(&line)? == LineOutcome::Quit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => self.buffer.clear(),
                Err(ReadlineError::Eof) => {
                    self.run_pending()?;
                    break;
                }
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }
}

fn readline_error(err: ReadlineError) -> MiniPyError {
    MiniPyError::from(std::io::Error::new(std::io::ErrorKind::Other, err))
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::{
        streams::{SharedBuffer, Streams},
        value::Value,
    };

    fn repl() -> (Repl, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::new();
        let err = SharedBuffer::new();
        let streams = Streams::new(out.clone(), err.clone(), io::empty());
        (Repl::with_interpreter(Interpreter::with_streams(streams)), out, err)
    }

    #[test]
    fn blank_line_runs_the_pending_block() {
        let (mut repl, out, _) = repl();
        assert_eq!(repl.prompt(), PRIMARY_PROMPT);
        assert_eq!(repl.feed_line("def sq(n):").unwrap(), LineOutcome::Buffered);
        assert_eq!(repl.prompt(), CONTINUATION_PROMPT);
        assert_eq!(repl.feed_line("    return n * n").unwrap(), LineOutcome::Buffered);
        assert_eq!(repl.feed_line("").unwrap(), LineOutcome::Ran);
        assert_eq!(repl.feed_line("").unwrap(), LineOutcome::Empty);

        repl.feed_line("print(sq(7))\r\n").unwrap();
        assert_eq!(repl.feed_line("").unwrap(), LineOutcome::Ran);
        assert_eq!(out.contents(), "49\n");
        assert!(repl.interpreter().functions().contains("sq"));
    }

    #[test]
    fn failed_blocks_are_discarded() {
        let (mut repl, _, err) = repl();
        repl.feed_line("x = (1").unwrap();
        assert_eq!(repl.feed_line("").unwrap(), LineOutcome::Failed);
        assert!(err.contents().ends_with("parse failed\n"));
        assert_eq!(repl.prompt(), PRIMARY_PROMPT);

        repl.feed_line("x = 2").unwrap();
        repl.run_pending().unwrap();
        assert_eq!(repl.interpreter().global("x"), Some(Value::Int(2)));
    }

    #[test]
    fn quit_command() {
        let (mut repl, _, _) = repl();
        assert_eq!(repl.feed_line(":q").unwrap(), LineOutcome::Quit);
        assert_eq!(repl.feed_line(":quit").unwrap(), LineOutcome::Quit);
    }
}

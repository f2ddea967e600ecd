use std::{
    cell::RefCell,
    io::{self, BufRead, BufReader, Write},
    rc::Rc,
};

use crate::diagnostics::Diagnostic;

/// The three channels a session talks to: normal output (`print`,
/// prompts), diagnostic output, and the line source behind `input()`.
pub struct Streams {
    pub out: Box<dyn Write>,
    pub err: Box<dyn Write>,
    pub input: Box<dyn BufRead>,
}

impl Streams {
    pub fn new(
        out: impl Write + 'static,
        err: impl Write + 'static,
        input: impl BufRead + 'static,
    ) -> Self {
        Self {
            out: Box::new(out),
            err: Box::new(err),
            input: Box::new(input),
        }
    }

    pub fn stdio() -> Self {
        Self::new(io::stdout(), io::stderr(), BufReader::new(io::stdin()))
    }

    /// Reads one line without its trailing CR/LF; `None` at end of input.
    pub fn read_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        if self.input.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        Ok(Some(line))
    }

    pub fn report(&mut self, diagnostic: &Diagnostic) -> io::Result<()> {
        writeln!(self.err, "{diagnostic}")
    }
}

/// Cloneable in-memory sink, for capturing a session's output.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

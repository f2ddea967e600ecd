//! MiniPy: a small embeddable scripting language.
//!
//! Source bytes are tokenized on demand by [`lexer::Lexer`], turned into a
//! syntax tree by [`parser::parse_module`], and executed by a tree-walking
//! [`Interpreter`] that keeps top-level bindings and user functions alive
//! across runs.

pub mod ast;
pub mod diagnostics;
pub mod environment;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod repl;
pub mod runtime;
mod stack;
pub mod stdlib;
pub mod streams;
pub mod value;

pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics, MiniPyError, Result, SourceSpan};
pub use repl::Repl;
pub use runtime::{Interpreter, InterpreterConfig};
pub use streams::{SharedBuffer, Streams};
pub use value::Value;

// File: src/errors.rs
//
// Diagnostic rendering for the Lox compiler and VM (`spec.md` §7). The
// crate keeps the same answer the teacher uses for observability — a
// structured error value rendered with `colored`, no logging framework —
// just specialized to the three error kinds the spec names.

use colored::Colorize;
use std::fmt;

/// One stack frame in a runtime backtrace (`spec.md` §7: "then a backtrace
/// one line per frame").
pub struct TraceFrame {
    pub line: u32,
    pub name: Option<String>,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A compile-time error: `[line L] Error at '<lexeme>': <message>`, or
/// `Error at end` for an EOF token. Rendered, never raised as an exception
/// — `Compiler::compile` collects these via `had_error` and returns no
/// function when any occurred.
pub struct CompileError {
    pub line: u32,
    pub at_end: bool,
    pub lexeme: String,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("[line {}] Error", self.line).red().bold())?;
        if self.at_end {
            write!(f, " at end")?;
        } else if !self.lexeme.is_empty() {
            write!(f, " at '{}'", self.lexeme)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// A runtime error: one message plus a call-stack backtrace, innermost
/// frame first (`spec.md` §7/§4.5.4). After this is reported the VM resets
/// its value stack and refuses to continue running that chunk.
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message.red().bold())?;
        for frame in &self.trace {
            writeln!(f, "{}", frame.to_string().bright_blue())?;
        }
        Ok(())
    }
}

impl std::error::Error for RuntimeError {}
impl std::error::Error for CompileError {}

impl fmt::Debug for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Debug for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// What `main.rs`/`repl.rs` actually need to know to pick an exit code
/// (`spec.md` §6: 65 for a compile error, 70 for a runtime error).
pub enum LoxError {
    Compile(Vec<CompileError>),
    Runtime(RuntimeError),
}

impl fmt::Display for LoxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoxError::Compile(errors) => {
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
            LoxError::Runtime(e) => write!(f, "{}", e),
        }
    }
}

impl From<Vec<CompileError>> for LoxError {
    fn from(errors: Vec<CompileError>) -> Self {
        LoxError::Compile(errors)
    }
}

impl From<RuntimeError> for LoxError {
    fn from(error: RuntimeError) -> Self {
        LoxError::Runtime(error)
    }
}

// File: src/lib.rs
//
// Library interface for the Lox compiler and VM. Exposes every module so
// integration tests and the REPL can drive compilation and execution
// directly.

pub mod chunk;
pub mod compiler;
pub mod debug;
pub mod errors;
pub mod lexer;
pub mod repl;
pub mod table;
pub mod value;
pub mod vm;

use std::cell::RefCell;
use std::rc::Rc;

use errors::LoxError;
use table::Table;

/// Compiles and runs one source string against a fresh VM, sharing one
/// intern table between the compiler and the VM (`spec.md` §5). Used by
/// both the file runner and the REPL's per-line help, and by integration
/// tests.
pub fn interpret(source: &str, vm: &mut vm::Vm) -> Result<(), LoxError> {
    let function = compiler::Compiler::compile(source, vm.strings())?;
    vm.interpret(function)?;
    Ok(())
}

/// Builds a VM with its own fresh intern table — the usual way to start a
/// one-shot run (`lox path/to/script.lox`).
pub fn new_vm() -> vm::Vm {
    vm::Vm::new(Rc::new(RefCell::new(Table::new())))
}

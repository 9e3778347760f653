// File: src/repl.rs
//
// Interactive REPL, same shape as the teacher's rustyline-based shell
// (history, coloured prompt), trimmed to this language's simpler
// single-line statement model — the compiler's own panic-mode recovery
// already handles anything unbalanced well enough that no brace-buffering
// is needed (`spec.md` §6).

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::compiler::Compiler;
use crate::vm::Vm;

pub struct Repl {
    vm: Vm,
    editor: DefaultEditor,
}

impl Repl {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let editor = DefaultEditor::new()?;
        Ok(Repl { vm: crate::new_vm(), editor })
    }

    fn show_banner(&self) {
        println!("{}", "Lox REPL".bright_cyan().bold());
        println!("  {} Ctrl+D to exit", "Tip:".bright_magenta());
        println!();
    }

    pub fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.show_banner();
        loop {
            let prompt = "lox> ".bright_green().to_string();
            match self.editor.readline(&prompt) {
                Ok(line) => {
                    let _ = self.editor.add_history_entry(line.as_str());
                    if line.trim().is_empty() {
                        continue;
                    }
                    self.eval_line(&line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "^C (Ctrl+D to exit)".bright_yellow());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "Goodbye!".bright_cyan());
                    break;
                }
                Err(err) => {
                    eprintln!("{} {}", "Error:".bright_red(), err);
                    break;
                }
            }
        }
        Ok(())
    }

    fn eval_line(&mut self, line: &str) {
        let strings = self.vm.strings();
        match Compiler::compile(line, strings) {
            Ok(function) => {
                if let Err(err) = self.vm.interpret(function) {
                    println!("{}", err.to_string().red());
                }
            }
            Err(errors) => {
                for e in &errors {
                    println!("{}", e);
                }
            }
        }
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new().expect("Failed to create REPL")
    }
}

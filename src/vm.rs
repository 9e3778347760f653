// File: src/vm.rs
//
// Stack-based bytecode VM (`spec.md` §4.5). Owns the value stack, the
// call-frame stack, the globals table and the open-upvalue list; drives
// the fetch-decode-execute loop over a `Chunk`'s byte stream.
//
// GC roots, for a future mark-sweep collector: `stack`, every
// `frames[*].closure`, `globals`, `open_upvalues`. No collector runs today —
// every `Obj` is `Rc`-shared and reclaimed when its last reference (one of
// the roots above, or another object that holds it) drops.

use std::cell::RefCell;
use std::rc::Rc;

use crate::chunk::{Chunk, OpCode};
use crate::errors::{RuntimeError, TraceFrame};
use crate::table::{self, Table};
use crate::value::{NativeFn, Obj, ObjClosure, ObjFunction, ObjNative, ObjString, ObjUpvalue, Value};

const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: Rc<ObjClosure>,
    ip: usize,
    slot_base: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    strings: Rc<RefCell<Table>>,
    open_upvalues: Vec<Rc<RefCell<ObjUpvalue>>>,
    trace: bool,
}

impl Vm {
    pub fn new(strings: Rc<RefCell<Table>>) -> Self {
        let mut vm = Vm {
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            strings,
            open_upvalues: Vec::new(),
            trace: std::env::var_os("LOX_TRACE").is_some(),
        };
        vm.define_native("clock", native_clock);
        vm
    }

    /// The intern table this VM resolves strings against. The compiler
    /// borrows the same `Rc` so a literal compiles to the identical
    /// `ObjString` the VM will later see.
    pub fn strings(&self) -> Rc<RefCell<Table>> {
        self.strings.clone()
    }

    fn define_native(&mut self, name: &str, function: NativeFn) {
        let name_obj = table::intern(&self.strings, name);
        let native = Rc::new(ObjNative { name: name.to_string(), function });
        self.globals.set(name_obj, Value::Obj(Rc::new(RefCell::new(Obj::Native(native)))));
    }

    /// Wraps the compiled script in a closure and runs it. Routes through
    /// `call_value` rather than pushing a `CallFrame` by hand, so the frame's
    /// `slot_base` tracks the live stack top — this `Vm` is reused across
    /// repeated `interpret()` calls (one per REPL line), and a hardcoded
    /// `slot_base: 0` would address locals relative to the *first* line's
    /// base instead of the current one (`original_source/main/vm.cc`'s
    /// bootstrap call goes through the ordinary `callValue` path too).
    pub fn interpret(&mut self, function: ObjFunction) -> Result<(), RuntimeError> {
        let function = Rc::new(function);
        let closure = Rc::new(ObjClosure { function, upvalues: Vec::new() });
        let value = Value::Obj(Rc::new(RefCell::new(Obj::Closure(closure))));
        self.stack.push(value.clone());
        self.call_value(value, 0)?;
        self.run()
    }

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            let frame_index = self.frames.len() - 1;

            if self.trace {
                self.print_trace(frame_index);
            }

            let byte = self.read_byte(frame_index);
            let op = match OpCode::from_byte(byte) {
                Some(op) => op,
                None => return Err(self.runtime_error("Invalid bytecode.")),
            };

            match op {
                OpCode::Constant => {
                    let value = self.read_constant(frame_index);
                    self.stack.push(value);
                }
                OpCode::Nil => self.stack.push(Value::Nil),
                OpCode::True => self.stack.push(Value::Bool(true)),
                OpCode::False => self.stack.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.stack.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte(frame_index) as usize;
                    let base = self.frames[frame_index].slot_base;
                    self.stack.push(self.stack[base + slot].clone());
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte(frame_index) as usize;
                    let base = self.frames[frame_index].slot_base;
                    let value = self.peek(0).clone();
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string(frame_index);
                    match self.globals.get(&name) {
                        Some(value) => self.stack.push(value),
                        None => {
                            return Err(self
                                .runtime_error(&format!("Undefined variable '{}'.", name.chars)))
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string(frame_index);
                    let value = self.peek(0).clone();
                    self.globals.set(name, value);
                    self.stack.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string(frame_index);
                    let value = self.peek(0).clone();
                    if self.globals.set(name.clone(), value) {
                        self.globals.delete(&name);
                        return Err(
                            self.runtime_error(&format!("Undefined variable '{}'.", name.chars))
                        );
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte(frame_index) as usize;
                    let upvalue = self.frames[frame_index].closure.upvalues[slot].clone();
                    self.stack.push(self.upvalue_value(&upvalue));
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte(frame_index) as usize;
                    let upvalue = self.frames[frame_index].closure.upvalues[slot].clone();
                    let value = self.peek(0).clone();
                    self.set_upvalue_value(&upvalue, value);
                }
                OpCode::Equal => {
                    let b = self.stack.pop().unwrap();
                    let a = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(Value::values_equal(&a, &b)));
                }
                OpCode::Greater => self.binary_compare(|a, b| a > b)?,
                OpCode::Less => self.binary_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.binary_numeric(|a, b| a - b)?,
                OpCode::Multiply => self.binary_numeric(|a, b| a * b)?,
                OpCode::Divide => self.binary_numeric(|a, b| a / b)?,
                OpCode::Not => {
                    let value = self.stack.pop().unwrap();
                    self.stack.push(Value::Bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let n = self.stack.pop().unwrap().as_number().unwrap();
                    self.stack.push(Value::Number(-n));
                }
                OpCode::Print => {
                    let value = self.stack.pop().unwrap();
                    println!("{}", value);
                }
                OpCode::Jump => {
                    let offset = self.read_short(frame_index);
                    self.frames[frame_index].ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short(frame_index);
                    if self.peek(0).is_falsey() {
                        self.frames[frame_index].ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short(frame_index);
                    self.frames[frame_index].ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte(frame_index);
                    let callee = self.peek(arg_count as usize).clone();
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Closure => {
                    let function = self.read_function_constant(frame_index);
                    let upvalue_count = function.upvalue_count;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte(frame_index) != 0;
                        let index = self.read_byte(frame_index) as usize;
                        if is_local {
                            let base = self.frames[frame_index].slot_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            upvalues.push(self.frames[frame_index].closure.upvalues[index].clone());
                        }
                    }
                    let closure = Rc::new(ObjClosure { function, upvalues });
                    self.stack.push(Value::Obj(Rc::new(RefCell::new(Obj::Closure(closure)))));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.stack.pop();
                }
                OpCode::Return => {
                    let result = self.stack.pop().unwrap();
                    let base = self.frames[frame_index].slot_base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    // Truncating here (not just on the error path) puts the
                    // stack back to its pre-call length even when this was
                    // the outermost frame, so a reused `Vm` (the REPL) starts
                    // the next `interpret()` call from a clean stack.
                    self.stack.truncate(base);
                    if self.frames.is_empty() {
                        return Ok(());
                    }
                    self.stack.push(result);
                }
            }
        }
    }

    // ---- byte-stream reading ----

    fn read_byte(&mut self, frame_index: usize) -> u8 {
        let frame = &mut self.frames[frame_index];
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self, frame_index: usize) -> u16 {
        let hi = self.read_byte(frame_index) as u16;
        let lo = self.read_byte(frame_index) as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self, frame_index: usize) -> Value {
        let index = self.read_byte(frame_index) as usize;
        self.frames[frame_index].closure.function.chunk.constants[index].clone()
    }

    fn read_string(&mut self, frame_index: usize) -> Rc<ObjString> {
        self.read_constant(frame_index).as_string().expect("constant must be a string")
    }

    fn read_function_constant(&mut self, frame_index: usize) -> Rc<ObjFunction> {
        match self.read_constant(frame_index) {
            Value::Obj(o) => match &*o.borrow() {
                Obj::Function(f) => f.clone(),
                _ => panic!("constant must be a function"),
            },
            _ => panic!("constant must be a function"),
        }
    }

    // ---- stack helpers ----

    fn peek(&self, distance: usize) -> &Value {
        &self.stack[self.stack.len() - 1 - distance]
    }

    fn binary_numeric(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.stack.pop().unwrap().as_number().unwrap();
        let a = self.stack.pop().unwrap().as_number().unwrap();
        self.stack.push(Value::Number(op(a, b)));
        Ok(())
    }

    fn binary_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.stack.pop().unwrap().as_number().unwrap();
        let a = self.stack.pop().unwrap().as_number().unwrap();
        self.stack.push(Value::Bool(op(a, b)));
        Ok(())
    }

    fn add(&mut self) -> Result<(), RuntimeError> {
        if self.peek(0).is_string() && self.peek(1).is_string() {
            let b = self.stack.pop().unwrap().as_string().unwrap();
            let a = self.stack.pop().unwrap().as_string().unwrap();
            let concatenated = format!("{}{}", a.chars, b.chars);
            let interned = table::intern(&self.strings, &concatenated);
            self.stack.push(Value::Obj(Rc::new(RefCell::new(Obj::String(interned)))));
            Ok(())
        } else if self.peek(0).is_number() && self.peek(1).is_number() {
            self.binary_numeric(|a, b| a + b)
        } else {
            Err(self.runtime_error("Operands must be two numbers or two strings."))
        }
    }

    // ---- calls ----

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        if let Value::Obj(o) = &callee {
            let kind = o.borrow();
            match &*kind {
                Obj::Closure(closure) => {
                    let closure = closure.clone();
                    drop(kind);
                    return self.call(closure, arg_count);
                }
                Obj::Native(native) => {
                    let native = native.clone();
                    drop(kind);
                    let start = self.stack.len() - arg_count as usize;
                    let args: Vec<Value> = self.stack[start..].to_vec();
                    let result = (native.function)(&args);
                    self.stack.truncate(start - 1);
                    self.stack.push(result);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn call(&mut self, closure: Rc<ObjClosure>, arg_count: u8) -> Result<(), RuntimeError> {
        if arg_count as usize != closure.function.arity as usize {
            return Err(self.runtime_error(&format!(
                "Expected {} arguments but got {}.",
                closure.function.arity, arg_count
            )));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    // ---- upvalues ----

    /// `open_upvalues` is kept sorted by strictly-descending `stack_index`
    /// so the walk mirrors cpplox's linked list ordered from high stack
    /// address to low (`spec.md` §4.5.3).
    fn capture_upvalue(&mut self, stack_index: usize) -> Rc<RefCell<ObjUpvalue>> {
        let mut insert_at = self.open_upvalues.len();
        for (i, existing) in self.open_upvalues.iter().enumerate() {
            let existing_index = match &*existing.borrow() {
                ObjUpvalue::Open { stack_index } => *stack_index,
                ObjUpvalue::Closed(_) => unreachable!("open list holds only open upvalues"),
            };
            if existing_index == stack_index {
                return existing.clone();
            }
            if existing_index < stack_index {
                insert_at = i;
                break;
            }
        }
        let created = Rc::new(RefCell::new(ObjUpvalue::Open { stack_index }));
        self.open_upvalues.insert(insert_at, created.clone());
        created
    }

    fn close_upvalues(&mut self, from: usize) {
        while let Some(top) = self.open_upvalues.first() {
            let stack_index = match &*top.borrow() {
                ObjUpvalue::Open { stack_index } => *stack_index,
                ObjUpvalue::Closed(_) => unreachable!("open list holds only open upvalues"),
            };
            if stack_index < from {
                break;
            }
            let value = self.stack[stack_index].clone();
            *top.borrow_mut() = ObjUpvalue::Closed(value);
            self.open_upvalues.remove(0);
        }
    }

    fn upvalue_value(&self, upvalue: &Rc<RefCell<ObjUpvalue>>) -> Value {
        match &*upvalue.borrow() {
            ObjUpvalue::Open { stack_index } => self.stack[*stack_index].clone(),
            ObjUpvalue::Closed(value) => value.clone(),
        }
    }

    fn set_upvalue_value(&mut self, upvalue: &Rc<RefCell<ObjUpvalue>>, value: Value) {
        let stack_index = match &*upvalue.borrow() {
            ObjUpvalue::Open { stack_index } => Some(*stack_index),
            ObjUpvalue::Closed(_) => None,
        };
        match stack_index {
            Some(index) => self.stack[index] = value,
            None => *upvalue.borrow_mut() = ObjUpvalue::Closed(value),
        }
    }

    // ---- errors & tracing ----

    /// Failing-instruction offset is `ip - 1` at the point of the fault —
    /// the instruction byte has already been consumed by `read_byte`
    /// (confirmed against cpplox's `ip - &chunk.code.front() - 1`).
    fn runtime_error(&mut self, message: &str) -> RuntimeError {
        let mut trace = Vec::new();
        for frame in self.frames.iter().rev() {
            let chunk = &frame.closure.function.chunk;
            let instruction = frame.ip.saturating_sub(1);
            let line = chunk.lines.get(instruction).copied().unwrap_or(0);
            let name = frame.closure.function.name.as_ref().map(|s| s.chars.clone());
            trace.push(TraceFrame { line, name });
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        RuntimeError { message: message.to_string(), trace }
    }

    fn print_trace(&self, frame_index: usize) {
        print!("          ");
        for value in &self.stack {
            print!("[{}]", value);
        }
        println!();
        let frame = &self.frames[frame_index];
        crate::debug::disassemble_instruction(&frame.closure.function.chunk, frame.ip);
    }
}

fn native_clock(_args: &[Value]) -> Value {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    Value::Number(elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;

    fn run(source: &str) -> Result<(), RuntimeError> {
        let strings = Rc::new(RefCell::new(Table::new()));
        let function = Compiler::compile(source, strings.clone()).expect("compiles");
        let mut vm = Vm::new(strings);
        vm.interpret(function)
    }

    #[test]
    fn arithmetic_executes_without_error() {
        assert!(run("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let err = run("print x;").unwrap_err();
        assert!(err.message.contains("Undefined variable"));
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let err = run("var x = 1; x();").unwrap_err();
        assert!(err.message.contains("Can only call"));
    }

    #[test]
    fn closures_increment_independently() {
        let source = r#"
            fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    print i;
                }
                return count;
            }
            var counter = makeCounter();
            counter();
            counter();
        "#;
        assert!(run(source).is_ok());
    }
}

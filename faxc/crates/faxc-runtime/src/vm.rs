//! The bytecode dispatch loop (spec.md §4.6): one `CallFrame` per in-flight
//! function call, a plain growable value stack, and a `match` over every
//! opcode `fgc::OpCode` defines.
//!
//! Frames address the stack by `slot_base` rather than the spec's raw
//! `slots` pointer — the same trade `fgc::Heap` already made for objects
//! (arena handles instead of pointers), kept consistent here rather than
//! reintroducing unsafe pointer arithmetic at the one layer that still
//! could.

use std::io::{self, Write};

use fgc::{Heap, NativeFn, Object, ObjHandle, OpCode, Table, UpvalueState, Value};

use crate::error::{FrameTrace, RuntimeError, VmError};
use crate::natives::native_clock;

const FRAMES_MAX: usize = 64;

struct CallFrame {
    closure: ObjHandle,
    ip: usize,
    slot_base: usize,
}

/// Snapshot of everything the collector must treat as a root at the moment
/// an allocation happens from the VM side of the world (spec.md §4.5): the
/// stack, every live frame's closure, open up-values, globals, and the
/// interned `"init"` sentinel. Captured by value, the same way
/// `faxc_compiler::Compiler::compiling_roots` does it, so the mark closure
/// handed to `Heap` never needs to re-borrow the VM mid-mutation.
struct GcRoots {
    stack: Vec<Value>,
    frame_closures: Vec<ObjHandle>,
    open_upvalues: Vec<ObjHandle>,
    globals: Table,
    init_string: ObjHandle,
}

fn mark_roots(roots: &GcRoots, heap: &mut Heap) {
    for &v in &roots.stack {
        heap.mark_value(v);
    }
    for &h in &roots.frame_closures {
        heap.mark_object(h);
    }
    for &h in &roots.open_upvalues {
        heap.mark_object(h);
    }
    roots.globals.mark(heap);
    heap.mark_object(roots.init_string);
}

enum Callable {
    Closure(ObjHandle),
    Native(NativeFn, Option<u8>),
    Class(ObjHandle),
    Bound(Value, ObjHandle),
    NotCallable,
}

pub struct Vm {
    heap: Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Table,
    open_upvalues: Vec<ObjHandle>,
    init_string: ObjHandle,
    stdout: Box<dyn Write>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    /// Builds a VM printing to an arbitrary sink instead of process stdout —
    /// used by tests that need to assert on `print` output.
    pub fn with_writer(stdout: Box<dyn Write>) -> Self {
        Self::with_heap(Heap::new(), stdout)
    }

    /// Builds a VM whose collector uses caller-supplied tuning knobs instead
    /// of `fgc`'s defaults, printing to process stdout (`faxt`'s `faxt.toml`
    /// surfaces this; spec.md §4.5 leaves the initial threshold and grow
    /// factor as implementation-defined constants).
    pub fn with_gc_config(next_gc: usize, grow_factor: usize) -> Self {
        Self::with_heap(Heap::with_config(next_gc, grow_factor), Box::new(io::stdout()))
    }

    fn with_heap(mut heap: Heap, stdout: Box<dyn Write>) -> Self {
        let init_string = heap.intern_string(b"init", |_| {});
        let mut vm = Vm {
            heap,
            stack: Vec::new(),
            frames: Vec::new(),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
            stdout,
        };
        vm.define_native("clock", Some(0), native_clock);
        vm
    }

    pub fn set_stress_gc(&mut self, stress: bool) {
        self.heap.stress_gc = stress;
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Compiles and runs `source` as a new top-level script against this
    /// VM's existing globals and heap. The REPL feeds one line per call and
    /// relies on that persistence (spec.md §9; `original_source`'s
    /// `repl()` shares one `VM` the same way — SPEC_FULL.md §11).
    pub fn interpret(&mut self, source: &str) -> Result<(), VmError> {
        let function = faxc_compiler::compile(source, &mut self.heap)?;
        let roots = self.snapshot_roots();
        let closure = self.heap.alloc_closure(function, Vec::new(), move |heap| {
            mark_roots(&roots, heap);
            // `function` isn't yet referenced by any frame or stack slot,
            // so it needs an explicit root for this one allocation.
            heap.mark_object(function);
        });
        self.push(Value::Obj(closure));
        let slot_base = self.stack.len() - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        self.run().map_err(VmError::from)
    }

    fn snapshot_roots(&self) -> GcRoots {
        GcRoots {
            stack: self.stack.clone(),
            frame_closures: self.frames.iter().map(|f| f.closure).collect(),
            open_upvalues: self.open_upvalues.clone(),
            globals: self.globals.clone(),
            init_string: self.init_string,
        }
    }

    // ---- stack --------------------------------------------------------

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("dispatch loop never pops past what it pushed")
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- heap accessors (each a single self-contained borrow) ----------

    fn is_instance(&self, h: ObjHandle) -> bool {
        matches!(self.heap.get(h), Object::Instance(_))
    }

    fn is_class(&self, h: ObjHandle) -> bool {
        matches!(self.heap.get(h), Object::Class(_))
    }

    fn string_hash(&self, h: ObjHandle) -> u32 {
        self.heap.as_string(h).expect("operand is an interned string").hash
    }

    fn string_text(&self, h: ObjHandle) -> String {
        self.heap.as_string(h).expect("operand is an interned string").as_str().to_string()
    }

    fn instance_field(&self, instance: ObjHandle, name: ObjHandle, hash: u32) -> Option<Value> {
        self.heap.get(instance).as_instance().unwrap().fields.get(name, hash)
    }

    fn instance_class(&self, instance: ObjHandle) -> ObjHandle {
        self.heap.get(instance).as_instance().unwrap().class
    }

    fn class_method(&self, class: ObjHandle, name: ObjHandle, hash: u32) -> Option<Value> {
        self.heap.get(class).as_class().unwrap().methods.get(name, hash)
    }

    fn set_instance_field(&mut self, instance: ObjHandle, name: ObjHandle, hash: u32, value: Value) {
        self.heap.get_mut(instance).as_instance_mut().unwrap().fields.set(name, hash, value);
    }

    fn set_class_method(&mut self, class: ObjHandle, name: ObjHandle, hash: u32, value: Value) {
        self.heap.get_mut(class).as_class_mut().unwrap().methods.set(name, hash, value);
    }

    fn class_methods_snapshot(&self, class: ObjHandle) -> Vec<(ObjHandle, Value)> {
        self.heap.get(class).as_class().unwrap().methods.iter().collect()
    }

    fn closure_function(&self, closure: ObjHandle) -> ObjHandle {
        self.heap.get(closure).as_closure().unwrap().function
    }

    fn function_arity(&self, function: ObjHandle) -> u8 {
        self.heap.get(function).as_function().unwrap().arity
    }

    fn function_upvalue_count(&self, function: ObjHandle) -> u8 {
        self.heap.get(function).as_function().unwrap().upvalue_count
    }

    fn closure_upvalue(&self, closure: ObjHandle, index: usize) -> ObjHandle {
        self.heap.get(closure).as_closure().unwrap().upvalues[index]
    }

    fn upvalue_open_slot(&self, h: ObjHandle) -> Option<usize> {
        match self.heap.get(h).as_upvalue().unwrap().state {
            UpvalueState::Open(s) => Some(s),
            UpvalueState::Closed(_) => None,
        }
    }

    fn upvalue_value(&self, h: ObjHandle) -> Value {
        match self.heap.get(h).as_upvalue().unwrap().state {
            UpvalueState::Open(s) => self.stack[s],
            UpvalueState::Closed(v) => v,
        }
    }

    fn close_upvalue_at(&mut self, h: ObjHandle, value: Value) {
        if let Object::Upvalue(u) = self.heap.get_mut(h) {
            u.state = UpvalueState::Closed(value);
        }
    }

    fn push_bound_method(&mut self, receiver: Value, method: ObjHandle) {
        let roots = self.snapshot_roots();
        let handle = self.heap.alloc_bound_method(receiver, method, move |heap| mark_roots(&roots, heap));
        self.push(Value::Obj(handle));
    }

    fn classify_callable(&self, handle: ObjHandle) -> Callable {
        match self.heap.get(handle) {
            Object::Closure(_) => Callable::Closure(handle),
            Object::Native(n) => Callable::Native(n.function, n.arity),
            Object::Class(_) => Callable::Class(handle),
            Object::BoundMethod(b) => Callable::Bound(b.receiver, b.method),
            _ => Callable::NotCallable,
        }
    }

    // ---- bytecode reading ------------------------------------------------

    fn chunk_byte(&self, frame_index: usize, at: usize) -> u8 {
        let closure = self.frames[frame_index].closure;
        let function = self.closure_function(closure);
        self.heap.get(function).as_function().unwrap().chunk.code[at]
    }

    fn read_byte(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let ip = self.frames[idx].ip;
        let byte = self.chunk_byte(idx, ip);
        self.frames[idx].ip += 1;
        byte
    }

    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte() as u16;
        let lo = self.read_byte() as u16;
        (hi << 8) | lo
    }

    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte() as usize;
        let frame_idx = self.frames.len() - 1;
        let closure = self.frames[frame_idx].closure;
        let function = self.closure_function(closure);
        self.heap.get(function).as_function().unwrap().chunk.constants[idx]
    }

    fn read_string(&mut self) -> ObjHandle {
        self.read_constant().as_obj().expect("compiler only emits string constants for name operands")
    }

    // ---- errors ------------------------------------------------------------

    /// Builds the back-trace (innermost frame first) and unwinds the VM's
    /// call stack entirely, per spec.md §7: a runtime error terminates the
    /// program, it does not unwind to some intermediate handler.
    fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let mut trace = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = self.closure_function(frame.closure);
            let line = self.heap.get(function).as_function().unwrap().chunk.lines[frame.ip - 1];
            let name = match self.heap.get(function).as_function().unwrap().name {
                Some(n) => self.string_text(n),
                None => "script".to_string(),
            };
            trace.push(FrameTrace { name, line });
        }
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        RuntimeError { message: message.into(), trace }
    }

    // ---- up-values -----------------------------------------------------------

    fn capture_upvalue(&mut self, slot: usize) -> ObjHandle {
        for &h in &self.open_upvalues {
            if self.upvalue_open_slot(h) == Some(slot) {
                return h;
            }
        }
        let roots = self.snapshot_roots();
        let handle = self.heap.alloc_open_upvalue(slot, move |heap| mark_roots(&roots, heap));
        let mut insert_at = self.open_upvalues.len();
        for (i, &h) in self.open_upvalues.iter().enumerate() {
            if let Some(existing_slot) = self.upvalue_open_slot(h) {
                if existing_slot < slot {
                    insert_at = i;
                    break;
                }
            }
        }
        self.open_upvalues.insert(insert_at, handle);
        handle
    }

    /// Closes every open up-value at or above `from`, per spec.md §4.6 —
    /// `open_upvalues` stays sorted by descending stack slot, so the ones to
    /// close are always a prefix.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(&h) = self.open_upvalues.first() {
            match self.upvalue_open_slot(h) {
                Some(slot) if slot >= from => {
                    let value = self.stack[slot];
                    self.open_upvalues.remove(0);
                    self.close_upvalue_at(h, value);
                }
                _ => break,
            }
        }
    }

    // ---- calls ---------------------------------------------------------------

    fn call_closure(&mut self, closure: ObjHandle, arg_count: u8) -> Result<(), RuntimeError> {
        let function = self.closure_function(closure);
        let arity = self.function_arity(function);
        if arity != arg_count {
            return Err(self.runtime_error(format!("Expected {arity} arguments but got {arg_count}.")));
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    fn call_native(&mut self, function: NativeFn, arity: Option<u8>, arg_count: u8) -> Result<(), RuntimeError> {
        if let Some(expected) = arity {
            if expected != arg_count {
                return Err(self.runtime_error(format!("Expected {expected} arguments but got {arg_count}.")));
            }
        }
        let start = self.stack.len() - arg_count as usize;
        let result = function(&self.stack[start..]);
        match result {
            Ok(value) => {
                self.stack.truncate(start - 1);
                self.push(value);
                Ok(())
            }
            Err(message) => Err(self.runtime_error(message)),
        }
    }

    fn construct_instance(&mut self, class: ObjHandle, arg_count: u8) -> Result<(), RuntimeError> {
        let roots = self.snapshot_roots();
        let instance = self.heap.alloc_instance(class, move |heap| mark_roots(&roots, heap));
        let slot = self.stack.len() - arg_count as usize - 1;
        self.stack[slot] = Value::Obj(instance);
        let hash = self.string_hash(self.init_string);
        match self.class_method(class, self.init_string, hash) {
            Some(Value::Obj(initializer)) => self.call_closure(initializer, arg_count),
            _ if arg_count != 0 => Err(self.runtime_error(format!("Expected 0 arguments but got {arg_count}."))),
            _ => Ok(()),
        }
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        let handle = match callee.as_obj() {
            Some(h) => h,
            None => return Err(self.runtime_error("Can only call functions and classes.")),
        };
        match self.classify_callable(handle) {
            Callable::Closure(c) => self.call_closure(c, arg_count),
            Callable::Native(function, arity) => self.call_native(function, arity, arg_count),
            Callable::Class(class) => self.construct_instance(class, arg_count),
            Callable::Bound(receiver, method) => {
                let slot = self.stack.len() - arg_count as usize - 1;
                self.stack[slot] = receiver;
                self.call_closure(method, arg_count)
            }
            Callable::NotCallable => Err(self.runtime_error("Can only call functions and classes.")),
        }
    }

    fn invoke_from_class(&mut self, class: ObjHandle, name: ObjHandle, arg_count: u8) -> Result<(), RuntimeError> {
        let hash = self.string_hash(name);
        match self.class_method(class, name, hash) {
            Some(Value::Obj(closure)) => self.call_closure(closure, arg_count),
            _ => {
                let n = self.string_text(name);
                Err(self.runtime_error(format!("Undefined property '{n}'.")))
            }
        }
    }

    fn invoke(&mut self, name: ObjHandle, arg_count: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(arg_count as usize);
        let instance_handle = match receiver.as_obj() {
            Some(h) if self.is_instance(h) => h,
            _ => return Err(self.runtime_error("Only instances have methods.")),
        };
        let hash = self.string_hash(name);
        if let Some(value) = self.instance_field(instance_handle, name, hash) {
            let slot = self.stack.len() - 1 - arg_count as usize;
            self.stack[slot] = value;
            return self.call_value(value, arg_count);
        }
        let class = self.instance_class(instance_handle);
        self.invoke_from_class(class, name, arg_count)
    }

    fn define_native(&mut self, name: &str, arity: Option<u8>, function: NativeFn) {
        let roots = self.snapshot_roots();
        let name_handle = self.heap.intern_string(name.as_bytes(), move |heap| mark_roots(&roots, heap));
        self.push(Value::Obj(name_handle));
        let roots = self.snapshot_roots();
        let native_handle = self.heap.alloc_native(name_handle, arity, function, move |heap| mark_roots(&roots, heap));
        self.push(Value::Obj(native_handle));
        let hash = self.string_hash(name_handle);
        let value = self.peek(0);
        self.globals.set(name_handle, hash, value);
        self.pop();
        self.pop();
    }

    // ---- arithmetic / comparison helpers ---------------------------------

    fn numeric_binary(&mut self, f: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(f(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn numeric_compare(&mut self, f: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(f(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    /// `+` on two numbers adds; on two strings concatenates; anything else
    /// is a runtime error (spec.md §4.6). String concatenation follows the
    /// allocation-barrier discipline `original_source`'s `concatenate()`
    /// uses: `a`/`b` stay on the value stack (and so stay reachable through
    /// this call's own root snapshot) until the interned result is pushed
    /// in their place.
    fn add(&mut self) -> Result<(), RuntimeError> {
        let b = self.peek(0);
        let a = self.peek(1);
        if let (Some(x), Some(y)) = (a.as_number(), b.as_number()) {
            self.pop();
            self.pop();
            self.push(Value::Number(x + y));
            return Ok(());
        }
        let strings = match (a.as_obj(), b.as_obj()) {
            (Some(ah), Some(bh)) if self.heap.as_string(ah).is_some() && self.heap.as_string(bh).is_some() => {
                Some((ah, bh))
            }
            _ => None,
        };
        if let Some((ah, bh)) = strings {
            let mut combined = String::with_capacity(self.string_text(ah).len() + self.string_text(bh).len());
            combined.push_str(&self.string_text(ah));
            combined.push_str(&self.string_text(bh));
            let roots = self.snapshot_roots();
            let handle = self.heap.intern_string(combined.as_bytes(), move |heap| mark_roots(&roots, heap));
            self.pop();
            self.pop();
            self.push(Value::Obj(handle));
            return Ok(());
        }
        Err(self.runtime_error("Operands must be two numbers or two strings."))
    }

    // ---- main loop -------------------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        tracing::trace!(frames = self.frames.len(), "dispatch loop enter");
        let result = self.run_loop();
        match &result {
            Ok(()) => tracing::trace!("dispatch loop exit: ok"),
            Err(e) => tracing::trace!(error = %e, "dispatch loop exit: runtime error"),
        }
        result
    }

    fn run_loop(&mut self) -> Result<(), RuntimeError> {
        loop {
            let op = OpCode::from_u8(self.read_byte());
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.push(value);
                }
                OpCode::Nil => self.push(Value::Nil),
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    let value = self.peek(0);
                    self.stack[base + slot] = value;
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    match self.globals.get(name, hash) {
                        Some(value) => self.push(value),
                        None => {
                            let n = self.string_text(name);
                            return Err(self.runtime_error(format!("Undefined variable '{n}'.")));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let value = self.pop();
                    self.globals.set(name, hash, value);
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let hash = self.string_hash(name);
                    let value = self.peek(0);
                    if self.globals.set(name, hash, value) {
                        self.globals.delete(name, hash);
                        let n = self.string_text(name);
                        return Err(self.runtime_error(format!("Undefined variable '{n}'.")));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = self.closure_upvalue(closure, slot);
                    let value = self.upvalue_value(upvalue);
                    self.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = self.closure_upvalue(closure, slot);
                    let value = self.peek(0);
                    match self.upvalue_open_slot(upvalue) {
                        Some(s) => self.stack[s] = value,
                        None => self.close_upvalue_at(upvalue, value),
                    }
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    let instance_handle = match receiver.as_obj() {
                        Some(h) if self.is_instance(h) => h,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    let hash = self.string_hash(name);
                    if let Some(value) = self.instance_field(instance_handle, name, hash) {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = self.instance_class(instance_handle);
                        match self.class_method(class, name, hash) {
                            Some(Value::Obj(m)) => {
                                let instance_val = self.pop();
                                self.push_bound_method(instance_val, m);
                            }
                            _ => {
                                let n = self.string_text(name);
                                return Err(self.runtime_error(format!("Undefined property '{n}'.")));
                            }
                        }
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(1);
                    let instance_handle = match receiver.as_obj() {
                        Some(h) if self.is_instance(h) => h,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    let hash = self.string_hash(name);
                    let value = self.peek(0);
                    self.set_instance_field(instance_handle, name, hash, value);
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass_val = self.pop();
                    let receiver = self.pop();
                    let superclass = superclass_val.as_obj().expect("compiler only emits GET_SUPER with a class on top");
                    let hash = self.string_hash(name);
                    match self.class_method(superclass, name, hash) {
                        Some(Value::Obj(m)) => self.push_bound_method(receiver, m),
                        _ => {
                            let n = self.string_text(name);
                            return Err(self.runtime_error(format!("Undefined property '{n}'.")));
                        }
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(Value::values_equal(a, b)));
                }
                OpCode::Greater => self.numeric_compare(|a, b| a > b)?,
                OpCode::Less => self.numeric_compare(|a, b| a < b)?,
                OpCode::Add => self.add()?,
                OpCode::Subtract => self.numeric_binary(|a, b| a - b)?,
                OpCode::Multiply => self.numeric_binary(|a, b| a * b)?,
                OpCode::Divide => self.numeric_binary(|a, b| a / b)?,
                OpCode::Not => {
                    let v = self.pop();
                    self.push(Value::Bool(v.is_falsey()));
                }
                OpCode::Negate => {
                    let v = self.peek(0);
                    match v.as_number() {
                        Some(n) => {
                            self.pop();
                            self.push(Value::Number(-n));
                        }
                        None => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }
                OpCode::Print => {
                    let v = self.pop();
                    let text = self.heap.display_value(v);
                    let _ = writeln!(self.stdout, "{text}");
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    self.invoke(name, arg_count)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let arg_count = self.read_byte();
                    let superclass_val = self.pop();
                    let superclass =
                        superclass_val.as_obj().expect("compiler only emits SUPER_INVOKE with a class on top");
                    self.invoke_from_class(superclass, name, arg_count)?;
                }
                OpCode::Closure => {
                    let function_val = self.read_constant();
                    let function_handle = function_val.as_obj().expect("CLOSURE operand is always a Function constant");
                    let upvalue_count = self.function_upvalue_count(function_handle);
                    let mut upvalues = Vec::with_capacity(upvalue_count as usize);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let base = self.frames.last().unwrap().slot_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            let closure = self.frames.last().unwrap().closure;
                            upvalues.push(self.closure_upvalue(closure, index));
                        }
                    }
                    let roots = self.snapshot_roots();
                    let handle = self.heap.alloc_closure(function_handle, upvalues, move |heap| mark_roots(&roots, heap));
                    self.push(Value::Obj(handle));
                }
                OpCode::CloseUpvalue => {
                    let top = self.stack.len() - 1;
                    self.close_upvalues(top);
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let base = self.frames.last().unwrap().slot_base;
                    self.close_upvalues(base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack.truncate(base);
                    self.push(result);
                }
                OpCode::Class => {
                    let name = self.read_string();
                    let roots = self.snapshot_roots();
                    let handle = self.heap.alloc_class(name, move |heap| mark_roots(&roots, heap));
                    self.push(Value::Obj(handle));
                }
                OpCode::Inherit => {
                    let superclass_val = self.peek(1);
                    let super_handle = match superclass_val.as_obj() {
                        Some(h) if self.is_class(h) => h,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let sub_handle = self.peek(0).as_obj().expect("compiler only emits INHERIT with a class on top");
                    for (key, value) in self.class_methods_snapshot(super_handle) {
                        let hash = self.string_hash(key);
                        self.set_class_method(sub_handle, key, hash, value);
                    }
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let closure_val = self.pop();
                    let closure = closure_val.as_obj().expect("METHOD operand is always a Closure constant");
                    let class_handle = self.peek(0).as_obj().expect("METHOD runs with its class below the closure");
                    let hash = self.string_hash(name);
                    self.set_class_method(class_handle, name, hash, Value::Obj(closure));
                }
            }
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run_and_capture(src: &str) -> String {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_writer(Box::new(buf.clone()));
        vm.interpret(src).expect("script should run without error");
        String::from_utf8(buf.0.borrow().clone()).unwrap()
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(run_and_capture("print 1 + 2 * 3;"), "7\n");
    }

    #[test]
    fn string_concatenation() {
        assert_eq!(run_and_capture("var a = \"he\"; var b = \"llo\"; print a + b;"), "hello\n");
    }

    #[test]
    fn closures_capture_the_enclosing_parameter() {
        assert_eq!(
            run_and_capture("fun make(x) { fun inner() { return x; } return inner; } print make(42)();"),
            "42\n"
        );
    }

    #[test]
    fn counter_closure_shares_mutable_state_across_calls() {
        let src = "fun counter() { var n = 0; fun inc() { n = n + 1; return n; } return inc; } \
                   var c = counter(); print c(); print c(); print c();";
        assert_eq!(run_and_capture(src), "1\n2\n3\n");
    }

    #[test]
    fn instances_hold_fields_and_dispatch_methods() {
        let src = "class Person { greet() { print \"hi \" + this.name; } } \
                   var p = Person(); p.name = \"world\"; p.greet();";
        assert_eq!(run_and_capture(src), "hi world\n");
    }

    #[test]
    fn single_inheritance_and_initializers() {
        let src = "class A { init(v) { this.v = v; } } \
                   class B < A { show() { print this.v; } } \
                   B(7).show();";
        assert_eq!(run_and_capture(src), "7\n");
    }

    #[test]
    fn super_dispatches_to_the_parent_method() {
        let src = "class A { greet() { print \"A\"; } } \
                   class B < A { greet() { super.greet(); print \"B\"; } } \
                   B().greet();";
        assert_eq!(run_and_capture(src), "A\nB\n");
    }

    #[test]
    fn adding_a_number_and_a_string_is_a_runtime_error() {
        let mut vm = Vm::with_writer(Box::new(SharedBuf::default()));
        let err = vm.interpret("print 1 + \"x\";").unwrap_err();
        assert!(err.to_string().contains("Operands must be two numbers or two strings."));
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let mut vm = Vm::with_writer(Box::new(SharedBuf::default()));
        assert!(vm.interpret("print nope;").is_err());
    }

    #[test]
    fn repl_style_reuse_shares_globals_across_interpret_calls() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_writer(Box::new(buf.clone()));
        vm.interpret("var x = 1;").unwrap();
        vm.interpret("print x;").unwrap();
        assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "1\n");
    }

    #[test]
    fn clock_native_is_registered_and_callable() {
        let mut vm = Vm::with_writer(Box::new(SharedBuf::default()));
        assert!(vm.interpret("var t = clock(); print t >= 0;").is_ok());
    }

    #[test]
    fn unbounded_recursion_overflows_the_call_stack() {
        let mut vm = Vm::with_writer(Box::new(SharedBuf::default()));
        let err = vm.interpret("fun rec(n) { return rec(n + 1); } rec(0);").unwrap_err();
        assert!(err.to_string().contains("Stack overflow."));
    }

    #[test]
    fn stress_gc_runs_without_corrupting_results() {
        let buf = SharedBuf::default();
        let mut vm = Vm::with_writer(Box::new(buf.clone()));
        vm.set_stress_gc(true);
        vm.interpret(
            "fun make(x) { fun inner() { return x; } return inner; } \
             var fns = make(1); print fns();",
        )
        .unwrap();
        assert_eq!(String::from_utf8(buf.0.borrow().clone()).unwrap(), "1\n");
    }
}

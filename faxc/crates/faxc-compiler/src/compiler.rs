//! Single-pass Pratt compiler: parses directly into bytecode, resolving
//! locals, up-values and globals as it goes (spec.md §4.4).
//!
//! The `Heap` is owned by the `Compiler` for the lifetime of one `compile`
//! call (swapped in via `mem::take` and swapped back out at the end) rather
//! than borrowed, which sidesteps threading a second lifetime parameter
//! through every `ParseFn` in `rules.rs` — the compiler is the only
//! allocator running while it holds the heap, so ownership is exact, not an
//! approximation.

use crate::error::CompileError;
use crate::rules::{get_rule, Precedence};
use faxc_lex::{Scanner, Token, TokenKind};
use fgc::{FunctionKind, Heap, ObjHandle, OpCode, UpvalueDesc, Value, MAX_JUMP};

const MAX_LOCALS: usize = 256;

struct Local<'src> {
    name: &'src str,
    /// -1 means "declared but not yet defined" (spec.md §4.4).
    depth: i32,
    is_captured: bool,
}

struct FunctionFrame<'src> {
    function: ObjHandle,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueDesc>,
    scope_depth: i32,
}

struct ClassFrame {
    has_superclass: bool,
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    diagnostics: Vec<String>,
    heap: Heap,
    frames: Vec<FunctionFrame<'src>>,
    classes: Vec<ClassFrame>,
}

/// Compiles `source` as the body of an implicit top-level script function
/// (spec.md §4.4 "Compilation entry"). `heap` is borrowed only for the
/// duration of the call (see module docs for why it's held by value inside
/// `Compiler` in the interim).
pub fn compile(source: &str, heap: &mut Heap) -> Result<ObjHandle, CompileError> {
    tracing::debug!(source_len = source.len(), "compile begin");
    let owned = std::mem::take(heap);
    let mut compiler = Compiler::new(source, owned);

    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.emit_return();

    let had_error = compiler.had_error;
    let diagnostics = std::mem::take(&mut compiler.diagnostics);
    let frame = compiler.frames.pop().expect("script frame always present");
    {
        let f = compiler.heap.get_mut(frame.function).as_function_mut().unwrap();
        f.upvalue_count = frame.upvalues.len() as u8;
    }
    *heap = compiler.heap;

    if had_error {
        tracing::debug!(errors = diagnostics.len(), "compile end: failed");
        Err(CompileError { diagnostics })
    } else {
        tracing::debug!("compile end: ok");
        Ok(frame.function)
    }
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str, heap: Heap) -> Self {
        let dummy = Token::new(TokenKind::Eof, "", 0);
        let mut c = Compiler {
            scanner: Scanner::new(source),
            current: dummy,
            previous: dummy,
            had_error: false,
            panic_mode: false,
            diagnostics: Vec::new(),
            heap,
            frames: Vec::new(),
            classes: Vec::new(),
        };
        let handle = c.alloc_function(None);
        c.frames.push(FunctionFrame {
            function: handle,
            kind: FunctionKind::Script,
            // Slot 0 is reserved (empty name) just like every function frame.
            locals: vec![Local { name: "", depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        });
        c
    }

    // ---- token stream ---------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme.to_string();
            self.error_at_current(&message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    // ---- error reporting --------------------------------------------------

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    /// Panic-mode recovery (spec.md §7): the first error per synchronization
    /// window is reported; later ones are swallowed until `synchronize`.
    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.diagnostics.push(format!("[line {}] Error{}: {}", token.line, location, message));
    }

    // ---- heap plumbing ----------------------------------------------------

    /// GC roots while compiling: every function object currently under
    /// construction (spec.md §4.5). Each one's own `blacken_object` already
    /// reaches its constants array, since constants live inside the
    /// `ObjFunction` itself in this arena-based heap.
    fn compiling_roots(&self) -> Vec<ObjHandle> {
        self.frames.iter().map(|f| f.function).collect()
    }

    fn intern(&mut self, bytes: &[u8]) -> ObjHandle {
        let roots = self.compiling_roots();
        self.heap.intern_string(bytes, move |heap| {
            for r in &roots {
                heap.mark_object(*r);
            }
        })
    }

    fn alloc_function(&mut self, name: Option<ObjHandle>) -> ObjHandle {
        let roots = self.compiling_roots();
        self.heap.alloc_function(name, move |heap| {
            for r in &roots {
                heap.mark_object(*r);
            }
        })
    }

    fn current_frame(&self) -> &FunctionFrame<'src> {
        self.frames.last().expect("a frame is always being compiled")
    }

    fn current_frame_mut(&mut self) -> &mut FunctionFrame<'src> {
        self.frames.last_mut().expect("a frame is always being compiled")
    }

    fn chunk_len(&self) -> usize {
        let handle = self.current_frame().function;
        self.heap.get(handle).as_function().unwrap().chunk.code_len()
    }

    // ---- bytecode emission --------------------------------------------------

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        let handle = self.current_frame().function;
        let function = self.heap.get_mut(handle).as_function_mut().unwrap();
        function.chunk.write(byte, line);
    }

    fn emit_bytes(&mut self, a: u8, b: u8) {
        self.emit_byte(a);
        self.emit_byte(b);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_byte(op as u8);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk_len() - offset - 2;
        if jump > MAX_JUMP {
            self.error("Too much code to jump over.");
        }
        let hi = (jump >> 8) as u8;
        let lo = jump as u8;
        let handle = self.current_frame().function;
        let chunk = &mut self.heap.get_mut(handle).as_function_mut().unwrap().chunk;
        chunk.code[offset] = hi;
        chunk.code[offset + 1] = lo;
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_byte(OpCode::Loop as u8);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > MAX_JUMP {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    fn emit_return(&mut self) {
        if self.current_frame().kind == FunctionKind::Initializer {
            self.emit_bytes(OpCode::GetLocal as u8, 0);
        } else {
            self.emit_byte(OpCode::Nil as u8);
        }
        self.emit_byte(OpCode::Return as u8);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let handle = self.current_frame().function;
        let added = self.heap.get_mut(handle).as_function_mut().unwrap().chunk.add_constant(value);
        match added {
            Some(idx) => idx,
            None => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_bytes(OpCode::Constant as u8, constant);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let handle = self.intern(name.as_bytes());
        self.make_constant(Value::Obj(handle))
    }

    // ---- scopes, locals, up-values ------------------------------------------

    fn begin_scope(&mut self) {
        self.current_frame_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_frame_mut().scope_depth -= 1;
        let depth = self.current_frame().scope_depth;
        loop {
            let should_pop = matches!(self.current_frame().locals.last(), Some(l) if l.depth > depth);
            if !should_pop {
                break;
            }
            let captured = self.current_frame().locals.last().unwrap().is_captured;
            self.emit_byte(if captured { OpCode::CloseUpvalue as u8 } else { OpCode::Pop as u8 });
            self.current_frame_mut().locals.pop();
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current_frame().locals.len() >= MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_frame_mut().locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        if self.current_frame().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let depth = self.current_frame().scope_depth;
        let mut duplicate = false;
        for local in self.current_frame().locals.iter().rev() {
            if local.depth != -1 && local.depth < depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, error_message: &str) -> u8 {
        self.consume(TokenKind::Identifier, error_message);
        self.declare_variable();
        if self.current_frame().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn mark_initialized(&mut self) {
        if self.current_frame().scope_depth == 0 {
            return;
        }
        let depth = self.current_frame().scope_depth;
        let frame = self.current_frame_mut();
        let last = frame.locals.len() - 1;
        frame.locals[last].depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.current_frame().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal as u8, global);
    }

    fn resolve_local(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        let locals_len = self.frames[frame_idx].locals.len();
        for i in (0..locals_len).rev() {
            let (local_name, depth) = {
                let local = &self.frames[frame_idx].locals[i];
                (local.name, local.depth)
            };
            if local_name == name {
                if depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, frame_idx: usize, name: &str) -> Option<u8> {
        if frame_idx == 0 {
            return None;
        }
        let enclosing = frame_idx - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.frames[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(frame_idx, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(frame_idx, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, frame_idx: usize, index: u8, is_local: bool) -> u8 {
        let frame = &mut self.frames[frame_idx];
        for (i, uv) in frame.upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if frame.upvalues.len() >= 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        frame.upvalues.push(UpvalueDesc { is_local, index });
        (frame.upvalues.len() - 1) as u8
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let frame_idx = self.frames.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(frame_idx, name.lexeme) {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(slot) = self.resolve_upvalue(frame_idx, name.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, slot)
        } else {
            let constant = self.identifier_constant(name.lexeme);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op as u8, arg);
        } else {
            self.emit_bytes(get_op as u8, arg);
        }
    }

    // ---- Pratt parse rules (see rules.rs for the table) --------------------

    pub(crate) fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    pub(crate) fn unary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Bang => self.emit_byte(OpCode::Not as u8),
            TokenKind::Minus => self.emit_byte(OpCode::Negate as u8),
            _ => unreachable!(),
        }
    }

    pub(crate) fn binary(&mut self, _can_assign: bool) {
        let op = self.previous.kind;
        let rule = get_rule(op);
        self.parse_precedence(rule.precedence.next());
        match op {
            TokenKind::BangEqual => {
                self.emit_byte(OpCode::Equal as u8);
                self.emit_byte(OpCode::Not as u8);
            }
            TokenKind::EqualEqual => self.emit_byte(OpCode::Equal as u8),
            TokenKind::Greater => self.emit_byte(OpCode::Greater as u8),
            TokenKind::GreaterEqual => {
                self.emit_byte(OpCode::Less as u8);
                self.emit_byte(OpCode::Not as u8);
            }
            TokenKind::Less => self.emit_byte(OpCode::Less as u8),
            TokenKind::LessEqual => {
                self.emit_byte(OpCode::Greater as u8);
                self.emit_byte(OpCode::Not as u8);
            }
            TokenKind::Plus => self.emit_byte(OpCode::Add as u8),
            TokenKind::Minus => self.emit_byte(OpCode::Subtract as u8),
            TokenKind::Star => self.emit_byte(OpCode::Multiply as u8),
            TokenKind::Slash => self.emit_byte(OpCode::Divide as u8),
            _ => unreachable!(),
        }
    }

    pub(crate) fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call as u8, arg_count);
    }

    pub(crate) fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name_const = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.matches(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty as u8, name_const);
        } else if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke as u8, name_const);
            self.emit_byte(arg_count);
        } else {
            self.emit_bytes(OpCode::GetProperty as u8, name_const);
        }
    }

    pub(crate) fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_byte(OpCode::False as u8),
            TokenKind::Nil => self.emit_byte(OpCode::Nil as u8),
            TokenKind::True => self.emit_byte(OpCode::True as u8),
            _ => unreachable!(),
        }
    }

    pub(crate) fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner only emits well-formed numbers");
        self.emit_constant(Value::Number(value));
    }

    pub(crate) fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let bytes = lexeme[1..lexeme.len() - 1].as_bytes();
        let handle = self.intern(bytes);
        self.emit_constant(Value::Obj(handle));
    }

    pub(crate) fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    pub(crate) fn this(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        let name = self.previous;
        self.named_variable(name, false);
    }

    pub(crate) fn super_(&mut self, _can_assign: bool) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name_const = self.identifier_constant(self.previous.lexeme);
        let line = self.previous.line;

        self.named_variable(Token::new(TokenKind::Identifier, "this", line), false);
        if self.matches(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable(Token::new(TokenKind::Identifier, "super", line), false);
            self.emit_bytes(OpCode::SuperInvoke as u8, name_const);
            self.emit_byte(arg_count);
        } else {
            self.named_variable(Token::new(TokenKind::Identifier, "super", line), false);
            self.emit_bytes(OpCode::GetSuper as u8, name_const);
        }
    }

    pub(crate) fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_byte(OpCode::Pop as u8);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    pub(crate) fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_byte(OpCode::Pop as u8);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u8 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count = count.saturating_add(1);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = match get_rule(self.previous.kind).prefix {
            Some(f) => f,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);

        while precedence <= get_rule(self.current.kind).precedence {
            self.advance();
            let infix = get_rule(self.previous.kind).infix.expect("precedence table is internally consistent");
            infix(self, can_assign);
        }

        if can_assign && self.matches(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn function(&mut self, kind: FunctionKind) {
        let name = self.previous.lexeme;
        tracing::trace!(name, ?kind, "compiling function");
        let name_handle = if kind != FunctionKind::Script {
            Some(self.intern(self.previous.lexeme.as_bytes()))
        } else {
            None
        };
        let function_handle = self.alloc_function(name_handle);
        let slot0_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) { "this" } else { "" };
        self.frames.push(FunctionFrame {
            function: function_handle,
            kind,
            locals: vec![Local { name: slot0_name, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        });

        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let handle = self.current_frame().function;
                let arity = self.heap.get(handle).as_function().unwrap().arity;
                if arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.heap.get_mut(handle).as_function_mut().unwrap().arity = arity.saturating_add(1);
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();
        self.emit_return();

        let frame = self.frames.pop().expect("just pushed");
        {
            let f = self.heap.get_mut(frame.function).as_function_mut().unwrap();
            f.upvalue_count = frame.upvalues.len() as u8;
        }
        tracing::trace!(name, upvalues = frame.upvalues.len(), "function compiled");
        let const_idx = self.make_constant(Value::Obj(frame.function));
        self.emit_bytes(OpCode::Closure as u8, const_idx);
        for uv in &frame.upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_const = self.identifier_constant(self.previous.lexeme);
        let kind = if self.previous.lexeme == "init" { FunctionKind::Initializer } else { FunctionKind::Method };
        self.function(kind);
        self.emit_bytes(OpCode::Method as u8, name_const);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_const = self.identifier_constant(class_name.lexeme);
        self.declare_variable();

        self.emit_bytes(OpCode::Class as u8, name_const);
        self.define_variable(name_const);

        self.classes.push(ClassFrame { has_superclass: false });

        if self.matches(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            self.variable(false);
            if self.previous.lexeme == class_name.lexeme {
                self.error("A class can't inherit from itself.");
            }

            self.begin_scope();
            self.add_local("super");
            self.define_variable(0);

            self.named_variable(class_name, false);
            self.emit_byte(OpCode::Inherit as u8);
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_byte(OpCode::Pop as u8);

        let class_frame = self.classes.pop().expect("just pushed");
        if class_frame.has_superclass {
            self.end_scope();
        }
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.matches(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_byte(OpCode::Nil as u8);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_byte(OpCode::Pop as u8);
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_byte(OpCode::Print as u8);
    }

    fn return_statement(&mut self) {
        if self.current_frame().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.matches(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current_frame().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_byte(OpCode::Return as u8);
        }
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_byte(OpCode::Pop as u8);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_byte(OpCode::Pop as u8);
        if self.matches(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_byte(OpCode::Pop as u8);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_byte(OpCode::Pop as u8);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.matches(TokenKind::Semicolon) {
            // no initializer
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump: Option<usize> = None;
        if !self.matches(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_byte(OpCode::Pop as u8);
        }

        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_byte(OpCode::Pop as u8);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_byte(OpCode::Pop as u8);
        }

        self.end_scope();
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if self.matches(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.matches(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn try_compile(src: &str) -> Result<ObjHandle, CompileError> {
        let mut heap = Heap::new();
        compile(src, &mut heap)
    }

    #[test]
    fn simple_expression_statement_compiles() {
        assert!(try_compile("print 1 + 2 * 3;").is_ok());
    }

    #[test]
    fn closures_and_classes_compile() {
        assert!(try_compile("fun make(x) { fun inner() { return x; } return inner; } print make(42)();").is_ok());
        assert!(try_compile(
            "class A { init(v) { this.v = v; } } class B < A { show() { print this.v; } } B(7).show();"
        )
        .is_ok());
    }

    #[test]
    fn top_level_return_is_an_error() {
        let err = try_compile("return 1;").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("Can't return from top-level code.")));
    }

    #[test]
    fn class_cannot_inherit_from_itself() {
        let err = try_compile("class A < A {}").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("A class can't inherit from itself.")));
    }

    #[test]
    fn invalid_assignment_target_is_an_error() {
        let err = try_compile("1 + 2 = 3;").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("Invalid assignment target.")));
    }

    #[test]
    fn shadowing_a_local_in_the_same_scope_is_an_error() {
        let err = try_compile("{ var a = 1; var a = 2; }").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("Already a variable with this name in this scope.")));
    }

    #[test]
    fn shadowing_across_nested_scopes_is_fine() {
        assert!(try_compile("var a = 1; { var a = 2; print a; }").is_ok());
    }

    #[test]
    fn reading_local_in_its_own_initializer_is_an_error() {
        let err = try_compile("{ var a = a; }").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("Can't read local variable in its own initializer.")));
    }

    #[test]
    fn this_outside_class_is_an_error() {
        let err = try_compile("print this;").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("Can't use 'this' outside of a class.")));
    }

    #[test]
    fn super_without_superclass_is_an_error() {
        let err = try_compile("class A { f() { super.f(); } }").unwrap_err();
        assert!(err.diagnostics.iter().any(|d| d.contains("Can't use 'super' in a class with no superclass.")));
    }

    #[test]
    fn exactly_256_locals_fits_257th_does_not() {
        // The top-level frame already reserves slot 0, so 255 user locals
        // is the boundary (255 + 1 reserved = 256 = MAX_LOCALS).
        let mut src = String::from("{");
        for i in 0..256 {
            src.push_str(&format!("var v{i} = {i};"));
        }
        src.push('}');
        assert!(try_compile(&src).is_err());

        let mut src_ok = String::from("{");
        for i in 0..255 {
            src_ok.push_str(&format!("var v{i} = {i};"));
        }
        src_ok.push('}');
        assert!(try_compile(&src_ok).is_ok());
    }

    #[test]
    fn empty_program_compiles() {
        assert!(try_compile("").is_ok());
    }

    #[quickcheck_macros::quickcheck]
    fn compiling_the_same_source_twice_yields_identical_chunks(seed: u8) -> bool {
        let src = format!("var a = {seed}; fun f(x) {{ return x + a; }} print f({seed});");
        let mut heap_a = Heap::new();
        let mut heap_b = Heap::new();
        let fn_a = compile(&src, &mut heap_a).unwrap();
        let fn_b = compile(&src, &mut heap_b).unwrap();
        let chunk_a = &heap_a.get(fn_a).as_function().unwrap().chunk;
        let chunk_b = &heap_b.get(fn_b).as_function().unwrap().chunk;
        chunk_a.code_len() == chunk_b.code_len()
            && (0..chunk_a.code_len()).all(|i| chunk_a.code[i] == chunk_b.code[i])
    }
}

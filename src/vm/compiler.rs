use std::collections::HashMap;
use std::rc::Rc;

use crate::error::CompileError;
use crate::parser::ast::*;
use super::builtins::BUILTINS;
use super::value::{CompiledFunction, Value};

// ── Opcodes ───────────────────────────────────────
pub const OP_CONSTANT: u8 = 0;
pub const OP_ADD: u8 = 1;
pub const OP_SUB: u8 = 2;
pub const OP_MUL: u8 = 3;
pub const OP_DIV: u8 = 4;
pub const OP_POP: u8 = 5;
pub const OP_TRUE: u8 = 6;
pub const OP_FALSE: u8 = 7;
pub const OP_NULL: u8 = 8;
pub const OP_EQUAL: u8 = 9;
pub const OP_NOT_EQUAL: u8 = 10;
pub const OP_GREATER_THAN: u8 = 11;
pub const OP_NEGATE: u8 = 12;
pub const OP_NOT: u8 = 13;
pub const OP_JUMP_IF_FALSE: u8 = 14;
pub const OP_JUMP: u8 = 15;
pub const OP_SET_GLOBAL: u8 = 16;
pub const OP_GET_GLOBAL: u8 = 17;
pub const OP_SET_LOCAL: u8 = 18;
pub const OP_GET_LOCAL: u8 = 19;
pub const OP_GET_BUILTIN: u8 = 20;
pub const OP_ARRAY: u8 = 21;
pub const OP_HASH: u8 = 22;
pub const OP_INDEX: u8 = 23;
pub const OP_CALL: u8 = 24;
pub const OP_RETURN_VALUE: u8 = 25;
pub const OP_RETURN: u8 = 26;

pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

pub fn lookup(op: u8) -> Definition {
    match op {
        OP_CONSTANT => Definition { name: "OpConstant", operand_widths: &[2] },
        OP_ADD => Definition { name: "OpAdd", operand_widths: &[] },
        OP_SUB => Definition { name: "OpSub", operand_widths: &[] },
        OP_MUL => Definition { name: "OpMul", operand_widths: &[] },
        OP_DIV => Definition { name: "OpDiv", operand_widths: &[] },
        OP_POP => Definition { name: "OpPop", operand_widths: &[] },
        OP_TRUE => Definition { name: "OpTrue", operand_widths: &[] },
        OP_FALSE => Definition { name: "OpFalse", operand_widths: &[] },
        OP_NULL => Definition { name: "OpNull", operand_widths: &[] },
        OP_EQUAL => Definition { name: "OpEqual", operand_widths: &[] },
        OP_NOT_EQUAL => Definition { name: "OpNotEqual", operand_widths: &[] },
        OP_GREATER_THAN => Definition { name: "OpGreaterThan", operand_widths: &[] },
        OP_NEGATE => Definition { name: "OpNegate", operand_widths: &[] },
        OP_NOT => Definition { name: "OpNot", operand_widths: &[] },
        OP_JUMP_IF_FALSE => Definition { name: "OpJumpIfFalse", operand_widths: &[2] },
        OP_JUMP => Definition { name: "OpJump", operand_widths: &[2] },
        OP_SET_GLOBAL => Definition { name: "OpSetGlobal", operand_widths: &[2] },
        OP_GET_GLOBAL => Definition { name: "OpGetGlobal", operand_widths: &[2] },
        OP_SET_LOCAL => Definition { name: "OpSetLocal", operand_widths: &[1] },
        OP_GET_LOCAL => Definition { name: "OpGetLocal", operand_widths: &[1] },
        OP_GET_BUILTIN => Definition { name: "OpGetBuiltin", operand_widths: &[1] },
        OP_ARRAY => Definition { name: "OpArray", operand_widths: &[2] },
        OP_HASH => Definition { name: "OpHash", operand_widths: &[2] },
        OP_INDEX => Definition { name: "OpIndex", operand_widths: &[] },
        OP_CALL => Definition { name: "OpCall", operand_widths: &[1] },
        OP_RETURN_VALUE => Definition { name: "OpReturnValue", operand_widths: &[] },
        OP_RETURN => Definition { name: "OpReturn", operand_widths: &[] },
        _ => Definition { name: "OpUnknown", operand_widths: &[] },
    }
}

// ── Operand codec ─────────────────────────────────
// All multi-byte operands are big-endian unsigned.

pub fn put_u16(buf: &mut Vec<u8>, value: u16) {
    buf.push((value >> 8) as u8);
    buf.push(value as u8);
}

pub fn read_u16(bytes: &[u8], at: usize) -> u16 {
    ((bytes[at] as u16) << 8) | bytes[at + 1] as u16
}

/// Encode one instruction.
pub fn make(op: u8, operands: &[usize]) -> Vec<u8> {
    let def = lookup(op);
    let mut out = vec![op];
    for (width, operand) in def.operand_widths.iter().zip(operands) {
        match width {
            2 => put_u16(&mut out, *operand as u16),
            _ => out.push(*operand as u8),
        }
    }
    out
}

/// Human-readable instruction listing, one `offset name operands` line per
/// instruction.
pub fn disassemble(instructions: &[u8]) -> String {
    let mut out = String::new();
    let mut ip = 0;
    while ip < instructions.len() {
        let def = lookup(instructions[ip]);
        let mut operands = Vec::new();
        let mut read = 0;
        for width in def.operand_widths {
            let operand = match width {
                2 => read_u16(instructions, ip + 1 + read) as usize,
                _ => instructions[ip + 1 + read] as usize,
            };
            operands.push(operand.to_string());
            read += width;
        }
        if operands.is_empty() {
            out.push_str(&format!("{ip:04} {}\n", def.name));
        } else {
            out.push_str(&format!("{ip:04} {} {}\n", def.name, operands.join(" ")));
        }
        ip += 1 + read;
    }
    out
}

// ── Symbol table ──────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope { Global, Local, Builtin }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub scope: SymbolScope,
    pub index: usize,
}

#[derive(Default)]
struct ScopeFrame {
    symbols: HashMap<String, Symbol>,
    num_definitions: usize,
}

/// Lexical scopes as a stack of frames; resolution is a reverse scan, with
/// the builtin table consulted after every lexical scope misses.
pub struct SymbolTable {
    frames: Vec<ScopeFrame>,
    builtins: HashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        let builtins = BUILTINS
            .iter()
            .enumerate()
            .map(|(index, b)| (b.name.to_string(), Symbol { scope: SymbolScope::Builtin, index }))
            .collect();
        Self { frames: vec![ScopeFrame::default()], builtins }
    }

    /// Bind `name` in the current scope, assigning the next free slot.
    /// Redefining a name takes a fresh slot and shadows the old binding.
    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = if self.frames.len() == 1 { SymbolScope::Global } else { SymbolScope::Local };
        let frame = self.frames.last_mut().unwrap();
        let symbol = Symbol { scope, index: frame.num_definitions };
        frame.symbols.insert(name.to_string(), symbol);
        frame.num_definitions += 1;
        symbol
    }

    pub fn resolve(&self, name: &str) -> Option<Symbol> {
        for frame in self.frames.iter().rev() {
            if let Some(symbol) = frame.symbols.get(name) {
                return Some(*symbol);
            }
        }
        self.builtins.get(name).copied()
    }

    pub fn push_scope(&mut self) {
        self.frames.push(ScopeFrame::default());
    }

    pub fn pop_scope(&mut self) -> usize {
        if self.frames.len() > 1 {
            self.frames.pop().map(|f| f.num_definitions).unwrap_or(0)
        } else {
            0
        }
    }

    /// Slot count of the current scope.
    pub fn num_definitions(&self) -> usize {
        self.frames.last().map(|f| f.num_definitions).unwrap_or(0)
    }
}

impl Default for SymbolTable {
    fn default() -> Self { Self::new() }
}

// ── Compiler ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Vec<u8>,
    pub constants: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EmittedInstruction {
    opcode: u8,
    position: usize,
}

#[derive(Default)]
struct CompilationScope {
    instructions: Vec<u8>,
    last: Option<EmittedInstruction>,
    previous: Option<EmittedInstruction>,
}

pub struct Compiler {
    constants: Vec<Value>,
    symbols: SymbolTable,
    scopes: Vec<CompilationScope>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_state(SymbolTable::new(), Vec::new())
    }

    /// Resume with the symbol table and constant pool of a previous
    /// compilation; this is what keeps REPL sessions incremental.
    pub fn with_state(symbols: SymbolTable, constants: Vec<Value>) -> Self {
        Self { constants, symbols, scopes: vec![CompilationScope::default()] }
    }

    pub fn compile(&mut self, program: &[Stmt]) -> Result<(), CompileError> {
        let result = self.compile_block(program);
        if result.is_err() {
            // A failed compile may abort inside a function literal; unwind
            // so a resumed session starts back at the global scope.
            while self.scopes.len() > 1 {
                self.leave_scope();
            }
        }
        result
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.scopes[0].instructions.clone(),
            constants: self.constants.clone(),
        }
    }

    pub fn into_state(self) -> (SymbolTable, Vec<Value>) {
        (self.symbols, self.constants)
    }

    // ── Emission ──────────────────────────────────

    fn scope(&self) -> &CompilationScope { self.scopes.last().unwrap() }
    fn scope_mut(&mut self) -> &mut CompilationScope { self.scopes.last_mut().unwrap() }

    fn emit(&mut self, op: u8, operands: &[usize]) -> usize {
        let encoded = make(op, operands);
        let scope = self.scope_mut();
        let position = scope.instructions.len();
        scope.instructions.extend(encoded);
        scope.previous = scope.last;
        scope.last = Some(EmittedInstruction { opcode: op, position });
        position
    }

    fn add_constant(&mut self, value: Value) -> usize {
        self.constants.push(value);
        self.constants.len() - 1
    }

    fn last_is(&self, op: u8) -> bool {
        self.scope().last.map(|l| l.opcode) == Some(op)
    }

    fn remove_last_pop(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last {
            scope.instructions.truncate(last.position);
            scope.last = scope.previous;
            scope.previous = None;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = self.scope_mut();
        if let Some(last) = scope.last.as_mut() {
            scope.instructions[last.position] = OP_RETURN_VALUE;
            last.opcode = OP_RETURN_VALUE;
        }
    }

    /// Point the jump at `at` to the current end of the instruction stream.
    fn patch_jump(&mut self, at: usize) {
        let target = self.scope().instructions.len();
        let scope = self.scope_mut();
        scope.instructions[at + 1] = (target >> 8) as u8;
        scope.instructions[at + 2] = target as u8;
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.symbols.push_scope();
    }

    fn leave_scope(&mut self) -> Vec<u8> {
        self.symbols.pop_scope();
        self.scopes.pop().map(|s| s.instructions).unwrap_or_default()
    }

    // ── Statements ────────────────────────────────

    fn compile_block(&mut self, stmts: &[Stmt]) -> Result<(), CompileError> {
        for stmt in stmts {
            self.compile_stmt(stmt)?;
        }
        Ok(())
    }

    fn compile_stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Let { name, value } => {
                let symbol = self.symbols.define(name);
                self.compile_expr(value)?;
                match symbol.scope {
                    SymbolScope::Global => self.emit(OP_SET_GLOBAL, &[symbol.index]),
                    _ => self.emit(OP_SET_LOCAL, &[symbol.index]),
                };
                Ok(())
            }
            Stmt::Return(value) => {
                match value {
                    Some(expr) => self.compile_expr(expr)?,
                    None => { self.emit(OP_NULL, &[]); }
                }
                self.emit(OP_RETURN_VALUE, &[]);
                Ok(())
            }
            Stmt::Expr(expr) => {
                self.compile_expr(expr)?;
                self.emit(OP_POP, &[]);
                Ok(())
            }
        }
    }

    // ── Expressions ───────────────────────────────

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int(n) => {
                let idx = self.add_constant(Value::Int(*n));
                self.emit(OP_CONSTANT, &[idx]);
                Ok(())
            }
            Expr::Bool(true) => { self.emit(OP_TRUE, &[]); Ok(()) }
            Expr::Bool(false) => { self.emit(OP_FALSE, &[]); Ok(()) }
            Expr::Str(s) => {
                let idx = self.add_constant(Value::Str(Rc::from(s.as_str())));
                self.emit(OP_CONSTANT, &[idx]);
                Ok(())
            }
            Expr::Ident(name) => {
                let symbol = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| CompileError::UndefinedVariable(name.clone()))?;
                self.load_symbol(symbol);
                Ok(())
            }
            Expr::Prefix { op, right } => {
                self.compile_expr(right)?;
                match op {
                    PrefixOp::Neg => self.emit(OP_NEGATE, &[]),
                    PrefixOp::Not => self.emit(OP_NOT, &[]),
                };
                Ok(())
            }
            Expr::Infix { left, op, right } => {
                // There is no less-than opcode; `a < b` compiles as `b > a`.
                if *op == InfixOp::Lt {
                    self.compile_expr(right)?;
                    self.compile_expr(left)?;
                    self.emit(OP_GREATER_THAN, &[]);
                    return Ok(());
                }
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                match op {
                    InfixOp::Add => self.emit(OP_ADD, &[]),
                    InfixOp::Sub => self.emit(OP_SUB, &[]),
                    InfixOp::Mul => self.emit(OP_MUL, &[]),
                    InfixOp::Div => self.emit(OP_DIV, &[]),
                    InfixOp::Gt => self.emit(OP_GREATER_THAN, &[]),
                    InfixOp::Eq => self.emit(OP_EQUAL, &[]),
                    InfixOp::NotEq => self.emit(OP_NOT_EQUAL, &[]),
                    InfixOp::Lt => unreachable!("handled above"),
                };
                Ok(())
            }
            Expr::Array(items) => {
                for item in items {
                    self.compile_expr(item)?;
                }
                self.emit(OP_ARRAY, &[items.len()]);
                Ok(())
            }
            Expr::Hash(pairs) => {
                // Key order in source is irrelevant at runtime; sorting by the
                // key's source form keeps the emitted stream deterministic.
                let mut pairs: Vec<&(Expr, Expr)> = pairs.iter().collect();
                pairs.sort_by_cached_key(|pair| pair.0.to_string());
                for (key, value) in pairs.iter().map(|p| (&p.0, &p.1)) {
                    self.compile_expr(key)?;
                    self.compile_expr(value)?;
                }
                self.emit(OP_HASH, &[pairs.len() * 2]);
                Ok(())
            }
            Expr::Index { left, index } => {
                self.compile_expr(left)?;
                self.compile_expr(index)?;
                self.emit(OP_INDEX, &[]);
                Ok(())
            }
            Expr::If { cond, consequence, alternative } => {
                self.compile_expr(cond)?;
                let jump_if_false = self.emit(OP_JUMP_IF_FALSE, &[0xFFFF]);
                self.compile_branch(consequence)?;
                let jump = self.emit(OP_JUMP, &[0xFFFF]);
                self.patch_jump(jump_if_false);
                match alternative {
                    Some(alt) => self.compile_branch(alt)?,
                    None => { self.emit(OP_NULL, &[]); }
                }
                self.patch_jump(jump);
                Ok(())
            }
            Expr::Function { params, body } => {
                self.enter_scope();
                for param in params {
                    self.symbols.define(param);
                }
                self.compile_block(body)?;
                if self.last_is(OP_POP) {
                    self.replace_last_pop_with_return();
                }
                if !self.last_is(OP_RETURN_VALUE) {
                    self.emit(OP_RETURN, &[]);
                }
                let num_locals = self.symbols.num_definitions();
                let instructions = self.leave_scope();
                let func = CompiledFunction { instructions, num_locals, num_parameters: params.len() };
                let idx = self.add_constant(Value::Function(Rc::new(func)));
                self.emit(OP_CONSTANT, &[idx]);
                Ok(())
            }
            Expr::Call { func, args } => {
                self.compile_expr(func)?;
                for arg in args {
                    self.compile_expr(arg)?;
                }
                self.emit(OP_CALL, &[args.len()]);
                Ok(())
            }
        }
    }

    /// An if-branch must leave exactly one value behind: drop the trailing
    /// `OpPop` of an expression statement, and fill in null for branches
    /// that produce nothing (empty, or ending in a let).
    fn compile_branch(&mut self, block: &[Stmt]) -> Result<(), CompileError> {
        self.compile_block(block)?;
        if self.last_is(OP_POP) {
            self.remove_last_pop();
        } else if !self.last_is(OP_RETURN_VALUE) {
            self.emit(OP_NULL, &[]);
        }
        Ok(())
    }

    fn load_symbol(&mut self, symbol: Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(OP_GET_GLOBAL, &[symbol.index]),
            SymbolScope::Local => self.emit(OP_GET_LOCAL, &[symbol.index]),
            SymbolScope::Builtin => self.emit(OP_GET_BUILTIN, &[symbol.index]),
        };
    }
}

impl Default for Compiler {
    fn default() -> Self { Self::new() }
}

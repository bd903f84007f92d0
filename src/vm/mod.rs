pub mod builtins;
pub mod compiler;
pub mod value;

use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuntimeError;
use self::builtins::BUILTINS;
use self::compiler::*;
use self::value::*;

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

/// One function invocation. Parameters and locals occupy the stack region
/// starting at `base_pointer`.
struct Frame {
    func: Rc<CompiledFunction>,
    ip: usize,
    base_pointer: usize,
}

pub struct VM<'a> {
    constants: &'a [Value],
    stack: Vec<Value>,
    sp: usize,
    globals: Vec<Value>,
    frames: Vec<Frame>,
    last_popped: Value,
}

impl<'a> VM<'a> {
    pub fn new(bytecode: &'a Bytecode) -> Self {
        Self::with_globals(bytecode, vec![Value::Null; GLOBALS_SIZE])
    }

    /// Run against an externally owned globals vector, so a REPL can carry
    /// definitions across programs.
    pub fn with_globals(bytecode: &'a Bytecode, globals: Vec<Value>) -> Self {
        let main = Rc::new(CompiledFunction {
            instructions: bytecode.instructions.clone(),
            num_locals: 0,
            num_parameters: 0,
        });
        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame { func: main, ip: 0, base_pointer: 0 });
        Self {
            constants: &bytecode.constants,
            stack: vec![Value::Null; STACK_SIZE],
            sp: 0,
            globals,
            frames,
            last_popped: Value::Null,
        }
    }

    pub fn into_globals(self) -> Vec<Value> {
        self.globals
    }

    fn frame(&self) -> &Frame { self.frames.last().unwrap() }
    fn frame_mut(&mut self) -> &mut Frame { self.frames.last_mut().unwrap() }

    fn push(&mut self, value: Value) -> Result<(), RuntimeError> {
        if self.sp >= STACK_SIZE {
            return Err(RuntimeError::StackOverflow);
        }
        self.stack[self.sp] = value;
        self.sp += 1;
        Ok(())
    }

    fn pop(&mut self) -> Value {
        self.sp -= 1;
        std::mem::replace(&mut self.stack[self.sp], Value::Null)
    }

    /// Fetch-decode-execute until the outermost frame runs off the end of
    /// its instructions. The result is the value the last `OpPop` discarded.
    pub fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            let func = Rc::clone(&self.frame().func);
            let ins = &func.instructions;
            let ip = self.frame().ip;
            if ip >= ins.len() {
                break;
            }
            let op = ins[ip];
            self.frame_mut().ip = ip + 1;

            match op {
                OP_CONSTANT => {
                    let idx = read_u16(ins, ip + 1) as usize;
                    self.frame_mut().ip = ip + 3;
                    let value = self.constants[idx].clone();
                    self.push(value)?;
                }
                OP_TRUE => self.push(Value::Bool(true))?,
                OP_FALSE => self.push(Value::Bool(false))?,
                OP_NULL => self.push(Value::Null)?,
                OP_POP => self.last_popped = self.pop(),

                OP_ADD | OP_SUB | OP_MUL | OP_DIV => {
                    let right = self.pop();
                    let left = self.pop();
                    let value = Self::binary_op(op, left, right)?;
                    self.push(value)?;
                }
                OP_EQUAL | OP_NOT_EQUAL => {
                    let right = self.pop();
                    let left = self.pop();
                    let eq = left == right;
                    self.push(Value::Bool(if op == OP_EQUAL { eq } else { !eq }))?;
                }
                OP_GREATER_THAN => {
                    let right = self.pop();
                    let left = self.pop();
                    match (left, right) {
                        (Value::Int(a), Value::Int(b)) => self.push(Value::Bool(a > b))?,
                        (left, right) => return Err(Self::infix_error(">", left, right)),
                    }
                }
                OP_NEGATE => {
                    let operand = self.pop();
                    match operand {
                        Value::Int(n) => self.push(Value::Int(n.wrapping_neg()))?,
                        other => {
                            return Err(RuntimeError::UnknownPrefixOperator {
                                op: "-",
                                operand: other.type_name(),
                            })
                        }
                    }
                }
                OP_NOT => {
                    let operand = self.pop();
                    let negated = match operand {
                        Value::Bool(b) => !b,
                        Value::Null => true,
                        _ => false,
                    };
                    self.push(Value::Bool(negated))?;
                }

                OP_JUMP => {
                    self.frame_mut().ip = read_u16(ins, ip + 1) as usize;
                }
                OP_JUMP_IF_FALSE => {
                    let target = read_u16(ins, ip + 1) as usize;
                    self.frame_mut().ip = ip + 3;
                    let condition = self.pop();
                    if !condition.is_truthy() {
                        self.frame_mut().ip = target;
                    }
                }

                OP_SET_GLOBAL => {
                    let idx = read_u16(ins, ip + 1) as usize;
                    self.frame_mut().ip = ip + 3;
                    self.globals[idx] = self.pop();
                }
                OP_GET_GLOBAL => {
                    let idx = read_u16(ins, ip + 1) as usize;
                    self.frame_mut().ip = ip + 3;
                    let value = self.globals[idx].clone();
                    self.push(value)?;
                }
                OP_SET_LOCAL => {
                    let idx = ins[ip + 1] as usize;
                    self.frame_mut().ip = ip + 2;
                    let base = self.frame().base_pointer;
                    let value = self.pop();
                    self.stack[base + idx] = value;
                }
                OP_GET_LOCAL => {
                    let idx = ins[ip + 1] as usize;
                    self.frame_mut().ip = ip + 2;
                    let base = self.frame().base_pointer;
                    let value = self.stack[base + idx].clone();
                    self.push(value)?;
                }
                OP_GET_BUILTIN => {
                    let idx = ins[ip + 1] as usize;
                    self.frame_mut().ip = ip + 2;
                    self.push(Value::Builtin(idx))?;
                }

                OP_ARRAY => {
                    let n = read_u16(ins, ip + 1) as usize;
                    self.frame_mut().ip = ip + 3;
                    let items = self.stack[self.sp - n..self.sp].to_vec();
                    self.sp -= n;
                    self.push(Value::Array(Rc::new(items)))?;
                }
                OP_HASH => {
                    let n = read_u16(ins, ip + 1) as usize;
                    self.frame_mut().ip = ip + 3;
                    let start = self.sp - n;
                    let mut map = HashMap::with_capacity(n / 2);
                    for pair in self.stack[start..self.sp].chunks(2) {
                        let key = pair[0]
                            .hash_key()
                            .ok_or_else(|| RuntimeError::UnusableHashKey(pair[0].type_name()))?;
                        map.insert(key, pair[1].clone());
                    }
                    self.sp = start;
                    self.push(Value::Hash(Rc::new(map)))?;
                }
                OP_INDEX => {
                    let index = self.pop();
                    let target = self.pop();
                    let value = match (target, index) {
                        (Value::Array(items), Value::Int(i)) => {
                            if i < 0 || i as usize >= items.len() {
                                Value::Null
                            } else {
                                items[i as usize].clone()
                            }
                        }
                        (Value::Hash(map), key) => {
                            let key = key
                                .hash_key()
                                .ok_or_else(|| RuntimeError::UnusableHashKey(key.type_name()))?;
                            map.get(&key).cloned().unwrap_or(Value::Null)
                        }
                        (other, _) => return Err(RuntimeError::IndexNotSupported(other.type_name())),
                    };
                    self.push(value)?;
                }

                OP_CALL => {
                    let argc = ins[ip + 1] as usize;
                    self.frame_mut().ip = ip + 2;
                    self.call(argc)?;
                }
                OP_RETURN_VALUE | OP_RETURN => {
                    let value = if op == OP_RETURN_VALUE { self.pop() } else { Value::Null };
                    let frame = self.frames.pop().unwrap();
                    if self.frames.is_empty() {
                        // A return in the outermost frame ends the program.
                        self.last_popped = value;
                        break;
                    }
                    self.sp = frame.base_pointer - 1;
                    self.push(value)?;
                }

                other => unreachable!("unknown opcode {other}"),
            }
        }
        Ok(self.last_popped.clone())
    }

    fn call(&mut self, argc: usize) -> Result<(), RuntimeError> {
        let callee = self.stack[self.sp - 1 - argc].clone();
        match callee {
            Value::Function(func) => {
                if argc != func.num_parameters {
                    return Err(RuntimeError::WrongArity { want: func.num_parameters, got: argc });
                }
                if self.frames.len() >= MAX_FRAMES {
                    return Err(RuntimeError::StackOverflow);
                }
                let base_pointer = self.sp - argc;
                if base_pointer + func.num_locals > STACK_SIZE {
                    return Err(RuntimeError::StackOverflow);
                }
                // The arguments already sit in the first `argc` local slots.
                self.sp = base_pointer + func.num_locals;
                self.frames.push(Frame { func, ip: 0, base_pointer });
                Ok(())
            }
            Value::Builtin(idx) => {
                let args = self.stack[self.sp - argc..self.sp].to_vec();
                let result = (BUILTINS[idx].func)(&args)?;
                self.sp -= argc + 1;
                self.push(result)
            }
            other => Err(RuntimeError::NotAFunction(other.type_name())),
        }
    }

    fn binary_op(op: u8, left: Value, right: Value) -> Result<Value, RuntimeError> {
        match (left, right) {
            (Value::Int(a), Value::Int(b)) => match op {
                OP_ADD => Ok(Value::Int(a.wrapping_add(b))),
                OP_SUB => Ok(Value::Int(a.wrapping_sub(b))),
                OP_MUL => Ok(Value::Int(a.wrapping_mul(b))),
                _ => {
                    if b == 0 {
                        return Err(RuntimeError::DivisionByZero);
                    }
                    Ok(Value::Int(a.wrapping_div(b)))
                }
            },
            (Value::Str(a), Value::Str(b)) if op == OP_ADD => {
                Ok(Value::Str(Rc::from(format!("{a}{b}"))))
            }
            (left, right) => Err(Self::infix_error(Self::op_symbol(op), left, right)),
        }
    }

    fn infix_error(op: &'static str, left: Value, right: Value) -> RuntimeError {
        let (left, right) = (left.type_name(), right.type_name());
        if left == right {
            RuntimeError::UnknownInfixOperator { left, op, right }
        } else {
            RuntimeError::TypeMismatch { left, op, right }
        }
    }

    fn op_symbol(op: u8) -> &'static str {
        match op {
            OP_ADD => "+",
            OP_SUB => "-",
            OP_MUL => "*",
            OP_DIV => "/",
            OP_GREATER_THAN => ">",
            _ => "?",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn run_source(source: &str) -> Result<Value, RuntimeError> {
        let tokens = Lexer::new(source).tokenize();
        let program = Parser::new(tokens).parse().expect("parse failed");
        let mut compiler = Compiler::new();
        compiler.compile(&program).expect("compile failed");
        let bytecode = compiler.bytecode();
        let mut vm = VM::new(&bytecode);
        vm.run()
    }

    fn run_ok(source: &str) -> Value {
        run_source(source).unwrap_or_else(|e| panic!("runtime error for {source:?}: {e}"))
    }

    fn assert_ints(cases: &[(&str, i64)]) {
        for (source, want) in cases {
            assert_eq!(run_ok(source), Value::Int(*want), "{source:?}");
        }
    }

    fn assert_bools(cases: &[(&str, bool)]) {
        for (source, want) in cases {
            assert_eq!(run_ok(source), Value::Bool(*want), "{source:?}");
        }
    }

    fn assert_errors(cases: &[(&str, RuntimeError)]) {
        for (source, want) in cases {
            assert_eq!(run_source(source), Err(want.clone()), "{source:?}");
        }
    }

    #[test]
    fn integer_arithmetic() {
        assert_ints(&[
            ("1", 1),
            ("2", 2),
            ("1 + 2", 3),
            ("1 - 2", -1),
            ("1 * 2", 2),
            ("4 / 2", 2),
            ("50 / 2 * 2 + 10 - 5", 55),
            ("5 * (2 + 10)", 60),
            ("-5", -5),
            ("-50 + 100 + -50", 0),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", 50),
            ("1 + 2 * 3", 7),
        ]);
    }

    #[test]
    fn boolean_expressions() {
        assert_bools(&[
            ("true", true),
            ("false", false),
            ("1 < 2", true),
            ("1 > 2", false),
            ("1 == 1", true),
            ("1 != 1", false),
            ("true == true", true),
            ("true != false", true),
            ("(1 < 2) == true", true),
            ("!true", false),
            ("!!true", true),
            ("!5", false),
            ("!!5", true),
            ("!(if (false) { 5; })", true),
        ]);
    }

    #[test]
    fn conditionals() {
        assert_ints(&[
            ("if (true) { 10 }", 10),
            ("if (1) { 10 }", 10),
            ("if (0) { 10 }", 10), // zero is truthy
            ("if (1 > 2) { 10 } else { 20 }", 20),
            ("if (1 < 2) { 10 } else { 20 }", 10),
            ("if ((if (false) { 10 })) { 10 } else { 20 }", 20),
        ]);
        assert_eq!(run_ok("if (false) { 10 }"), Value::Null);
        assert_eq!(run_ok("if (true) { let a = 1; }"), Value::Null);
    }

    #[test]
    fn global_let_statements() {
        assert_ints(&[
            ("let one = 1; one", 1),
            ("let a = 5; let b = a * 2; b + 1", 11),
            ("let one = 1; let two = one + one; one + two", 3),
            ("let x = 1; let x = 2; x", 2),
        ]);
        assert_eq!(run_ok("let a = 1;"), Value::Null);
    }

    #[test]
    fn string_expressions() {
        assert_eq!(run_ok(r#""flint""#), Value::Str("flint".into()));
        assert_eq!(run_ok(r#""fl" + "int""#), Value::Str("flint".into()));
        assert_eq!(run_ok(r#""fl" + "int" + "!""#), Value::Str("flint!".into()));
        assert_bools(&[(r#""a" == "a""#, true), (r#""a" != "b""#, true)]);
    }

    #[test]
    fn array_literals() {
        assert_eq!(run_ok("[]"), Value::Array(Rc::new(vec![])));
        assert_eq!(
            run_ok("[1 + 2, 3 * 4, 5 + 6]"),
            Value::Array(Rc::new(vec![Value::Int(3), Value::Int(12), Value::Int(11)]))
        );
    }

    #[test]
    fn hash_literals() {
        let got = run_ok("{1: 2 * 2, 3 + 3: 4}");
        let mut want = HashMap::new();
        want.insert(HashKey::Int(1), Value::Int(4));
        want.insert(HashKey::Int(6), Value::Int(4));
        assert_eq!(got, Value::Hash(Rc::new(want)));
    }

    #[test]
    fn index_expressions() {
        assert_ints(&[
            ("[1, 2, 3][1]", 2),
            ("[1, 2, 3][0] + [1, 2, 3][1] + [1, 2, 3][2]", 6),
            ("{1: 1, 2: 2}[1]", 1),
            ("{1: 1, 2: 2}[2]", 2),
            (r#"let h = {"one": 1, "two": 2}; h["two"]"#, 2),
            ("let a = [1, 2, 3]; a[1] + len(a)", 5),
        ]);
        for source in ["[][0]", "[1, 2, 3][99]", "[1][-1]", "{1: 1}[0]", "{}[0]"] {
            assert_eq!(run_ok(source), Value::Null, "{source:?}");
        }
    }

    #[test]
    fn calling_functions() {
        assert_ints(&[
            ("let fivePlusTen = fn() { 5 + 10; }; fivePlusTen();", 15),
            ("let one = fn() { 1; }; let two = fn() { 2; }; one() + two()", 3),
            ("let a = fn() { 1 }; let b = fn() { a() + 1 }; let c = fn() { b() + 1 }; c();", 3),
            ("let earlyExit = fn() { return 99; 100; }; earlyExit();", 99),
            ("let earlyExit = fn() { return 99; return 100; }; earlyExit();", 99),
            ("let add = fn(a, b) { a + b }; add(2, add(3, 4))", 9),
        ]);
        assert_eq!(run_ok("let noReturn = fn() { }; noReturn();"), Value::Null);
        assert_eq!(run_ok("fn(){}()"), Value::Null);
    }

    #[test]
    fn calling_functions_with_bindings() {
        assert_ints(&[
            ("let identity = fn(a) { a; }; identity(4);", 4),
            ("let sum = fn(a, b) { a + b; }; sum(1, 2);", 3),
            ("let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2);", 3),
            ("let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2) + sum(3, 4);", 10),
            ("let one = fn() { let one = 1; one }; one();", 1),
            ("let oneAndTwo = fn() { let one = 1; let two = 2; one + two; }; oneAndTwo();", 3),
            (
                "let oneAndTwo = fn() { let one = 1; let two = 2; one + two; }; \
                 let threeAndFour = fn() { let three = 3; let four = 4; three + four; }; \
                 oneAndTwo() + threeAndFour();",
                10,
            ),
            (
                "let firstFoobar = fn() { let foobar = 50; foobar; }; \
                 let secondFoobar = fn() { let foobar = 100; foobar; }; \
                 firstFoobar() + secondFoobar();",
                150,
            ),
            (
                "let globalSeed = 50; \
                 let minusOne = fn() { let num = 1; globalSeed - num; }; \
                 let minusTwo = fn() { let num = 2; globalSeed - num; }; \
                 minusOne() + minusTwo();",
                97,
            ),
        ]);
    }

    #[test]
    fn recursive_functions() {
        assert_ints(&[
            (
                "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; \
                 countDown(3);",
                0,
            ),
            (
                "let fibonacci = fn(x) { \
                     if (x == 0) { return 0; } else { \
                         if (x == 1) { return 1; } else { \
                             fibonacci(x - 1) + fibonacci(x - 2); } } }; \
                 fibonacci(10);",
                55,
            ),
        ]);
    }

    #[test]
    fn nested_if_with_returns() {
        assert_ints(&[
            ("if (10 > 1) { if (10 > 1) { return 10; } return 1; }", 10),
            ("return 10; 20", 10),
        ]);
    }

    #[test]
    fn builtin_functions() {
        assert_ints(&[
            (r#"len("")"#, 0),
            (r#"len("four")"#, 4),
            (r#"len("hello world")"#, 11),
            ("len([1, 2, 3])", 3),
            ("len([])", 0),
            ("first([1, 2, 3])", 1),
            ("last([1, 2, 3])", 3),
            ("len(rest([1, 2, 3]))", 2),
            ("len(push([], 1))", 1),
        ]);
        assert_eq!(run_ok("first([])"), Value::Null);
        assert_eq!(run_ok("last([])"), Value::Null);
        assert_eq!(run_ok("rest([])"), Value::Null);
        assert_eq!(run_ok(r#"puts("hello")"#), Value::Null);
        assert_eq!(
            run_ok("rest([1, 2, 3])"),
            Value::Array(Rc::new(vec![Value::Int(2), Value::Int(3)]))
        );
        // push copies: the original array is unchanged.
        assert_ints(&[("let a = [1]; let b = push(a, 2); len(a) + len(b)", 3)]);
    }

    #[test]
    fn runtime_errors() {
        assert_errors(&[
            (
                "5 + true",
                RuntimeError::TypeMismatch { left: "INTEGER", op: "+", right: "BOOLEAN" },
            ),
            (
                "5 + true; 5;",
                RuntimeError::TypeMismatch { left: "INTEGER", op: "+", right: "BOOLEAN" },
            ),
            ("-true", RuntimeError::UnknownPrefixOperator { op: "-", operand: "BOOLEAN" }),
            (
                "true + false",
                RuntimeError::UnknownInfixOperator { left: "BOOLEAN", op: "+", right: "BOOLEAN" },
            ),
            (
                "5; true - false; 10",
                RuntimeError::UnknownInfixOperator { left: "BOOLEAN", op: "-", right: "BOOLEAN" },
            ),
            (
                r#""a" - "b""#,
                RuntimeError::UnknownInfixOperator { left: "STRING", op: "-", right: "STRING" },
            ),
            (
                r#""a" > "b""#,
                RuntimeError::UnknownInfixOperator { left: "STRING", op: ">", right: "STRING" },
            ),
            (r#"{"name": "x"}[fn(x) { x }];"#, RuntimeError::UnusableHashKey("FUNCTION")),
            ("{}[[]]", RuntimeError::UnusableHashKey("ARRAY")),
            ("{fn(x) { x }: 1}", RuntimeError::UnusableHashKey("FUNCTION")),
            (r#"[1, 2, 3]["x"]"#, RuntimeError::IndexNotSupported("ARRAY")),
            ("1[0]", RuntimeError::IndexNotSupported("INTEGER")),
            ("fn(x) { x; }(1, 2)", RuntimeError::WrongArity { want: 1, got: 2 }),
            ("fn() { 1; }(1)", RuntimeError::WrongArity { want: 0, got: 1 }),
            ("let x = 1; x(1)", RuntimeError::NotAFunction("INTEGER")),
            ("10 / 0", RuntimeError::DivisionByZero),
            ("len(1)", RuntimeError::UnsupportedArgument { builtin: "len", got: "INTEGER" }),
            (r#"len("one", "two")"#, RuntimeError::WrongArity { want: 1, got: 2 }),
        ]);
        assert_eq!(
            run_source("5 + true").unwrap_err().to_string(),
            "type mismatch: INTEGER + BOOLEAN"
        );
        assert_eq!(
            run_source("fn(x) { x; }(1, 2)").unwrap_err().to_string(),
            "wrong number of arguments: want=1 got=2"
        );
    }

    #[test]
    fn runaway_recursion_overflows() {
        assert_eq!(
            run_source("let f = fn() { f() }; f()"),
            Err(RuntimeError::StackOverflow)
        );
    }

    #[test]
    fn globals_survive_across_runs() {
        let tokens = Lexer::new("let a = 1;").tokenize();
        let program = Parser::new(tokens).parse().unwrap();
        let mut compiler = Compiler::new();
        compiler.compile(&program).unwrap();
        let bytecode = compiler.bytecode();
        let mut vm = VM::new(&bytecode);
        vm.run().unwrap();
        let globals = vm.into_globals();
        let (symbols, constants) = compiler.into_state();

        let tokens = Lexer::new("a + 2").tokenize();
        let program = Parser::new(tokens).parse().unwrap();
        let mut compiler = Compiler::with_state(symbols, constants);
        compiler.compile(&program).unwrap();
        let bytecode = compiler.bytecode();
        let mut vm = VM::with_globals(&bytecode, globals);
        assert_eq!(vm.run(), Ok(Value::Int(3)));
    }
}

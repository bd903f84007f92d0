//! # FLINT — a small, expression-oriented scripting language
//!
//! FLINT source runs through a four-stage pipeline:
//! - A lexer turns source text into tokens
//! - A Pratt parser builds the syntax tree
//! - A bytecode compiler lowers the tree into a flat instruction stream
//!   with a constant pool
//! - A stack-based virtual machine executes the bytecode
//!
//! ## Quick Start
//!
//! ```rust
//! let value = flint::run("let add = fn(a, b) { a + b }; add(2, 3)").unwrap();
//! assert_eq!(value.to_string(), "5");
//! ```
//!
//! ## Compile and Run Separately
//!
//! ```rust
//! use flint::VM;
//! let bytecode = flint::compile("1 + 2 * 3").unwrap();
//! let value = VM::new(&bytecode).run().unwrap();
//! assert_eq!(value.to_string(), "7");
//! ```

pub mod error;
pub mod lexer;
pub mod parser;
pub mod vm;

pub use error::{CompileError, Error, ParseError, RuntimeError};
pub use lexer::Lexer;
pub use parser::Parser;
pub use vm::compiler::{Bytecode, Compiler, SymbolTable};
pub use vm::value::Value;
pub use vm::VM;

/// Compile FLINT source into bytecode, stopping before execution.
pub fn compile(source: &str) -> Result<Bytecode, Error> {
    let tokens = Lexer::new(source).tokenize();
    let mut parser = Parser::new(tokens);
    let program = parser.parse().map_err(Error::Parse)?;
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    Ok(compiler.bytecode())
}

/// Run FLINT source through the whole pipeline and produce the value of the
/// final expression.
pub fn run(source: &str) -> Result<Value, Error> {
    let bytecode = compile(source)?;
    let mut machine = VM::new(&bytecode);
    Ok(machine.run()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_the_whole_pipeline() {
        assert_eq!(run("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(run("fn(){}()").unwrap(), Value::Null);
    }

    #[test]
    fn parse_errors_halt_before_compilation() {
        let err = run("let x 5; foo)").unwrap_err();
        let Error::Parse(errors) = err else { panic!("expected parse errors") };
        assert!(!errors.is_empty());
    }

    #[test]
    fn compile_errors_halt_before_execution() {
        let err = run("foobar").unwrap_err();
        assert_eq!(err.to_string(), "undefined variable: foobar");
    }
}

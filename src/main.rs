use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser as _, Subcommand};

use flint::vm::compiler::disassemble;
use flint::vm::GLOBALS_SIZE;
use flint::{Compiler, Error, Lexer, SymbolTable, Value, VM};

#[derive(clap::Parser)]
#[command(name = "flint", about = "A small bytecode-compiled scripting language", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Compile and run a program
    Run { path: PathBuf },
    /// Parse a program and print its syntax tree
    Ast { path: PathBuf },
    /// Compile a program and print its bytecode
    Dis { path: PathBuf },
    /// Start an interactive session
    Repl,
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().cmd {
        Cmd::Run { path } => run_file(&path),
        Cmd::Ast { path } => show_ast(&path),
        Cmd::Dis { path } => show_bytecode(&path),
        Cmd::Repl => {
            repl();
            Ok(())
        }
    }
}

fn read_source(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("cannot read '{}'", path.display()))
}

fn run_file(path: &Path) -> anyhow::Result<()> {
    let source = read_source(path)?;

    let lex_start = Instant::now();
    let tokens = Lexer::new(&source).tokenize();
    let lex_time = lex_start.elapsed();
    let token_count = tokens.len();

    let parse_start = Instant::now();
    let mut parser = flint::Parser::new(tokens);
    let program = parser.parse().map_err(Error::Parse)?;
    let parse_time = parse_start.elapsed();

    let compile_start = Instant::now();
    let mut compiler = Compiler::new();
    compiler.compile(&program)?;
    let bytecode = compiler.bytecode();
    let compile_time = compile_start.elapsed();

    let exec_start = Instant::now();
    let mut machine = VM::new(&bytecode);
    let value = machine.run()?;
    let exec_time = exec_start.elapsed();

    if value != Value::Null {
        println!("{value}");
    }

    let total = lex_time + parse_time + compile_time + exec_time;
    eprintln!();
    eprintln!("  flint | {}", path.display());
    eprintln!("  {}", "-".repeat(46));
    eprintln!("  lexer:    {:>6} tokens  ({:.2}ms)", token_count, lex_time.as_secs_f64() * 1000.0);
    eprintln!("  parser:   {:>6} stmts   ({:.2}ms)", program.len(), parse_time.as_secs_f64() * 1000.0);
    eprintln!("  compiler:                ({:.2}ms)", compile_time.as_secs_f64() * 1000.0);
    eprintln!("  vm:                      ({:.2}ms)", exec_time.as_secs_f64() * 1000.0);
    eprintln!("  {}", "-".repeat(46));
    eprintln!("  total: {:.2}ms", total.as_secs_f64() * 1000.0);
    Ok(())
}

fn show_ast(path: &Path) -> anyhow::Result<()> {
    let source = read_source(path)?;
    let tokens = Lexer::new(&source).tokenize();
    let mut parser = flint::Parser::new(tokens);
    let program = parser.parse().map_err(Error::Parse)?;
    for stmt in &program {
        println!("{stmt}");
    }
    Ok(())
}

fn show_bytecode(path: &Path) -> anyhow::Result<()> {
    let source = read_source(path)?;
    let bytecode = flint::compile(&source)?;
    print!("{}", disassemble(&bytecode.instructions));
    if !bytecode.constants.is_empty() {
        println!();
        println!("constants:");
        for (i, constant) in bytecode.constants.iter().enumerate() {
            match constant {
                Value::Function(func) => {
                    println!("  {i}: <fn/{}>", func.num_parameters);
                    for line in disassemble(&func.instructions).lines() {
                        println!("       {line}");
                    }
                }
                other => println!("  {i}: {other}"),
            }
        }
    }
    Ok(())
}

/// Interactive loop. The symbol table, constant pool, and globals survive
/// across lines, so definitions stay usable.
fn repl() {
    let interactive = io::stdin().is_terminal();
    if interactive {
        println!("\n  FLINT {}", env!("CARGO_PKG_VERSION"));
        println!("  :quit to exit\n");
    }

    let mut symbols = SymbolTable::new();
    let mut constants: Vec<Value> = Vec::new();
    let mut globals = vec![Value::Null; GLOBALS_SIZE];

    loop {
        if interactive {
            print!(">> ");
            io::stdout().flush().ok();
        }

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => break,
            _ => {}
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == ":quit" || trimmed == ":q" {
            break;
        }

        let tokens = Lexer::new(trimmed).tokenize();
        let mut parser = flint::Parser::new(tokens);
        let program = match parser.parse() {
            Ok(program) => program,
            Err(errors) => {
                for e in errors {
                    eprintln!("  parse error: {e}");
                }
                continue;
            }
        };

        let mut compiler = Compiler::with_state(symbols, constants);
        let compiled = compiler.compile(&program);
        let bytecode = compiler.bytecode();
        (symbols, constants) = compiler.into_state();
        if let Err(e) = compiled {
            eprintln!("  compile error: {e}");
            continue;
        }

        let mut machine = VM::with_globals(&bytecode, globals);
        match machine.run() {
            Ok(value) => {
                globals = machine.into_globals();
                if value != Value::Null {
                    println!("{value}");
                }
            }
            Err(e) => {
                globals = machine.into_globals();
                eprintln!("  runtime error: {e}");
            }
        }
    }
    if interactive {
        println!("\n  Goodbye!");
    }
}

/// A single parser diagnostic. The parser accumulates as many of these as
/// it can before the pipeline gives up.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{line}:{col}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub col: usize,
    pub message: String,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("type mismatch: {left} {op} {right}")]
    TypeMismatch { left: &'static str, op: &'static str, right: &'static str },
    #[error("unknown operator: {left} {op} {right}")]
    UnknownInfixOperator { left: &'static str, op: &'static str, right: &'static str },
    #[error("unknown operator: {op}{operand}")]
    UnknownPrefixOperator { op: &'static str, operand: &'static str },
    #[error("unusable as hash key: {0}")]
    UnusableHashKey(&'static str),
    #[error("index operator not supported: {0}")]
    IndexNotSupported(&'static str),
    #[error("not a function: {0}")]
    NotAFunction(&'static str),
    #[error("wrong number of arguments: want={want} got={got}")]
    WrongArity { want: usize, got: usize },
    #[error("argument to `{builtin}` not supported, got {got}")]
    UnsupportedArgument { builtin: &'static str, got: &'static str },
    #[error("division by zero")]
    DivisionByZero,
    #[error("stack overflow")]
    StackOverflow,
}

/// Any failure the pipeline can produce, stage by stage.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{}", render_parse_errors(.0))]
    Parse(Vec<ParseError>),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn render_parse_errors(errors: &[ParseError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfixOp { Add, Sub, Mul, Div, Lt, Gt, Eq, NotEq }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixOp { Neg, Not }

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Int(i64),
    Bool(bool),
    Str(String),
    Array(Vec<Expr>),
    Hash(Vec<(Expr, Expr)>),
    Prefix { op: PrefixOp, right: Box<Expr> },
    Infix { left: Box<Expr>, op: InfixOp, right: Box<Expr> },
    If { cond: Box<Expr>, consequence: Block, alternative: Option<Block> },
    Function { params: Vec<String>, body: Block },
    Call { func: Box<Expr>, args: Vec<Expr> },
    Index { left: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let { name: String, value: Expr },
    Return(Option<Expr>),
    Expr(Expr),
}

pub type Block = Vec<Stmt>;
pub type Program = Vec<Stmt>;

/// Source form of a statement sequence. Re-lexing and re-parsing the result
/// yields a structurally identical tree.
pub fn program_to_string(stmts: &[Stmt]) -> String {
    stmts.iter().map(Stmt::to_string).collect::<Vec<_>>().join("; ")
}

fn block_to_string(stmts: &[Stmt]) -> String {
    if stmts.is_empty() { "{}".into() } else { format!("{{ {} }}", program_to_string(stmts)) }
}

impl fmt::Display for InfixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InfixOp::Add => "+", InfixOp::Sub => "-",
            InfixOp::Mul => "*", InfixOp::Div => "/",
            InfixOp::Lt => "<", InfixOp::Gt => ">",
            InfixOp::Eq => "==", InfixOp::NotEq => "!=",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PrefixOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", match self { PrefixOp::Neg => "-", PrefixOp::Not => "!" })
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ident(name) => write!(f, "{name}"),
            Expr::Int(n) => write!(f, "{n}"),
            Expr::Bool(b) => write!(f, "{b}"),
            Expr::Str(s) => write!(f, "\"{s}\""),
            Expr::Array(items) => {
                let items: Vec<String> = items.iter().map(Expr::to_string).collect();
                write!(f, "[{}]", items.join(", "))
            }
            Expr::Hash(pairs) => {
                let pairs: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Expr::Prefix { op, right } => write!(f, "({op}{right})"),
            Expr::Infix { left, op, right } => write!(f, "({left} {op} {right})"),
            Expr::If { cond, consequence, alternative } => {
                write!(f, "if ({cond}) {}", block_to_string(consequence))?;
                match alternative {
                    Some(alt) => write!(f, " else {}", block_to_string(alt)),
                    None => Ok(()),
                }
            }
            Expr::Function { params, body } => {
                write!(f, "fn({}) {}", params.join(", "), block_to_string(body))
            }
            Expr::Call { func, args } => {
                let args: Vec<String> = args.iter().map(Expr::to_string).collect();
                write!(f, "{func}({})", args.join(", "))
            }
            Expr::Index { left, index } => write!(f, "({left}[{index}])"),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Let { name, value } => write!(f, "let {name} = {value}"),
            Stmt::Return(Some(value)) => write!(f, "return {value}"),
            Stmt::Return(None) => write!(f, "return"),
            Stmt::Expr(expr) => write!(f, "{expr}"),
        }
    }
}

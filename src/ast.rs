use std::rc::Rc;

use crate::diagnostics::SourceSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::FloorDiv => "//",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    pub fn is_right_assoc(self) -> bool {
        matches!(self, BinaryOp::Pow)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    BitNot,
    Negate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(i64),
    String(Rc<[u8]>),
    Ident(String),
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    /// Calls only ever name a function directly.
    Call {
        callee: String,
        args: Vec<Expr>,
    },
    Paren(Box<Expr>),
    List(Vec<Expr>),
    Subscript {
        target: Box<Expr>,
        index: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    Return(Option<Expr>),
    FuncDef(Rc<FunctionDef>),
    Assign {
        name: String,
        value: Expr,
    },
    For {
        var: String,
        iterable: Expr,
        body: Box<Stmt>,
    },
    If {
        arms: Vec<IfArm>,
        else_body: Option<Box<Stmt>>,
    },
    While {
        condition: Expr,
        body: Box<Stmt>,
    },
    Pass,
    Break,
    Continue,
    Import(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfArm {
    pub condition: Expr,
    pub body: Stmt,
}

/// A user function. Shared between the syntax tree that declared it and
/// the registry, so it outlives the module it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Stmt,
    pub span: SourceSpan,
}

impl FunctionDef {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub items: Vec<Stmt>,
}

impl Module {
    /// Function definitions at the top level, in source order.
    pub fn functions(&self) -> impl Iterator<Item = &Rc<FunctionDef>> {
        self.items.iter().filter_map(|stmt| match &stmt.kind {
            StmtKind::FuncDef(def) => Some(def),
            _ => None,
        })
    }
}

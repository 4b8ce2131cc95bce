//! Expression AST.

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Ident(String),
    List(Vec<Expr>),
    /// Map literal entries, in source order (order is preserved in the
    /// evaluated [`crate::value::Value::Map`]).
    Map(Vec<(Expr, Expr)>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    /// A free function call, e.g. `omit()`, `merge(a, b)`, `has(a.b)`.
    Call(String, Vec<Expr>),
    /// A method call on a receiver, e.g. `list.filter(x, x > 1)`,
    /// `s.upperAscii()`. Comprehension macros (`filter`/`map`/`all`/
    /// `exists`/`exists_one`/`transformMapEntry`) are recognized by name at
    /// evaluation time, since their leading arguments are bound variable
    /// names rather than value expressions.
    MethodCall(Box<Expr>, String, Vec<Expr>),
}

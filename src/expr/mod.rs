//! C2 — the embedded expression language: lexer, AST, parser, evaluator, and
//! standard library.
//!
//! Callers should go through [`eval_str`]/[`interpolate`] directly for
//! one-off evaluation, or via a [`ProgramCache`] when the same template
//! source is evaluated repeatedly (once per `forEach` iteration, once per
//! addon instance) so the parse cost is paid once per distinct source
//! string rather than once per evaluation.

pub mod ast;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod stdlib;

use std::collections::HashMap;
use std::sync::Mutex;

pub use ast::Expr;
pub use eval::{Context, Error};

use crate::value::Value;

pub fn eval_str(src: &str, ctx: &Context) -> eval::Result<Value> {
    eval::eval_str(src, ctx)
}

pub fn interpolate(src: &str, ctx: &Context) -> eval::Result<Value> {
    eval::interpolate(src, ctx)
}

/// Caches parsed [`Expr`] ASTs by source text. Shared across a render via an
/// `EngineHandle`-style `Arc`; internal locking keeps it usable from the
/// addon composer and template renderer without threading `&mut` through
/// every call site.
#[derive(Default)]
pub struct ProgramCache {
    programs: Mutex<HashMap<String, Expr>>,
}

impl ProgramCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `src` (or returns the cached AST) and evaluates it against
    /// `ctx`.
    pub fn eval(&self, src: &str, ctx: &Context) -> eval::Result<Value> {
        let expr = self.get_or_parse(src)?;
        eval::eval(&expr, ctx)
    }

    fn get_or_parse(&self, src: &str) -> eval::Result<Expr> {
        let mut programs = self.programs.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(expr) = programs.get(src) {
            return Ok(expr.clone());
        }
        let expr = parser::parse(src).map_err(|source| Error::Parse { source })?;
        programs.insert(src.to_string(), expr.clone());
        Ok(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_cache_reuses_parsed_ast() {
        let cache = ProgramCache::new();
        let ctx = Context::new();
        assert_eq!(cache.eval("1 + 1", &ctx).unwrap(), Value::Int(2));
        assert_eq!(cache.eval("1 + 1", &ctx).unwrap(), Value::Int(2));
    }
}

use std::{io::Write, mem, rc::Rc};

use tracing::{debug, warn};

use crate::{
    ast::{BinaryOp, Expr, ExprKind, FunctionDef, Module, Stmt, StmtKind, UnaryOp},
    diagnostics::{Diagnostic, DiagnosticKind, MiniPyError, Result, SourceSpan},
    environment::{Environment, EnvironmentRef},
    functions::FunctionRegistry,
    parser,
    stack,
    stdlib,
    streams::Streams,
    value::{PyStr, Value},
};

pub const DEFAULT_MAX_CALL_DEPTH: usize = 200;

/// Longest string `*` will build; larger repetitions yield `None`.
pub const MAX_REPEAT_LEN: usize = 1 << 26;

/// Limits applied to every run of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Deepest allowed nesting of user-function calls.
    pub max_call_depth: usize,
    /// Statements one run may execute before it is aborted.
    pub step_limit: Option<u64>,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            step_limit: None,
        }
    }
}

/// How a statement finished.
#[derive(Debug)]
enum FlowControl {
    Next,
    Return(Value),
    Break,
    Continue,
}

/// A session: the top-level bindings and function table that persist
/// across runs, plus the streams and limits every run uses.
pub struct Interpreter {
    globals: EnvironmentRef,
    env: EnvironmentRef,
    functions: FunctionRegistry,
    streams: Streams,
    config: InterpreterConfig,
    call_depth: usize,
    steps: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// A session wired to the process's stdin, stdout and stderr.
    pub fn new() -> Self {
        Self::with_streams(Streams::stdio())
    }

    pub fn with_streams(streams: Streams) -> Self {
        Self::with_config(streams, InterpreterConfig::default())
    }

    pub fn with_config(streams: Streams, config: InterpreterConfig) -> Self {
        let globals = Environment::new();
        Self {
            env: Rc::clone(&globals),
            globals,
            functions: FunctionRegistry::new(),
            streams,
            config,
            call_depth: 0,
            steps: 0,
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    pub fn streams_mut(&mut self) -> &mut Streams {
        &mut self.streams
    }

    pub fn globals(&self) -> &EnvironmentRef {
        &self.globals
    }

    /// Current top-level binding of `name`.
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.borrow().get_local(name).cloned()
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Forgets every top-level binding and user function.
    pub fn reset(&mut self) {
        self.globals.borrow_mut().clear();
        self.functions.clear();
    }

    /// Parses and runs a module. Parse and fatal runtime diagnostics are
    /// written to the diagnostic stream and also returned.
    pub fn run_source(&mut self, source: impl AsRef<[u8]>) -> Result<()> {
        let module = match parser::parse_module(source.as_ref()) {
            Ok(module) => module,
            Err(diagnostics) => {
                for diagnostic in &diagnostics {
                    self.streams.report(diagnostic)?;
                }
                return Err(MiniPyError::Parse(diagnostics));
            }
        };
        self.eval_module(&module)
    }

    /// Evaluates one expression against the top-level bindings.
    pub fn eval_expression(&mut self, source: impl AsRef<[u8]>) -> Result<Value> {
        let expr = match parser::parse_expression(source.as_ref()) {
            Ok(expr) => expr,
            Err(diagnostics) => {
                for diagnostic in &diagnostics {
                    self.streams.report(diagnostic)?;
                }
                return Err(MiniPyError::Parse(diagnostics));
            }
        };
        self.steps = 0;
        let result = self.evaluate(&expr);
        self.finish_run(result)
    }

    pub fn eval_module(&mut self, module: &Module) -> Result<()> {
        debug!(statements = module.items.len(), "running module");
        self.steps = 0;
        for def in module.functions() {
            self.register_function(Rc::clone(def));
        }
        let result = self.execute_module(module);
        self.finish_run(result)
    }

    fn execute_module(&mut self, module: &Module) -> Result<()> {
        for stmt in &module.items {
            // Jumps cannot appear at the top level of a parsed module.
            if let flow @ (FlowControl::Return(_) | FlowControl::Break | FlowControl::Continue) =
                self.execute_statement(stmt)?
            {
                debug!(?flow, "stopping module on a top-level jump");
                break;
            }
        }
        Ok(())
    }

    fn finish_run<T>(&mut self, result: Result<T>) -> Result<T> {
        self.env = Rc::clone(&self.globals);
        self.call_depth = 0;
        self.streams.out.flush()?;
        if let Err(MiniPyError::Runtime(diagnostic)) = &result {
            self.streams.report(diagnostic)?;
        }
        result
    }

    fn register_function(&mut self, def: Rc<FunctionDef>) {
        if stdlib::is_builtin(&def.name) {
            warn!(name = %def.name, "function is shadowed by the builtin of the same name");
        }
        self.functions.register(def);
    }

    fn report(&mut self, diagnostic: Diagnostic) -> Result<()> {
        debug!(%diagnostic, "runtime diagnostic");
        self.streams.report(&diagnostic)?;
        Ok(())
    }

    fn bind(&mut self, name: &str, value: Value) -> Result<()> {
        let bound = self.env.borrow_mut().define(name, value);
        match bound {
            Ok(()) => Ok(()),
            Err(diagnostic) => self.report(diagnostic),
        }
    }

    fn tick(&mut self, span: SourceSpan) -> Result<()> {
        self.steps += 1;
        match self.config.step_limit {
            Some(limit) if self.steps > limit => Err(MiniPyError::from(
                Diagnostic::new(
                    DiagnosticKind::Runtime,
                    format!("step limit of {limit} exceeded"),
                )
                .with_span(span),
            )),
            _ => Ok(()),
        }
    }

    fn execute_statement(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        stack::guarded(|| self.execute(stmt))
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<FlowControl> {
        self.tick(stmt.span)?;
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.evaluate(expr)?;
                Ok(FlowControl::Next)
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::None,
                };
                Ok(FlowControl::Return(value))
            }
            StmtKind::FuncDef(def) => {
                self.register_function(Rc::clone(def));
                Ok(FlowControl::Next)
            }
            StmtKind::Assign { name, value } => {
                let value = self.evaluate(value)?;
                self.bind(name, value)?;
                Ok(FlowControl::Next)
            }
            StmtKind::For {
                var,
                iterable,
                body,
            } => {
                let Some(items) = self.evaluate(iterable)?.list_snapshot() else {
                    return Ok(FlowControl::Next);
                };
                for item in items {
                    self.bind(var, item)?;
                    match self.execute_statement(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::If { arms, else_body } => {
                for arm in arms {
                    if self.evaluate(&arm.condition)?.is_truthy() {
                        return self.execute_statement(&arm.body);
                    }
                }
                match else_body {
                    Some(body) => self.execute_statement(body),
                    None => Ok(FlowControl::Next),
                }
            }
            StmtKind::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute_statement(body)? {
                        FlowControl::Next | FlowControl::Continue => {}
                        FlowControl::Break => break,
                        FlowControl::Return(value) => return Ok(FlowControl::Return(value)),
                    }
                }
                Ok(FlowControl::Next)
            }
            StmtKind::Pass => Ok(FlowControl::Next),
            StmtKind::Break => Ok(FlowControl::Break),
            StmtKind::Continue => Ok(FlowControl::Continue),
            StmtKind::Import(name) => {
                warn!(module = %name, "import ignored, no modules are available");
                Ok(FlowControl::Next)
            }
        }
    }

    fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        stack::guarded(|| self.evaluate_kind(expr))
    }

    fn evaluate_kind(&mut self, expr: &Expr) -> Result<Value> {
        match &expr.kind {
            ExprKind::Number(n) => Ok(Value::Int(*n)),
            ExprKind::String(bytes) => Ok(Value::Str(PyStr::from(Rc::clone(bytes)))),
            ExprKind::Ident(name) => Ok(Environment::get(&self.env, name).unwrap_or_default()),
            ExprKind::Binary { op, left, right } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                Ok(binary(*op, &left, &right))
            }
            ExprKind::Unary { op, expr } => {
                let value = self.evaluate(expr)?;
                Ok(unary(*op, &value))
            }
            ExprKind::Call { callee, args } => self.call(callee, args, expr.span),
            ExprKind::Paren(inner) => self.evaluate(inner),
            ExprKind::List(items) => Ok(Value::list(self.evaluate_all(items)?)),
            ExprKind::Subscript { target, index } => {
                let target = self.evaluate(target)?;
                let index = self.evaluate(index)?;
                Ok(subscript(&target, &index))
            }
        }
    }

    /// Builtins win over user functions. A user function runs in a fresh
    /// frame whose parent is the caller's frame, so free names resolve
    /// against the caller at call time. Arguments are only evaluated once
    /// the call is known to go ahead.
    fn call(&mut self, name: &str, args: &[Expr], span: SourceSpan) -> Result<Value> {
        if let Some(builtin) = stdlib::lookup(name) {
            let values = self.evaluate_all(args)?;
            return builtin.call(&mut self.streams, &values);
        }

        let Some(def) = self.functions.lookup(name) else {
            self.report(
                Diagnostic::new(DiagnosticKind::Name, format!("name '{name}' is not defined"))
                    .with_span(span),
            )?;
            return Ok(Value::None);
        };
        if args.len() != def.arity() {
            self.report(
                Diagnostic::new(
                    DiagnosticKind::Type,
                    format!("{name} expects {} args, got {}", def.arity(), args.len()),
                )
                .with_span(span),
            )?;
            return Ok(Value::None);
        }
        if self.call_depth >= self.config.max_call_depth {
            self.report(
                Diagnostic::new(
                    DiagnosticKind::Recursion,
                    format!(
                        "maximum call depth of {} exceeded in {name}",
                        self.config.max_call_depth
                    ),
                )
                .with_span(span),
            )?;
            return Ok(Value::None);
        }

        let values = self.evaluate_all(args)?;
        let frame = Environment::with_parent(Rc::clone(&self.env));
        let caller = mem::replace(&mut self.env, frame);
        for (param, value) in def.params.iter().zip(values) {
            self.bind(param, value)?;
        }
        self.call_depth += 1;
        let flow = self.execute_statement(&def.body);
        self.call_depth -= 1;
        self.env = caller;

        match flow? {
            FlowControl::Return(value) => Ok(value),
            _ => Ok(Value::None),
        }
    }

    fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.evaluate(expr)?);
        }
        Ok(values)
    }
}

/// Applies a binary operator. Pairings with no defined meaning give `None`.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match (op, left, right) {
        (BinaryOp::Add, Value::Str(a), Value::Str(b)) => {
            Value::str([a.as_bytes(), b.as_bytes()].concat())
        }
        (BinaryOp::Add, Value::Int(n), Value::Str(s)) => {
            Value::str([n.to_string().as_bytes(), s.as_bytes()].concat())
        }
        (BinaryOp::Add, Value::Str(s), Value::Int(n)) => {
            Value::str([s.as_bytes(), n.to_string().as_bytes()].concat())
        }
        (BinaryOp::Mul, Value::Str(s), Value::Int(n))
        | (BinaryOp::Mul, Value::Int(n), Value::Str(s)) => repeat(s, *n),
        (BinaryOp::And, a, b) => Value::bool(a.is_truthy() && b.is_truthy()),
        (BinaryOp::Or, a, b) => Value::bool(a.is_truthy() || b.is_truthy()),
        (op, Value::Int(a), Value::Int(b)) => Value::Int(int_binary(op, *a, *b)),
        (BinaryOp::Equal, Value::Str(a), Value::Str(b)) => Value::bool(a == b),
        (BinaryOp::NotEqual, Value::Str(a), Value::Str(b)) => Value::bool(a != b),
        _ => Value::None,
    }
}

/// `count` copies of `s`. Non-positive counts and results longer than
/// [`MAX_REPEAT_LEN`] give `None`.
fn repeat(s: &PyStr, count: i64) -> Value {
    let Ok(count) = usize::try_from(count) else {
        return Value::None;
    };
    match s.len().checked_mul(count) {
        Some(len) if count > 0 && len <= MAX_REPEAT_LEN => {
            Value::str(s.as_bytes().repeat(count))
        }
        _ => Value::None,
    }
}

fn int_binary(op: BinaryOp, a: i64, b: i64) -> i64 {
    match op {
        BinaryOp::Add => a.wrapping_add(b),
        BinaryOp::Sub => a.wrapping_sub(b),
        BinaryOp::Mul => a.wrapping_mul(b),
        BinaryOp::Div | BinaryOp::FloorDiv if b == 0 => 0,
        BinaryOp::Div | BinaryOp::FloorDiv => a.wrapping_div(b),
        BinaryOp::Mod if b == 0 => 0,
        BinaryOp::Mod => a.wrapping_rem(b),
        BinaryOp::Pow => stdlib::ipow(a, b),
        BinaryOp::Equal => i64::from(a == b),
        BinaryOp::NotEqual => i64::from(a != b),
        BinaryOp::Less => i64::from(a < b),
        BinaryOp::LessEqual => i64::from(a <= b),
        BinaryOp::Greater => i64::from(a > b),
        BinaryOp::GreaterEqual => i64::from(a >= b),
        BinaryOp::BitAnd => a & b,
        BinaryOp::BitOr => a | b,
        BinaryOp::BitXor => a ^ b,
        BinaryOp::And => i64::from(a != 0 && b != 0),
        BinaryOp::Or => i64::from(a != 0 || b != 0),
    }
}

/// Unary operators act on integers only.
pub fn unary(op: UnaryOp, value: &Value) -> Value {
    match (op, value) {
        (UnaryOp::Not, Value::Int(n)) => Value::bool(*n == 0),
        (UnaryOp::BitNot, Value::Int(n)) => Value::Int(!n),
        (UnaryOp::Negate, Value::Int(n)) => Value::Int(n.wrapping_neg()),
        _ => Value::None,
    }
}

/// In-range, non-negative index into a list; `None` otherwise.
pub fn subscript(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::List(items), Value::Int(idx)) if *idx >= 0 => usize::try_from(*idx)
            .ok()
            .and_then(|idx| items.borrow().get(idx).cloned())
            .unwrap_or_default(),
        _ => Value::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_truncates_and_tolerates_zero() {
        assert_eq!(int_binary(BinaryOp::Div, -7, 2), -3);
        assert_eq!(int_binary(BinaryOp::FloorDiv, 7, 0), 0);
        assert_eq!(int_binary(BinaryOp::Mod, -7, 2), -1);
        assert_eq!(int_binary(BinaryOp::Mod, 7, 0), 0);
        assert_eq!(int_binary(BinaryOp::Div, i64::MIN, -1), i64::MIN);
    }

    #[test]
    fn arithmetic_wraps() {
        assert_eq!(int_binary(BinaryOp::Add, i64::MAX, 1), i64::MIN);
        assert_eq!(unary(UnaryOp::Negate, &Value::Int(i64::MIN)), Value::Int(i64::MIN));
    }

    #[test]
    fn mixed_operands() {
        assert_eq!(binary(BinaryOp::Add, &Value::Int(1), &Value::str("x")), Value::str("1x"));
        assert_eq!(binary(BinaryOp::Sub, &Value::str("a"), &Value::Int(1)), Value::None);
        assert_eq!(binary(BinaryOp::Less, &Value::str("a"), &Value::str("b")), Value::None);
        assert_eq!(
            binary(BinaryOp::And, &Value::str("a"), &Value::list(vec![Value::None])),
            Value::Int(1)
        );
        assert_eq!(binary(BinaryOp::Or, &Value::None, &Value::str("")), Value::Int(0));
        assert_eq!(unary(UnaryOp::Not, &Value::str("")), Value::None);
    }

    #[test]
    fn repetition_is_capped() {
        let s = Value::str("ab");
        assert_eq!(binary(BinaryOp::Mul, &s, &Value::Int(2)), Value::str("abab"));
        assert_eq!(binary(BinaryOp::Mul, &s, &Value::Int(i64::MAX)), Value::None);
        let limit = (MAX_REPEAT_LEN / 2) as i64;
        assert!(matches!(binary(BinaryOp::Mul, &Value::Int(limit), &s), Value::Str(_)));
        assert_eq!(binary(BinaryOp::Mul, &Value::Int(limit + 1), &s), Value::None);
        assert_eq!(
            binary(BinaryOp::Mul, &Value::str(""), &Value::Int(i64::MAX)),
            Value::str("")
        );
    }

    #[test]
    fn subscript_rejects_negative_and_out_of_range() {
        let list = Value::list(vec![Value::Int(10), Value::Int(20)]);
        assert_eq!(subscript(&list, &Value::Int(1)), Value::Int(20));
        assert_eq!(subscript(&list, &Value::Int(2)), Value::None);
        assert_eq!(subscript(&list, &Value::Int(-1)), Value::None);
        assert_eq!(subscript(&Value::str("ab"), &Value::Int(0)), Value::None);
    }
}

use super::{Bundle, Evaluated, Sandbox, SandboxFactory};
use crate::error::{EvalError, SandboxError};
use std::collections::HashMap;

/// Deterministic sandbox answering from a fixed expression table.
///
/// Expressions missing from the table throw, like a `ReferenceError` would.
/// Aliases make two expressions evaluate to the same value for `same_value`.
#[derive(Debug, Clone, Default)]
pub struct TableSandbox {
    values: HashMap<String, Evaluated>,
    undefined: Vec<String>,
    keys: HashMap<String, Vec<String>>,
    aliases: HashMap<String, String>,
    throwing: HashMap<String, String>,
    errors: Vec<String>,
}

impl TableSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, expression: &str, value: Evaluated) -> Self {
        self.values.insert(expression.to_string(), value);
        self
    }

    pub fn function(self, expression: &str, source: &str) -> Self {
        self.value(expression, Evaluated::function(source))
    }

    /// `expression` evaluates without throwing but yields `undefined`.
    pub fn undefined(mut self, expression: &str) -> Self {
        self.undefined.push(expression.to_string());
        self
    }

    /// Registers an object whose own enumerable keys are `keys`.
    pub fn object(mut self, expression: &str, keys: &[&str]) -> Self {
        self.values
            .insert(expression.to_string(), Evaluated::object());
        self.keys.insert(
            expression.to_string(),
            keys.iter().map(|k| k.to_string()).collect(),
        );
        self
    }

    pub fn alias(mut self, expression: &str, target: &str) -> Self {
        self.aliases
            .insert(expression.to_string(), target.to_string());
        self
    }

    pub fn throws(mut self, expression: &str, message: &str) -> Self {
        self.throwing
            .insert(expression.to_string(), message.to_string());
        self
    }

    pub fn with_error(mut self, message: &str) -> Self {
        self.errors.push(message.to_string());
        self
    }

    fn canonical<'a>(&'a self, expression: &'a str) -> &'a str {
        let mut current = expression;
        let mut hops = 0;
        while let Some(next) = self.aliases.get(current) {
            current = next.as_str();
            hops += 1;
            if hops > self.aliases.len() {
                break;
            }
        }
        current
    }

    fn check_throw(&self, expression: &str) -> Result<(), EvalError> {
        match self.throwing.get(expression) {
            Some(message) => Err(EvalError::new(message.clone())),
            None => Ok(()),
        }
    }
}

impl Sandbox for TableSandbox {
    fn evaluate(&mut self, expression: &str) -> Result<Evaluated, EvalError> {
        self.check_throw(expression)?;
        let key = self.canonical(expression);
        if let Some(value) = self.values.get(key) {
            return Ok(value.clone());
        }
        if self.undefined.iter().any(|e| e == key) {
            return Ok(Evaluated::undefined());
        }
        Err(EvalError::new(format!("ReferenceError: {expression} is not defined")))
    }

    fn own_enumerable_keys(&mut self, expression: &str) -> Result<Vec<String>, EvalError> {
        self.check_throw(expression)?;
        let key = self.canonical(expression).to_string();
        if let Some(keys) = self.keys.get(&key) {
            return Ok(keys.clone());
        }
        self.evaluate(&key).map(|_| Vec::new())
    }

    fn same_value(&mut self, left: &str, right: &str) -> Result<bool, EvalError> {
        self.evaluate(left)?;
        self.evaluate(right)?;
        Ok(self.canonical(left) == self.canonical(right))
    }

    fn errors(&self) -> &[String] {
        &self.errors
    }
}

/// Hands out clones of one prepared table regardless of the bundle.
#[derive(Debug, Clone)]
pub struct TableFactory {
    table: TableSandbox,
}

impl TableFactory {
    pub fn new(table: TableSandbox) -> Self {
        Self { table }
    }
}

impl SandboxFactory for TableFactory {
    type Sandbox = TableSandbox;

    fn create(&self, _bundle: &Bundle) -> Result<TableSandbox, SandboxError> {
        Ok(self.table.clone())
    }
}

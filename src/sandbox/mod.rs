//! Isolated execution scope for library code.
//!
//! The resolver only needs three capabilities from a script engine: evaluate
//! an expression against the library's global scope, list the own enumerable
//! keys of an object, and compare two values by identity. Everything else
//! (which engine, how errors are captured) lives behind [`Sandbox`].

pub mod quickjs;
pub mod table;

use crate::error::{EvalError, SandboxError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

/// Environment shims applied before any library code runs.
pub const PREAMBLE: &str = "\
var window = this;\n\
var self = this;\n\
var navigator = window.navigator || {};\n\
navigator.language = navigator.language || \"en-GB\";\n\
navigator.userAgent = navigator.userAgent || \"jsapi\";\n\
var location = window.location || { href: \"about:blank\", protocol: \"about:\", hash: \"\", search: \"\" };\n\
var document = window.document || {\n\
  documentElement: {}, readyState: \"complete\",\n\
  createElement: function () { return { style: {}, setAttribute: function () {}, getElementsByTagName: function () { return []; }, appendChild: function () {} }; },\n\
  getElementsByTagName: function () { return []; },\n\
  getElementById: function () { return null; },\n\
  addEventListener: function () {}, removeEventListener: function () {}\n\
};\n\
var setTimeout = window.setTimeout || function () { return 0; };\n\
var clearTimeout = window.clearTimeout || function () {};\n\
var setInterval = window.setInterval || function () { return 0; };\n\
var clearInterval = window.clearInterval || function () {};\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Function,
    Object,
    Primitive,
}

/// Engine-neutral view of an evaluated value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluated {
    pub kind: ValueKind,
    /// `String(value)`; for functions this is their source text.
    pub text: String,
}

impl Evaluated {
    pub fn undefined() -> Self {
        Self {
            kind: ValueKind::Undefined,
            text: "undefined".to_string(),
        }
    }

    pub fn function(source: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Function,
            text: source.into(),
        }
    }

    pub fn object() -> Self {
        Self {
            kind: ValueKind::Object,
            text: "[object Object]".to_string(),
        }
    }

    pub fn primitive(text: impl Into<String>) -> Self {
        Self {
            kind: ValueKind::Primitive,
            text: text.into(),
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self.kind, ValueKind::Undefined | ValueKind::Null)
    }

    pub fn is_function(&self) -> bool {
        self.kind == ValueKind::Function
    }
}

pub trait Sandbox {
    fn evaluate(&mut self, expression: &str) -> Result<Evaluated, EvalError>;

    /// Own enumerable property names of the object `expression` evaluates to.
    /// A non-object value yields an empty list.
    fn own_enumerable_keys(&mut self, expression: &str) -> Result<Vec<String>, EvalError>;

    /// `left === right`.
    fn same_value(&mut self, left: &str, right: &str) -> Result<bool, EvalError>;

    /// Exceptions captured while the bundle ran at top level.
    fn errors(&self) -> &[String];
}

pub trait SandboxFactory {
    type Sandbox: Sandbox;

    fn create(&self, bundle: &Bundle) -> Result<Self::Sandbox, SandboxError>;
}

/// Ordered pieces of script executed into a fresh global scope.
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    pub preamble: String,
    pub nullify: String,
    pub companion: Option<String>,
    pub library: String,
}

impl Bundle {
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            preamble: PREAMBLE.to_string(),
            nullify: String::new(),
            companion: None,
            library: library.into(),
        }
    }

    pub fn with_nullify(mut self, prelude: impl Into<String>) -> Self {
        self.nullify = prelude.into();
        self
    }

    pub fn with_companion(mut self, companion: Option<String>) -> Self {
        self.companion = companion;
        self
    }

    /// Everything after the preamble, as one script.
    pub fn body(&self) -> String {
        let companion = self.companion.as_deref().unwrap_or("");
        let mut out = String::with_capacity(
            self.nullify.len() + companion.len() + self.library.len() + 4,
        );
        out.push_str(&self.nullify);
        out.push_str(";\n");
        out.push_str(companion);
        out.push_str(";\n");
        out.push_str(&self.library);
        out
    }
}

/// One-shot completion signal; the first `fire` delivers, later ones are dropped.
pub struct ReadyLatch<T> {
    fired: AtomicBool,
    tx: Sender<T>,
}

impl<T> ReadyLatch<T> {
    pub fn new(tx: Sender<T>) -> Self {
        Self {
            fired: AtomicBool::new(false),
            tx,
        }
    }

    pub fn fire(&self, value: T) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        // A dropped receiver means the caller already gave up.
        let _ = self.tx.send(value);
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Member access for `key`, bracketed when it is not a plain identifier.
pub fn member_expression(object: &str, key: &str) -> String {
    if is_identifier(key) {
        format!("{object}.{key}")
    } else {
        let quoted = serde_json::to_string(key).unwrap_or_else(|_| format!("\"{key}\""));
        format!("{object}[{quoted}]")
    }
}

pub fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn latch_delivers_once() {
        let (tx, rx) = mpsc::channel();
        let latch = ReadyLatch::new(tx);
        assert!(!latch.is_fired());
        assert!(latch.fire(1));
        assert!(!latch.fire(2));
        assert!(latch.is_fired());
        drop(latch);
        let received: Vec<i32> = rx.iter().collect();
        assert_eq!(received, vec![1]);
    }

    #[test]
    fn bundle_orders_parts() {
        let bundle = Bundle::new("LIB")
            .with_nullify("Function.prototype.bind=null;")
            .with_companion(Some("DEP".into()));
        let body = bundle.body();
        let nullify = body.find("bind=null").unwrap();
        let dep = body.find("DEP").unwrap();
        let lib = body.find("LIB").unwrap();
        assert!(nullify < dep && dep < lib);
    }

    #[test]
    fn member_expression_quotes_odd_keys() {
        assert_eq!(member_expression("Lib", "add"), "Lib.add");
        assert_eq!(member_expression("Lib", "$sub_2"), "Lib.$sub_2");
        assert_eq!(member_expression("Lib", "two words"), "Lib[\"two words\"]");
        assert_eq!(member_expression("Lib", "9lives"), "Lib[\"9lives\"]");
    }
}

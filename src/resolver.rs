//! Resolve dotted method names against a live library and locate them in
//! the unexecuted source text.
//!
//! Resolution never parses the library. It evaluates candidate expressions in
//! the [`Sandbox`], takes the first one that yields a value, and then looks
//! for the function's body text verbatim in the [`SourceText`].

use crate::error::EvalError;
use crate::model::{Invalid, RelatedMethod, ResolvedMethod};
use crate::registry::LibraryDescriptor;
use crate::sandbox::{Evaluated, Sandbox, member_expression};
use crate::source::SourceText;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;
use tracing::{debug, warn};

static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^function\s*\*?\s*[A-Za-z0-9_$]*\s*\([^)]*\)\s*\{").expect("signature regex")
});

static EMPTY_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^function\s*[A-Za-z0-9_$]*\s*\([^)]*\)\s*\{\s*\}$").expect("empty function regex")
});

const NATIVE_MARKER: &str = "[native code]";

pub fn is_native(text: &str) -> bool {
    text.contains(NATIVE_MARKER)
}

pub fn is_empty_function(text: &str) -> bool {
    EMPTY_FUNCTION.is_match(text.trim())
}

/// Function text with its leading `function name(args) {` removed.
pub fn body_text(function_text: &str) -> &str {
    match SIGNATURE.find(function_text) {
        Some(m) => &function_text[m.end()..],
        None => function_text,
    }
}

/// Ordered `pattern -> replacement` rewrites applied to raw names.
///
/// A rule set with any pattern that fails to compile corrects nothing.
#[derive(Debug, Clone, Default)]
pub struct NameRules {
    rules: Option<Vec<(Regex, String)>>,
}

impl NameRules {
    pub fn compile(rules: &[(String, String)]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for (pattern, replacement) in rules {
            match Regex::new(pattern) {
                Ok(re) => compiled.push((re, replacement.clone())),
                Err(err) => {
                    warn!("invalid name rule {pattern:?}, name correction disabled: {err}");
                    return Self { rules: None };
                }
            }
        }
        Self {
            rules: Some(compiled),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.rules.is_some()
    }

    pub fn apply(&self, name: &str) -> String {
        let mut out = name.to_string();
        if let Some(rules) = &self.rules {
            for (re, replacement) in rules {
                out = re.replace(&out, replacement.as_str()).into_owned();
            }
        }
        out
    }
}

/// Order of sibling methods.
#[derive(Debug, Clone, Copy)]
pub enum RelatedOrder<'a> {
    Alphabetical,
    /// Most similar to the given name first, ties broken alphabetically.
    Similarity(&'a str),
}

pub fn split_namespace(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) => (&name[..idx], &name[idx + 1..]),
        None => ("", name),
    }
}

pub struct Resolver<'a, S: Sandbox> {
    sandbox: &'a mut S,
    source: &'a SourceText,
    look_in: &'a [String],
    rules: NameRules,
}

impl<'a, S: Sandbox> Resolver<'a, S> {
    pub fn new(sandbox: &'a mut S, source: &'a SourceText, descriptor: &'a LibraryDescriptor) -> Self {
        Self {
            sandbox,
            source,
            look_in: &descriptor.look_in,
            rules: NameRules::compile(&descriptor.mutate_names),
        }
    }

    /// Bare name first, then qualified by each namespace root in order.
    pub fn candidates(&self, name: &str) -> Vec<String> {
        let mut out = Vec::with_capacity(self.look_in.len() + 1);
        out.push(name.to_string());
        for root in self.look_in {
            out.push(format!("{root}.{name}"));
        }
        out
    }

    pub fn correct_name(&self, raw: &str) -> String {
        self.rules.apply(raw)
    }

    /// First candidate that evaluates to a defined value, with the expression that matched.
    fn lookup(&mut self, name: &str) -> Option<(String, Evaluated)> {
        for candidate in self.candidates(name) {
            match self.sandbox.evaluate(&candidate) {
                Ok(value) if value.is_defined() => return Some((candidate, value)),
                Ok(_) => {}
                Err(err) => debug!(candidate = %candidate, "candidate threw: {err}"),
            }
        }
        None
    }

    /// `None` when no candidate resolves. Otherwise the method, which may be
    /// marked invalid.
    pub fn resolve(&mut self, name: &str) -> Option<ResolvedMethod> {
        let (matched_expression, value) = self.lookup(name)?;
        let fully_qualified_name = self.correct_name(&matched_expression);
        let (namespace, short) = split_namespace(&fully_qualified_name);
        let (namespace, short) = (namespace.to_string(), short.to_string());

        let invalid = validate(&value);
        let span = match invalid {
            None => self.source.find_span(body_text(&value.text)),
            Some(_) => None,
        };
        let invalid = invalid.or(if span.is_none() {
            Some(Invalid::NotInSource)
        } else {
            None
        });
        debug!(
            method = name,
            matched = %matched_expression,
            fq = %fully_qualified_name,
            ?span,
            ?invalid,
            "resolved"
        );

        Some(ResolvedMethod {
            matched_expression,
            fully_qualified_name,
            namespace,
            name: short,
            text: value.text,
            span,
            invalid,
        })
    }

    /// Function-valued own enumerable properties of `namespace`, an
    /// evaluable expression. Names are reported after correction.
    ///
    /// `exclude` is an expression whose value is left out (compared by identity).
    pub fn related_methods(
        &mut self,
        namespace: &str,
        exclude: Option<&str>,
        order: RelatedOrder<'_>,
    ) -> Result<Vec<RelatedMethod>, EvalError> {
        let keys = self.sandbox.own_enumerable_keys(namespace)?;
        let mut out = Vec::new();
        for key in keys {
            let expression = member_expression(namespace, &key);
            let value = match self.sandbox.evaluate(&expression) {
                Ok(value) => value,
                Err(err) => {
                    debug!(%expression, "skipping property: {err}");
                    continue;
                }
            };
            if !value.is_function() || is_native(&value.text) || is_empty_function(&value.text) {
                continue;
            }
            if let Some(excluded) = exclude {
                match self.sandbox.same_value(&expression, excluded) {
                    Ok(false) => {}
                    Ok(true) => continue,
                    Err(err) => {
                        debug!(%expression, "identity check failed, skipping property: {err}");
                        continue;
                    }
                }
            }
            out.push(RelatedMethod {
                fully_qualified_name: self.correct_name(&format!("{namespace}.{key}")),
                name: key,
            });
        }
        sort_related(&mut out, order);
        Ok(out)
    }
}

fn validate(value: &Evaluated) -> Option<Invalid> {
    if !value.is_function() {
        Some(Invalid::NotAFunction)
    } else if is_native(&value.text) {
        Some(Invalid::NativeFunction)
    } else if is_empty_function(&value.text) {
        Some(Invalid::EmptyFunction)
    } else {
        None
    }
}

pub fn sort_related(methods: &mut [RelatedMethod], order: RelatedOrder<'_>) {
    match order {
        RelatedOrder::Alphabetical => methods.sort_by(|a, b| a.name.cmp(&b.name)),
        RelatedOrder::Similarity(target) => methods.sort_by(|a, b| {
            let sa = strsim::jaro_winkler(&a.name, target);
            let sb = strsim::jaro_winkler(&b.name, target);
            sb.partial_cmp(&sa)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        }),
    }
}

use serde::Serialize;

/// 1-indexed inclusive line range.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Widen by `by` lines on both sides, staying within `1..=line_count`.
    pub fn expand(&self, by: usize, line_count: usize) -> Span {
        let start = self.start.saturating_sub(by).max(1);
        let end = self.end.saturating_add(by).min(line_count.max(1));
        Span::new(start.min(end), end)
    }
}

/// Why a resolved value cannot be shown.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Invalid {
    NotAFunction,
    NativeFunction,
    EmptyFunction,
    NotInSource,
}

/// A dotted name resolved against the live library.
#[derive(Debug, Serialize, Clone)]
pub struct ResolvedMethod {
    /// Candidate expression that evaluated, before name correction.
    pub matched_expression: String,
    pub fully_qualified_name: String,
    pub namespace: String,
    pub name: String,
    /// Literal text of the live value (function source for functions).
    pub text: String,
    pub span: Option<Span>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid: Option<Invalid>,
}

impl ResolvedMethod {
    pub fn is_valid(&self) -> bool {
        self.invalid.is_none() && self.span.is_some()
    }

    pub fn checked_span(&self) -> Result<Span, Invalid> {
        if let Some(reason) = self.invalid {
            return Err(reason);
        }
        self.span.ok_or(Invalid::NotInSource)
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RelatedMethod {
    pub name: String,
    pub fully_qualified_name: String,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RelatedMethodEntry {
    pub name: String,
    pub fully_qualified_name: String,
    pub link: String,
}

/// Payload handed to the renderer for a single method.
#[derive(Debug, Serialize, Clone)]
pub struct SourceData {
    pub name: String,
    pub namespace: String,
    pub version: String,
    /// Lines covered by `source`, context included.
    pub span: Span,
    /// Lines of the function itself.
    pub function_span: Span,
    /// 0-based line offsets of the function inside `source`.
    pub function_start: usize,
    pub function_end: usize,
    /// Snippet with link markers.
    pub source: String,
    pub related: Vec<RelatedMethodEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documentation: Option<String>,
    pub source_url: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct NamespaceMethods {
    pub namespace: String,
    pub methods: Vec<RelatedMethodEntry>,
}

#[derive(Debug, Serialize, Clone)]
pub struct NamespaceFailure {
    pub namespace: String,
    pub error: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct MethodList {
    pub version: String,
    pub source_url: String,
    pub namespaces: Vec<NamespaceMethods>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failed: Vec<NamespaceFailure>,
}

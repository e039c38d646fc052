use crate::model::Span;
use regex::Regex;
use tracing::warn;

/// Raw library text, addressed by 1-indexed lines.
#[derive(Debug, Clone)]
pub struct SourceText {
    text: String,
    line_starts: Vec<usize>,
}

impl SourceText {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let mut line_starts = vec![0];
        for (idx, byte) in text.bytes().enumerate() {
            if byte == b'\n' && idx + 1 < text.len() {
                line_starts.push(idx + 1);
            }
        }
        Self { text, line_starts }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn line_count(&self) -> usize {
        if self.text.is_empty() {
            0
        } else {
            self.line_starts.len()
        }
    }

    /// 1-indexed line holding the given byte offset.
    pub fn line_of_offset(&self, offset: usize) -> usize {
        match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx + 1,
            Err(idx) => idx,
        }
    }

    /// Exact location of `body` in the text, clamped to the line count.
    pub fn find_span(&self, body: &str) -> Option<Span> {
        if body.trim().is_empty() {
            return None;
        }
        let index = self.text.find(body)?;
        let start = self.line_of_offset(index);
        let end = start + count_line_breaks(body);
        Some(Span::new(start, end.min(self.line_count())))
    }

    /// Lines `start..=end` joined with `\n`; out-of-range bounds are clamped.
    pub fn slice_lines(&self, span: Span) -> String {
        let count = self.line_count();
        if count == 0 {
            return String::new();
        }
        let start = span.start.max(1);
        let end = span.end.min(count);
        if start > end {
            return String::new();
        }
        self.text
            .lines()
            .skip(start - 1)
            .take(end - start + 1)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Library version as declared in its own header, if `pattern` captures it.
    pub fn real_version(&self, pattern: &str) -> Option<String> {
        let re = match Regex::new(pattern) {
            Ok(re) => re,
            Err(err) => {
                warn!("invalid get_real_version pattern {pattern:?}: {err}");
                return None;
            }
        };
        let caps = re.captures(&self.text)?;
        caps.get(1).map(|m| m.as_str().to_string())
    }
}

pub fn count_line_breaks(text: &str) -> usize {
    text.bytes().filter(|b| *b == b'\n').count()
}

use crate::resolver::Resolver;
use crate::sandbox::Sandbox;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::{debug, warn};

// Format: @@##__<fully qualified name>#<text as written>__##@@
// e.g.    @@##__jQuery.fn.data#this.data__##@@
pub const LINK_START: &str = "@@##__";
pub const LINK_END: &str = "__##@@";

static COMPLETE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@@##__[^#\n]*?#(.*?)__##@@").expect("marker regex")
});

const SELF_ROOT: &str = "this";

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// Marks `<root>.<identifier>` tokens that resolve to showable methods.
#[derive(Debug, Clone)]
pub struct Linkifier {
    pattern: Option<Regex>,
}

impl Linkifier {
    pub fn new(look_in: &[String]) -> Self {
        let mut roots: Vec<&str> = look_in
            .iter()
            .map(String::as_str)
            .filter(|r| !r.is_empty())
            .collect();
        roots.push(SELF_ROOT);
        // Longest first so `jQuery.fn.x` is not split at `jQuery`.
        roots.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        roots.dedup();
        let alternation = roots
            .iter()
            .map(|r| regex::escape(r))
            .collect::<Vec<_>>()
            .join("|");
        let raw = format!(r"(?P<root>{alternation})\.(?P<name>[A-Za-z0-9$_]+)");
        let pattern = match Regex::new(&raw) {
            Ok(re) => Some(re),
            Err(err) => {
                warn!("linkify pattern rejected, links disabled: {err}");
                None
            }
        };
        Self { pattern }
    }

    /// Wrap resolvable references in `snippet` with link markers.
    ///
    /// `this.<name>` is looked up in `namespace`, the namespace of the method
    /// the snippet belongs to.
    pub fn annotate<S: Sandbox>(
        &self,
        snippet: &str,
        resolver: &mut Resolver<'_, S>,
        namespace: &str,
    ) -> String {
        let Some(pattern) = &self.pattern else {
            return strip_unpaired(snippet);
        };
        let mut seen: HashMap<String, Option<String>> = HashMap::new();
        let mut out = String::with_capacity(snippet.len());
        let mut last = 0;
        let mut linked = 0usize;

        for caps in pattern.captures_iter(snippet) {
            let Some(whole) = caps.get(0) else { continue };
            if snippet[..whole.start()]
                .chars()
                .next_back()
                .is_some_and(is_identifier_char)
            {
                continue;
            }
            let root = &caps["root"];
            let name = &caps["name"];
            let target = if root == SELF_ROOT {
                if namespace.is_empty() {
                    continue;
                }
                format!("{namespace}.{name}")
            } else {
                whole.as_str().to_string()
            };

            let fully_qualified = seen
                .entry(target)
                .or_insert_with_key(|target| {
                    resolver
                        .resolve(target)
                        .filter(|m| m.is_valid())
                        .map(|m| m.fully_qualified_name)
                })
                .clone();

            if let Some(fq) = fully_qualified {
                out.push_str(&snippet[last..whole.start()]);
                out.push_str(LINK_START);
                out.push_str(&fq);
                out.push('#');
                out.push_str(whole.as_str());
                out.push_str(LINK_END);
                last = whole.end();
                linked += 1;
            }
        }
        out.push_str(&snippet[last..]);
        debug!(linked, "annotated snippet");
        strip_unpaired(&out)
    }
}

/// Drop delimiters that are not part of a complete marker, keeping markers intact.
pub fn strip_unpaired(annotated: &str) -> String {
    if !annotated.contains(LINK_START) && !annotated.contains(LINK_END) {
        return annotated.to_string();
    }
    let mut out = String::with_capacity(annotated.len());
    let mut last = 0;
    for marker in COMPLETE_MARKER.find_iter(annotated) {
        let gap = &annotated[last..marker.start()];
        out.push_str(&gap.replace(LINK_START, "").replace(LINK_END, ""));
        out.push_str(marker.as_str());
        last = marker.end();
    }
    let tail = &annotated[last..];
    out.push_str(&tail.replace(LINK_START, "").replace(LINK_END, ""));
    out
}

/// Replace every complete marker with the text it wraps, then drop any
/// delimiter left unpaired.
pub fn strip_markers(annotated: &str) -> String {
    COMPLETE_MARKER
        .replace_all(annotated, "$1")
        .replace(LINK_START, "")
        .replace(LINK_END, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LibraryDescriptor;
    use crate::sandbox::table::TableSandbox;
    use crate::source::SourceText;

    const SOURCE: &str = r#"jQuery.fn.data = function (key) {
  return jQuery.data(this[0], key) || this.attr(key);
};
jQuery.data = function (el, key) {
  return el[key];
};
jQuery.fn.attr = function (key) {
  return this.getAttribute(key);
};
"#;

    fn table() -> TableSandbox {
        TableSandbox::new()
            .function(
                "jQuery.fn.data",
                "function (key) {\n  return jQuery.data(this[0], key) || this.attr(key);\n}",
            )
            .function("jQuery.data", "function (el, key) {\n  return el[key];\n}")
            .function(
                "jQuery.fn.attr",
                "function (key) {\n  return this.getAttribute(key);\n}",
            )
            .function("jQuery.each", "function each() { [native code] }")
            .undefined("jQuery.missing")
    }

    fn descriptor() -> LibraryDescriptor {
        LibraryDescriptor {
            look_in: vec!["jQuery".into(), "jQuery.fn".into()],
            ..Default::default()
        }
    }

    #[test]
    fn links_namespace_and_this_references() {
        let source = SourceText::new(SOURCE);
        let lib = descriptor();
        let mut sb = table();
        let mut resolver = Resolver::new(&mut sb, &source, &lib);
        let linkifier = Linkifier::new(&lib.look_in);

        let snippet = "  return jQuery.data(this[0], key) || this.attr(key);";
        let out = linkifier.annotate(snippet, &mut resolver, "jQuery.fn");
        assert_eq!(
            out,
            "  return @@##__jQuery.data#jQuery.data__##@@(this[0], key) || \
             @@##__jQuery.fn.attr#this.attr__##@@(key);"
        );
        assert_eq!(strip_markers(&out), snippet);
    }

    #[test]
    fn longest_root_wins() {
        let source = SourceText::new(SOURCE);
        let lib = descriptor();
        let mut sb = table();
        let mut resolver = Resolver::new(&mut sb, &source, &lib);
        let linkifier = Linkifier::new(&lib.look_in);
        let out = linkifier.annotate("jQuery.fn.attr('id')", &mut resolver, "jQuery");
        assert_eq!(out, "@@##__jQuery.fn.attr#jQuery.fn.attr__##@@('id')");
    }

    #[test]
    fn leaves_unresolvable_and_partial_tokens() {
        let source = SourceText::new(SOURCE);
        let lib = descriptor();
        let mut sb = table();
        let mut resolver = Resolver::new(&mut sb, &source, &lib);
        let linkifier = Linkifier::new(&lib.look_in);
        let snippet = "myjQuery.data(); jQuery.each(x); jQuery.missing(); $jQuery.data;";
        assert_eq!(linkifier.annotate(snippet, &mut resolver, "jQuery"), snippet);
    }

    #[test]
    fn roots_are_escaped() {
        let source = SourceText::new("");
        let lib = LibraryDescriptor {
            look_in: vec!["$".into()],
            ..Default::default()
        };
        let mut sb = TableSandbox::new();
        let mut resolver = Resolver::new(&mut sb, &source, &lib);
        let linkifier = Linkifier::new(&lib.look_in);
        assert!(linkifier.pattern.is_some());
        assert_eq!(linkifier.annotate("a$b.c", &mut resolver, ""), "a$b.c");
    }

    #[test]
    fn annotate_drops_stray_delimiters_but_keeps_links() {
        let source = SourceText::new(SOURCE);
        let lib = descriptor();
        let mut sb = table();
        let mut resolver = Resolver::new(&mut sb, &source, &lib);
        let linkifier = Linkifier::new(&lib.look_in);
        let out = linkifier.annotate("jQuery.data(x); // __##@@ odd", &mut resolver, "jQuery");
        assert_eq!(out, "@@##__jQuery.data#jQuery.data__##@@(x); //  odd");
    }

    #[test]
    fn strip_removes_unpaired_delimiters() {
        assert_eq!(strip_markers("a @@##__x.y#y__##@@ b __##@@"), "a y b ");
        assert_eq!(strip_markers("@@##__ dangling"), " dangling");
    }
}

use jsapi::error::ResolveError;
use jsapi::linkify;
use jsapi::loader::StaticLoader;
use jsapi::model::Span;
use jsapi::pipeline::{Pipeline, Settings};
use jsapi::registry::Registry;
use jsapi::request::ResolutionRequest;
use jsapi::sandbox::Evaluated;
use jsapi::sandbox::table::{TableFactory, TableSandbox};
use std::sync::Arc;
use std::time::Duration;

const LIB_SOURCE: &str = r#"var Lib = {};
Lib.math = {};
Lib.math.add = function add(a,b){ return a+b; };
Lib.math.sub = function (a, b) {
  return a - b;
};
Lib.math.twice = function (a) {
  var s = Lib.math.add(a, a);
  return this.sub(s, 0);
};
Lib.util = {};
Lib.util.noop = function () {};
Lib.VERSION = "1.2.3";
"#;

const REGISTRY: &str = r#"{
    "lib": {
        "name": "Lib",
        "url": "http://example.com/lib-{VERSION}.js",
        "versions": ["1.2.3"],
        "default_version": "1.2.3",
        "look_in": ["Lib", "Lib.math", "Broken"],
        "get_real_version": "Lib\\.VERSION = \"([^\"]+)\"",
        "documentation": [["^Lib\\.math\\.(.+)$", "http://docs.example.com/math#$1"]]
    }
}"#;

fn table() -> TableSandbox {
    TableSandbox::new()
        .object("Lib", &["math", "util", "VERSION"])
        .object("Lib.math", &["add", "sub", "twice", "max"])
        .function("Lib.math.add", "function add(a,b){ return a+b; }")
        .function("Lib.math.sub", "function (a, b) {\n  return a - b;\n}")
        .function(
            "Lib.math.twice",
            "function (a) {\n  var s = Lib.math.add(a, a);\n  return this.sub(s, 0);\n}",
        )
        .function("Lib.math.max", "function max() { [native code] }")
        .object("Lib.util", &["noop"])
        .function("Lib.util.noop", "function () {}")
        .value("Lib.VERSION", Evaluated::primitive("1.2.3"))
        .undefined("Lib.nothing")
        .undefined("Lib.math.nothing")
        .undefined("nothing")
        .throws("Broken", "TypeError: Broken is not an object")
}

fn pipeline_with(settings: Settings) -> Pipeline<StaticLoader, TableFactory> {
    let registry = Registry::from_json(REGISTRY).unwrap();
    Pipeline::new(
        Arc::new(registry),
        StaticLoader::new().with("lib.1.2.3", LIB_SOURCE),
        TableFactory::new(table()),
        settings,
    )
}

fn pipeline() -> Pipeline<StaticLoader, TableFactory> {
    pipeline_with(Settings {
        timeout: Duration::from_secs(5),
        max_expand: 50,
        related_limit: 12,
    })
}

#[test]
fn resolves_one_line_function() {
    let request = ResolutionRequest::new("lib", "default").with_method("math.add");
    let data = pipeline().find_single_method(&request).unwrap();
    assert_eq!(data.name, "Lib.math.add");
    assert_eq!(data.namespace, "Lib.math");
    assert_eq!(data.function_span, Span::new(3, 3));
    assert_eq!(data.span, Span::new(3, 3));
    assert_eq!(data.function_start, 0);
    assert_eq!(data.function_end, 0);
    assert_eq!(
        data.source,
        "@@##__Lib.math.add#Lib.math.add__##@@ = function add(a,b){ return a+b; };"
    );
    assert_eq!(data.version, "1.2.3");
    assert_eq!(
        data.documentation.as_deref(),
        Some("http://docs.example.com/math#add")
    );
    assert_eq!(data.source_url, "http://example.com/lib-1.2.3.js");
}

#[test]
fn related_methods_exclude_target_and_filter() {
    let request = ResolutionRequest::new("lib", "1.2.3").with_method("math.add");
    let data = pipeline().find_single_method(&request).unwrap();
    let names: Vec<_> = data.related.iter().map(|m| m.name.as_str()).collect();
    assert!(!names.contains(&"add"));
    assert!(!names.contains(&"max"));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(sorted, vec!["sub", "twice"]);
    let sub = data.related.iter().find(|m| m.name == "sub").unwrap();
    assert_eq!(sub.fully_qualified_name, "Lib.math.sub");
    assert_eq!(sub.link, "/lib/1.2.3/Lib.math.sub");
}

#[test]
fn expansion_is_clamped_and_inner_span_kept() {
    let request = ResolutionRequest::new("lib", "1.2.3")
        .with_method("math.sub")
        .with_expand(2);
    let data = pipeline().find_single_method(&request).unwrap();
    assert_eq!(data.function_span, Span::new(4, 6));
    assert_eq!(data.span, Span::new(2, 8));
    assert_eq!(data.function_start, 2);
    assert_eq!(data.function_end, 4);

    let request = ResolutionRequest::new("lib", "1.2.3")
        .with_method("math.add")
        .with_expand(10_000);
    let data = pipeline().find_single_method(&request).unwrap();
    assert_eq!(data.span, Span::new(1, 13));
    assert_eq!(data.function_span, Span::new(3, 3));
    assert_eq!(data.function_start, 2);
}

#[test]
fn snippet_links_namespace_and_this_references() {
    let request = ResolutionRequest::new("lib", "1.2.3").with_method("twice");
    let data = pipeline().find_single_method(&request).unwrap();
    assert_eq!(data.name, "Lib.math.twice");
    assert!(
        data.source
            .contains("@@##__Lib.math.add#Lib.math.add__##@@(a, a)")
    );
    assert!(data.source.contains("@@##__Lib.math.sub#this.sub__##@@(s, 0)"));

    let plain = linkify::strip_markers(&data.source);
    let expected: Vec<&str> = LIB_SOURCE.lines().skip(6).take(4).collect();
    assert_eq!(plain, expected.join("\n"));
}

#[test]
fn unknown_method_is_not_found() {
    let request = ResolutionRequest::new("lib", "1.2.3").with_method("nothing");
    let err = pipeline().find_single_method(&request).unwrap_err();
    assert!(matches!(err, ResolveError::NotFound(ref name) if name == "nothing"));
}

#[test]
fn invalid_values_fail_with_their_reason() {
    let p = pipeline();
    let native = p
        .find_single_method(&ResolutionRequest::new("lib", "1.2.3").with_method("math.max"))
        .unwrap_err();
    assert!(matches!(native, ResolveError::NativeFunction(_)));

    let empty = p
        .find_single_method(&ResolutionRequest::new("lib", "1.2.3").with_method("util.noop"))
        .unwrap_err();
    assert!(matches!(empty, ResolveError::EmptyFunction(_)));

    let scalar = p
        .find_single_method(&ResolutionRequest::new("lib", "1.2.3").with_method("VERSION"))
        .unwrap_err();
    assert!(matches!(scalar, ResolveError::NotAFunction(_)));
}

#[test]
fn find_all_isolates_broken_namespaces() {
    let request = ResolutionRequest::new("lib", "1.2.3");
    let list = pipeline().find_all_methods(&request).unwrap();
    assert_eq!(list.version, "1.2.3");

    let namespaces: Vec<_> = list.namespaces.iter().map(|n| n.namespace.as_str()).collect();
    assert_eq!(namespaces, vec!["Lib", "Lib.math"]);
    assert!(list.namespaces[0].methods.is_empty());
    let math: Vec<_> = list.namespaces[1]
        .methods
        .iter()
        .map(|m| m.name.as_str())
        .collect();
    assert_eq!(math, vec!["add", "sub", "twice"]);

    assert_eq!(list.failed.len(), 1);
    assert_eq!(list.failed[0].namespace, "Broken");
}

#[test]
fn request_validation_happens_before_loading() {
    let p = pipeline();
    let err = p
        .find_single_method(&ResolutionRequest::new("nope", "1.0").with_method("x"))
        .unwrap_err();
    assert_eq!(err.kind(), "unknown_library");

    let err = p
        .find_single_method(&ResolutionRequest::new("lib", "1.2.3").with_method("a;alert(1)"))
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");

    let err = p
        .find_single_method(&ResolutionRequest::new("lib", "1.2.3"))
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
}

#[test]
fn max_expand_caps_requests() {
    let p = pipeline_with(Settings {
        timeout: Duration::from_secs(5),
        max_expand: 1,
        related_limit: 1,
    });
    let request = ResolutionRequest::new("lib", "1.2.3")
        .with_method("math.sub")
        .with_expand(40);
    let data = p.find_single_method(&request).unwrap();
    assert_eq!(data.span, Span::new(3, 7));
    assert_eq!(data.related.len(), 1);
}

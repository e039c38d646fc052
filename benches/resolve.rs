use criterion::{Criterion, black_box, criterion_group, criterion_main};
use jsapi::linkify::{Linkifier, strip_markers};
use jsapi::registry::LibraryDescriptor;
use jsapi::resolver::{Resolver, body_text};
use jsapi::sandbox::table::TableSandbox;
use jsapi::source::SourceText;

const METHODS: usize = 2_000;

fn synthetic_library() -> (String, TableSandbox) {
    let mut source = String::from("var Lib = { fn: {} };\n");
    let mut table = TableSandbox::new();
    for i in 0..METHODS {
        let text = format!(
            "function (a, b) {{\n  var r{i} = Lib.m{prev}(a, b);\n  return this.m{i}(r{i}, {i});\n}}",
            prev = i.saturating_sub(1)
        );
        source.push_str(&format!("Lib.m{i} = {text};\n"));
        table = table.function(&format!("Lib.m{i}"), &text);
    }
    (source, table)
}

fn descriptor() -> LibraryDescriptor {
    LibraryDescriptor {
        name: "Lib".into(),
        look_in: vec!["Lib".into(), "Lib.fn".into()],
        ..Default::default()
    }
}

fn bench_location_search(c: &mut Criterion) {
    let (raw, mut table) = synthetic_library();
    let source = SourceText::new(raw);
    let lib = descriptor();

    c.bench_function("find_span_last_method", |b| {
        let text = format!(
            "function (a, b) {{\n  var r{i} = Lib.m{prev}(a, b);\n  return this.m{i}(r{i}, {i});\n}}",
            i = METHODS - 1,
            prev = METHODS - 2
        );
        b.iter(|| source.find_span(black_box(body_text(&text))))
    });

    c.bench_function("resolve_qualified", |b| {
        let mut resolver = Resolver::new(&mut table, &source, &lib);
        b.iter(|| resolver.resolve(black_box("m1500")))
    });
}

fn bench_linkify(c: &mut Criterion) {
    let (raw, mut table) = synthetic_library();
    let source = SourceText::new(raw);
    let lib = descriptor();
    let snippet = source.slice_lines(jsapi::model::Span::new(100, 400));
    let linkifier = Linkifier::new(&lib.look_in);

    c.bench_function("annotate_300_lines", |b| {
        let mut resolver = Resolver::new(&mut table, &source, &lib);
        b.iter(|| linkifier.annotate(black_box(&snippet), &mut resolver, "Lib"))
    });

    let annotated = {
        let mut resolver = Resolver::new(&mut table, &source, &lib);
        linkifier.annotate(&snippet, &mut resolver, "Lib")
    };
    c.bench_function("strip_markers_300_lines", |b| {
        b.iter(|| strip_markers(black_box(&annotated)))
    });
}

criterion_group!(benches, bench_location_search, bench_linkify);
criterion_main!(benches);

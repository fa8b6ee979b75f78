use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::Result;
use inline_require::{
    Asset, HostCapabilities, InlineRequireOptions, InlineRequirePlugin, MemoryCompilation,
    TransformResult,
    dispatcher::{InProcess, TransformBackend, TransformRequest},
    grammar, source_map,
};
use pretty_assertions::assert_eq;
use sourcemap::SourceMapBuilder;

const ES_IMPORT: &str = include_str!("fixtures/es-import/main.js");

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Compilation matching the `es-import` fixture
fn es_import_compilation() -> MemoryCompilation {
    let mut compilation = MemoryCompilation::new("/project");
    compilation.add_module("./src/entry.js", "/project/src/entry.js", None);
    compilation.add_module("./src/foo.js", "/project/src/foo.js", None);
    compilation.add_module("./src/bar.js", "/project/src/bar.js", None);
    compilation.add_module(
        "./node_modules/left-pad/index.js",
        "/project/node_modules/left-pad/index.js",
        None,
    );
    compilation.add_chunk_file("main.js", Asset::new(ES_IMPORT));
    compilation
}

fn options() -> InlineRequireOptions {
    InlineRequireOptions {
        concurrency: Some(2),
        ..InlineRequireOptions::default()
    }
}

/// The body of the unit following the header comment of `module`
fn module_output<'a>(source: &'a str, module: &str) -> &'a str {
    let header = format!("/***/ \"{module}\":");
    let start = source.find(&header).expect("module is in the bundle");
    let rest = &source[start..];
    let body = rest
        .find(grammar::UNIT_BOUNDARY)
        .expect("module has a wrapper")
        + grammar::UNIT_BOUNDARY.len();
    let end = rest.find("/***/ })").expect("module wrapper is closed");
    &rest[body..end]
}

#[test]
fn test_es_imports_are_inlined_at_call_site() {
    init_logging();
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    let mut compilation = es_import_compilation();

    let summary = plugin.run(&mut compilation).unwrap();
    assert_eq!(summary.transformed, 1);

    let output = &compilation.assets["main.js"].code;
    insta::assert_snapshot!(module_output(output, "./src/entry.js"), @r#"
    "use strict";
    __webpack_require__.r(__webpack_exports__);
    /* harmony import */ // (inlined) ./src/foo.js
    /* harmony import */ // (inlined) ./src/bar.js
    /* harmony import */ var left_pad__WEBPACK_IMPORTED_MODULE_2__ = __webpack_require__(/*! left-pad */ "./node_modules/left-pad/index.js");
    /* harmony import */ var left_pad__WEBPACK_IMPORTED_MODULE_2___default = /*#__PURE__*/__webpack_require__.n(left_pad__WEBPACK_IMPORTED_MODULE_2__);




    (() => {
      // Expected inline import:
      const foo = Object((__webpack_require__(/*! ./foo */ "./src/foo.js"))["default"])();
      // Expected inline import:
      const bar = new (__webpack_require__(/*! ./bar */ "./src/bar.js"))["Bar"]();

      return left_pad__WEBPACK_IMPORTED_MODULE_2___default()(foo + bar + (__webpack_require__(/*! ./bar */ "./src/bar.js"))["BAZ"], 10);
    })();
    "#);

    // Every other unit is untouched
    for module in ["./src/foo.js", "./src/bar.js"] {
        assert_eq!(
            module_output(output, module),
            module_output(ES_IMPORT, module)
        );
    }
}

#[test]
fn test_side_effect_imports_are_left_as_they_are() {
    init_logging();
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    let mut compilation = MemoryCompilation::new("/project");
    compilation.add_module("./src/foo.js", "/project/src/foo.js", Some(false));
    compilation.add_module("./src/bar.js", "/project/src/bar.js", Some(false));
    compilation.add_chunk_file("main.js", Asset::new(ES_IMPORT));

    let summary = plugin.run(&mut compilation).unwrap();
    assert_eq!(summary.transformed, 0);
    assert_eq!(compilation.updates, 0);
    assert_eq!(compilation.assets["main.js"].code, ES_IMPORT);
}

#[test]
fn test_dependencies_declared_free_are_inlined() {
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    let mut compilation = es_import_compilation();
    compilation.modules[3].side_effect_free = Some(true);

    plugin.run(&mut compilation).unwrap();
    let entry = module_output(&compilation.assets["main.js"].code, "./src/entry.js");
    assert!(!entry.contains("left_pad__WEBPACK_IMPORTED_MODULE_2__"));
    assert!(entry.contains(
        r#"return (__webpack_require__.n(__webpack_require__(/*! left-pad */ "./node_modules/left-pad/index.js")))()"#
    ));
}

#[test]
fn test_hashed_module_ids() {
    let source = concat!(
        "/***/ \"ZieR\":\n",
        "/***/ (function(module, __webpack_exports__, __webpack_require__) {\n",
        "var _foo__WEBPACK_IMPORTED_MODULE_0__ = __webpack_require__(\"Vh2x\");\n",
        "Object(_foo__WEBPACK_IMPORTED_MODULE_0__[\"default\"])();\n",
        "/***/ })\n",
    );
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    let mut compilation = MemoryCompilation::new("/project");
    compilation.add_module("ZieR", "/project/src/entry.js", None);
    compilation.add_module("Vh2x", "/project/src/foo.js", None);
    compilation.add_chunk_file("main.7f3a.js", Asset::new(source));

    plugin.run(&mut compilation).unwrap();
    assert_eq!(
        module_output(&compilation.assets["main.7f3a.js"].code, "ZieR"),
        "\n// (inlined) Vh2x\nObject((__webpack_require__(\"Vh2x\"))[\"default\"])();\n"
    );
}

#[test]
fn test_bindings_do_not_cross_unit_boundaries() {
    let name = "_foo__WEBPACK_IMPORTED_MODULE_0__";
    let source = format!(
        "{header}\nvar {name} = __webpack_require__(\"./src/foo.js\");\n}}),\n{header}\n{name}();\n}})",
        header = grammar::UNIT_BOUNDARY,
    );
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    let mut compilation = MemoryCompilation::new("/project");
    compilation.add_module("./src/foo.js", "/project/src/foo.js", None);
    compilation.add_chunk_file("main.js", Asset::new(source.clone()));

    let summary = plugin.run(&mut compilation).unwrap();
    assert_eq!(summary.unchanged, 1);
    assert_eq!(compilation.assets["main.js"].code, source);
}

#[test]
fn test_transform_of_own_output_is_a_no_op() {
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    let mut compilation = es_import_compilation();
    plugin.run(&mut compilation).unwrap();
    let first = compilation.assets["main.js"].code.clone();

    let summary = plugin.run(&mut compilation).unwrap();
    assert_eq!(summary.transformed, 0);
    assert_eq!(compilation.assets["main.js"].code, first);
}

/// Backend double counting how often the rewriter actually runs
#[derive(Debug, Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

impl TransformBackend for CountingBackend {
    fn transform(&self, request: &TransformRequest<'_>) -> Result<TransformResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        InProcess.transform(request)
    }
}

#[test]
fn test_watch_rebuilds_reuse_cached_results() {
    init_logging();
    let backend = Arc::new(CountingBackend::default());
    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets)
        .with_backend(backend.clone());

    let mut outputs = Vec::new();
    for _ in 0..3 {
        let mut compilation = es_import_compilation();
        compilation.flags.watch = true;
        plugin.run(&mut compilation).unwrap();
        outputs.push(compilation.assets["main.js"].code.clone());
    }

    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
    let stats = plugin.cache().unwrap().stats();
    assert_eq!((stats.hits, stats.misses), (2, 1));

    // A changed classification is a different key
    plugin.reset();
    let mut compilation = es_import_compilation();
    compilation.flags.watch = true;
    compilation.modules[1].side_effect_free = Some(false);
    plugin.run(&mut compilation).unwrap();
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    assert!(compilation.assets["main.js"].code.contains("_foo__WEBPACK_IMPORTED_MODULE_0__"));
}

#[test]
fn test_source_maps_resolve_to_original_sources() {
    // Host map: every generated line maps to the same line of entry.js
    let lines = ES_IMPORT.lines().count() as u32;
    let mut builder = SourceMapBuilder::new(Some("main.js"));
    let src = builder.add_source("webpack:///./src/entry.js");
    for line in 0..lines {
        builder.add_raw(line, 0, line, 0, Some(src), None, false);
    }
    let host_map = source_map::to_json(&builder.into_sourcemap()).unwrap();

    let mut compilation = es_import_compilation();
    compilation.flags.source_maps_enabled = true;
    compilation.assets["main.js"] = Asset::new(ES_IMPORT).with_map(host_map);

    let mut plugin = InlineRequirePlugin::new(options(), HostCapabilities::ProcessAssets);
    plugin.run(&mut compilation).unwrap();

    let asset = &compilation.assets["main.js"];
    let map = source_map::parse(asset.map.as_deref().unwrap()).unwrap();

    // The inlined `Bar` use sits on the same line in input and output
    let (line_index, line) = asset
        .code
        .lines()
        .enumerate()
        .find(|(_, line)| line.contains("const bar = new"))
        .unwrap();
    let column = line.find("(__webpack_require__").unwrap() as u32;
    let token = map.lookup_token(line_index as u32, column).unwrap();
    assert_eq!(token.get_source(), Some("webpack:///./src/entry.js"));
    assert_eq!(token.get_src_line(), line_index as u32);
}

#[test]
fn test_source_maps_are_dropped_when_disabled() {
    let mut compilation = es_import_compilation();
    compilation.assets["main.js"] = Asset::new(ES_IMPORT).with_map("{}");

    let mut plugin = InlineRequirePlugin::new(
        InlineRequireOptions {
            source_map: Some(false),
            ..options()
        },
        HostCapabilities::ProcessAssets,
    );
    plugin.run(&mut compilation).unwrap();
    assert_eq!(compilation.assets["main.js"].map, None);
}

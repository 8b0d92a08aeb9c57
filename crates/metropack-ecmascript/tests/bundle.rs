//! End-to-end bundling scenarios: build a graph from a fixture tree on
//! disk, serialize it, and check the emitted text and map.

use std::{fs, path::Path, sync::Arc};

use metropack_core::{
    config::{Config, Platform},
    graph_builder::GraphBuilder,
    module_id::ModuleIdFactory,
    transformer::NullImageProber,
};
use metropack_ecmascript::{
    serialize::{serialize_bundle, SerializeOptions},
    transform::DefaultTransformer,
    tree_shake::shake,
};

fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

fn builder(config: Config) -> GraphBuilder {
    GraphBuilder::new(
        Arc::new(config),
        Arc::new(DefaultTransformer),
        Arc::new(NullImageProber),
    )
}

async fn bundle_for(config: &Config) -> metropack_ecmascript::Bundle {
    let graph_builder = builder(config.clone());
    let graph = graph_builder.build(&config.entry_path()).await.unwrap();
    let ids = ModuleIdFactory::new();
    serialize_bundle(
        &graph,
        &SerializeOptions {
            config,
            ids: &ids,
            usage: None,
            source_map_url: None,
        },
    )
    .unwrap()
}

#[tokio::test]
async fn minimal_bundle_has_prelude_define_and_require() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "index.js", "console.log('hello');");

    let config = Config::new(root, "index.js");
    let bundle = bundle_for(&config).await;

    assert!(bundle.code.contains("__BUNDLE_START_TIME__"));
    assert!(bundle.code.contains("__DEV__=true"));
    assert!(bundle.code.contains("__d("));
    assert!(bundle.code.contains("__r("));
    assert_eq!(bundle.modules.len(), 1);

    // exactly one user source plus the synthetic prelude
    let sources: Vec<&str> = bundle.map.sources().collect();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0], "__prelude__");
    assert!(sources[1].ends_with("index.js"));
}

#[tokio::test]
async fn platform_variant_is_selected_per_platform() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "index.js", "require('./platform');");
    write(root, "platform.js", "module.exports = 'generic';");
    write(root, "platform.ios.js", "module.exports = 'ios';");

    let mut config = Config::new(root, "index.js");
    config.platform = Platform::Ios;
    let bundle = bundle_for(&config).await;
    assert!(bundle.code.contains("platform.ios.js"));
    assert!(!bundle.code.contains("\"platform.js\""));

    config.platform = Platform::Android;
    let bundle = bundle_for(&config).await;
    assert!(bundle.code.contains("\"platform.js\""));
    assert!(!bundle.code.contains("platform.ios.js"));
}

#[tokio::test]
async fn serialization_order_is_post_order_with_dense_ids() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "index.js", "require('./a');");
    write(root, "a.js", "require('./b');");
    write(root, "b.js", "require('./c');");
    write(root, "c.js", "module.exports = 1;");

    let config = Config::new(root, "index.js");
    let bundle = bundle_for(&config).await;

    let names: Vec<(u32, bool, bool, bool, bool)> = bundle
        .modules
        .iter()
        .map(|(id, code)| {
            (
                *id,
                code.contains("\"c.js\""),
                code.contains("\"b.js\""),
                code.contains("\"a.js\""),
                code.contains("\"index.js\""),
            )
        })
        .collect();
    assert_eq!(names.len(), 4);
    assert!(names[0].1 && names[0].0 == 0, "c.js first with id 0");
    assert!(names[1].2 && names[1].0 == 1, "b.js second with id 1");
    assert!(names[2].3 && names[2].0 == 2, "a.js third with id 2");
    assert!(names[3].4 && names[3].0 == 3, "entry last with id 3");
}

#[tokio::test]
async fn tree_shaking_prunes_unused_reexport_sources() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "index.js", "import { used } from './lib';\nused();\n");
    write(
        root,
        "lib/index.js",
        "export { used } from './used';\nexport { unused } from './unused';\n",
    );
    write(root, "lib/used.js", "export const used = () => 1;\n");
    write(root, "lib/unused.js", "export const unused = () => 2;\n");

    let mut config = Config::new(root, "index.js");
    config.dev = false;
    config.experimental.tree_shaking = true;

    let graph_builder = builder(config.clone());
    let mut graph = graph_builder.build(&config.entry_path()).await.unwrap();
    let result = shake(&mut graph, &config.root);

    let ids = ModuleIdFactory::new();
    let bundle = serialize_bundle(
        &graph,
        &SerializeOptions {
            config: &config,
            ids: &ids,
            usage: Some(&result.usage),
            source_map_url: None,
        },
    )
    .unwrap();

    assert!(bundle.code.contains("used.js"));
    assert!(!bundle.code.contains("unused.js"));
}

#[tokio::test]
async fn namespace_import_preserves_the_whole_module() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(
        root,
        "index.js",
        "import * as lib from './lib';\nlib.one();\n",
    );
    write(
        root,
        "lib.js",
        "export const one = () => 1;\nexport const two = () => 2;\n",
    );

    let mut config = Config::new(root, "index.js");
    config.dev = false;

    let graph_builder = builder(config.clone());
    let mut graph = graph_builder.build(&config.entry_path()).await.unwrap();
    let result = shake(&mut graph, &config.root);

    let ids = ModuleIdFactory::new();
    let bundle = serialize_bundle(
        &graph,
        &SerializeOptions {
            config: &config,
            ids: &ids,
            usage: Some(&result.usage),
            source_map_url: None,
        },
    )
    .unwrap();

    // both exports survive because the namespace marks everything used
    assert!(bundle.code.contains("exports.one"));
    assert!(bundle.code.contains("exports.two"));
}

#[tokio::test]
async fn asset_module_registers_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "index.js", "require('./icon.png');");
    fs::write(root.join("icon.png"), b"not-a-real-png").unwrap();
    write(
        root,
        "node_modules/@react-native/assets-registry/registry.js",
        "module.exports.registerAsset = function (a) { return a; };",
    );

    let config = Config::new(root, "index.js");
    let bundle = bundle_for(&config).await;

    assert!(bundle.code.contains("registerAsset"));
    assert!(bundle.code.contains("\"name\":\"icon\""));
    assert!(bundle.code.contains("\"type\":\"png\""));
    assert!(bundle.code.contains("\"httpServerLocation\":\"/assets\""));
    assert_eq!(bundle.assets.len(), 1);
    assert_eq!(bundle.assets[0].name, "icon");
}

#[tokio::test]
async fn run_before_main_module_requires_come_first() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write(root, "index.js", "require('./setup');");
    write(root, "setup.js", "globalThis.ready = true;");

    let mut config = Config::new(root, "index.js");
    config.serializer.run_before_main_module = vec!["setup.js".into()];
    let bundle = bundle_for(&config).await;

    let requires: Vec<&str> = bundle
        .post
        .lines()
        .filter(|l| l.starts_with("__r("))
        .collect();
    assert_eq!(requires.len(), 2);
    // the setup module (id 0, serialized first) runs before the entry
    assert_eq!(requires[0], "__r(0);");
    assert!(requires[1].starts_with("__r("));
}

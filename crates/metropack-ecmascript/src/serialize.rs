//! Bundle assembly: prelude, `__d`-wrapped modules in dependency-first
//! order, the runtime entry calls, and the stitched source map.

use std::{fmt::Write as _, path::Path};

use anyhow::{Context, Result};
use data_encoding::BASE64;
use indexmap::IndexMap;
use metropack_core::{
    asset::AssetInfo,
    code_builder::{Code, CodeBuilder},
    config::Config,
    module::Module,
    module_graph::ModuleGraph,
    module_id::ModuleIdFactory,
    order::post_order,
    source_map::{IndexSourceMap, SourceMapJson},
    transformer::{CodegenContext, ExportUsage},
};
use rustc_hash::FxHashMap;
use tracing::instrument;

use crate::runtime::{StringifyJs, DEFINE, FACTORY_PARAMS, GLOBAL_PREFIX_VAR, REQUIRE};

/// The serializer's output: the `(pre, modules, post)` triple, the
/// assembled text, its source map, and the asset metadata of every asset
/// module that survived into the graph.
pub struct Bundle {
    pub pre: String,
    pub modules: Vec<(u32, String)>,
    pub post: String,
    pub code: String,
    pub map: IndexSourceMap,
    pub assets: Vec<AssetInfo>,
}

pub struct SerializeOptions<'a> {
    pub config: &'a Config,
    pub ids: &'a ModuleIdFactory,
    /// Export usage from tree shaking; enables export-level elision.
    pub usage: Option<&'a FxHashMap<String, ExportUsage>>,
    /// URL for the external `sourceMappingURL` comment. Ignored when the
    /// config asks for an inline map.
    pub source_map_url: Option<String>,
}

/// Serialize the graph into a complete bundle.
#[instrument(skip_all, fields(modules = graph.len()))]
pub fn serialize_bundle(graph: &ModuleGraph, options: &SerializeOptions<'_>) -> Result<Bundle> {
    let config = options.config;
    let ids = options.ids;

    // pre: runtime constants, then polyfills with ids below every user id
    let mut pre_builder = CodeBuilder::new();
    let mut prelude_map = SourceMapJson::empty("__prelude__".to_string());
    if config.serializer.should_add_to_ignore_list.is_some() {
        prelude_map.mark_ignored();
    }
    pre_builder.push_source(&prelude_text(config), Some(prelude_map));
    for polyfill in &config.serializer.polyfills {
        let path = if polyfill.is_absolute() {
            polyfill.clone()
        } else {
            config.root.join(polyfill)
        };
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("reading polyfill {}", path.display()))?;
        let path_key = path.to_string_lossy().into_owned();
        let id = ids.id_for(&path_key);
        let verbose = verbose_name(&path_key, config);
        let mut wrapped = String::new();
        write!(
            wrapped,
            "{}{DEFINE}(function({FACTORY_PARAMS}) {{\n{source}\n}}, {id}, [], {});\n",
            config.serializer.global_prefix,
            StringifyJs(&verbose)
        )?;
        pre_builder.push_static(&wrapped);
    }
    let pre = pre_builder.build();

    // modules, dependencies first
    let order = post_order(graph);
    let mut modules: Vec<(u32, String)> = Vec::with_capacity(order.len());
    let mut builder = CodeBuilder::new();
    builder.push_code(&pre);

    for ix in order {
        let module = graph.module(ix);
        let id = ids.id_for(&module.path);
        let code = module_source(module, id, graph, ids, config, options.usage, None)?;
        modules.push((id, code.source_code().trim_end().to_string()));
        builder.push_code(&code);
    }

    // post: run-before modules, the entry require, the source map reference
    let mut post = String::new();
    let prefix = &config.serializer.global_prefix;
    for before in &config.serializer.run_before_main_module {
        let abs = config.root.join(before);
        let key = metropack_core::resolve::canonical(&abs)
            .to_string_lossy()
            .into_owned();
        if graph.contains(&key) {
            writeln!(post, "{prefix}{REQUIRE}({});", ids.id_for(&key))?;
        }
    }
    if let Some(entry) = graph.entry_path() {
        writeln!(post, "{prefix}{REQUIRE}({});", ids.id_for(entry))?;
    }
    builder.push_static(&post);

    let code = builder.build();
    let map = apply_ignore_list(code.generate_source_map(), config);

    let mut text = code.into_source_code();
    if config.serializer.inline_source_map {
        let encoded = BASE64.encode(map.to_json().as_bytes());
        writeln!(
            text,
            "//# sourceMappingURL=data:application/json;charset=utf-8;base64,{encoded}"
        )?;
    } else if let Some(url) = &options.source_map_url {
        writeln!(text, "//# sourceMappingURL={url}")?;
    }

    let assets = graph
        .iter()
        .filter_map(|(_, m)| m.asset_info.clone())
        .collect();

    Ok(Bundle {
        pre: pre.into_source_code(),
        modules,
        post,
        code: text,
        map,
        assets,
    })
}

/// One module wrapped in its define call. The factory signature and the
/// parameter positions are a wire contract with the runtime. `inverse_deps`
/// adds the fifth parameter HMR clients use to walk toward an accepting
/// boundary.
pub fn module_source(
    module: &Module,
    id: u32,
    graph: &ModuleGraph,
    ids: &ModuleIdFactory,
    config: &Config,
    usage: Option<&FxHashMap<String, ExportUsage>>,
    inverse_deps: Option<&IndexMap<u32, Vec<u32>>>,
) -> Result<Code> {
    // dependencyMap slots: one per resolved edge; edges whose target was
    // pruned or tolerated-missing keep their position as `null`
    let mut dep_index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut dep_ids: Vec<Option<u32>> = Vec::with_capacity(module.resolved_deps.len());
    for (slot, (dep, specifier)) in module
        .resolved_deps
        .iter()
        .zip(module.specifiers.iter())
        .enumerate()
    {
        if graph.contains(dep) {
            dep_index.insert(specifier.as_str(), slot);
            dep_ids.push(Some(ids.id_for(dep)));
        } else {
            dep_ids.push(None);
        }
    }

    let generated = module.ast.generate(&CodegenContext {
        dep_index: &dep_index,
        used_exports: usage.and_then(|u| u.get(&module.path)),
    })?;

    let map = generated.map.map(|mut map| {
        if config.serializer.server_relative_sources {
            for source in &mut map.sources {
                *source = verbose_name(source, config);
            }
        }
        map
    });

    let mut builder = CodeBuilder::new();
    builder.push_static(&format!(
        "{}{DEFINE}(function({FACTORY_PARAMS}) {{\n",
        config.serializer.global_prefix
    ));
    builder.push_source(&generated.code, map);
    if !generated.code.ends_with('\n') {
        builder.push_static("\n");
    }

    let deps_literal = dep_ids
        .iter()
        .map(|id| match id {
            Some(id) => id.to_string(),
            None => "null".to_string(),
        })
        .collect::<Vec<_>>()
        .join(",");
    let verbose = verbose_name(&module.path, config);
    let mut footer = format!(
        "}}, {id}, [{deps_literal}], {}",
        StringifyJs(&verbose)
    );
    if let Some(inverse) = inverse_deps {
        // JSON object keys are strings; the runtime indexes it by number
        let by_id: IndexMap<String, &Vec<u32>> = inverse
            .iter()
            .map(|(id, parents)| (id.to_string(), parents))
            .collect();
        write!(footer, ", {}", StringifyJs(&by_id))?;
    }
    footer.push_str(");\n");
    builder.push_static(&footer);

    Ok(builder.build())
}

/// Module text for an HMR update entry: the define call plus the source
/// comments dev tools use to name the script.
pub fn hmr_module_source(
    module: &Module,
    id: u32,
    graph: &ModuleGraph,
    ids: &ModuleIdFactory,
    config: &Config,
    inverse_deps: &IndexMap<u32, Vec<u32>>,
) -> Result<String> {
    let code = module_source(module, id, graph, ids, config, None, Some(inverse_deps))?;
    let verbose = verbose_name(&module.path, config);
    let mut text = code.into_source_code();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    write!(text, "//# sourceMappingURL={verbose}.map\n//# sourceURL={verbose}")?;
    Ok(text)
}

fn prelude_text(config: &Config) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "var __BUNDLE_START_TIME__=Date.now();");
    let _ = writeln!(out, "var __DEV__={};", config.dev);
    let _ = writeln!(out, "var process=this.process||{{}};");
    let _ = writeln!(out, "process.env=process.env||{{}};");
    let _ = writeln!(out, "process.env.NODE_ENV={};", StringifyJs(&config.node_env()));
    for (name, value) in &config.serializer.extra_vars {
        let _ = writeln!(out, "var {name}={};", StringifyJs(value));
    }
    let _ = writeln!(
        out,
        "var {GLOBAL_PREFIX_VAR}={};",
        StringifyJs(&config.serializer.global_prefix)
    );
    out
}

/// Module path relative to the project root, forward slashes. Used as the
/// define call's verbose name and for server-relative map sources.
pub fn verbose_name(path: &str, config: &Config) -> String {
    let relative = pathdiff::diff_paths(Path::new(path), &config.root)
        .unwrap_or_else(|| Path::new(path).to_path_buf());
    relative.to_string_lossy().replace('\\', "/")
}

fn apply_ignore_list(mut map: IndexSourceMap, config: &Config) -> IndexSourceMap {
    let Some(predicate) = &config.serializer.should_add_to_ignore_list else {
        return map;
    };
    for section in &mut map.sections {
        let ignored = section
            .map
            .sources
            .first()
            .is_some_and(|source| {
                source == "__prelude__" || predicate.matches(Path::new(source))
            });
        if ignored {
            section.map.mark_ignored();
        }
    }
    map
}

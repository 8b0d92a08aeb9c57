use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result};
use metropack_core::{graph_builder::GraphBuilder, module_id::ModuleIdFactory};
use metropack_ecmascript::{
    serialize::{serialize_bundle, SerializeOptions},
    transform::DefaultTransformer,
    tree_shake::shake,
};
use metropack_image::ImageSizeProber;
use tracing::info;

use crate::arguments::BuildArguments;

pub async fn build(args: &BuildArguments) -> Result<()> {
    let start = Instant::now();
    let mut config = args.common.to_config()?;
    config.dev = args.dev;
    config.serializer.inline_source_map = args.inline_source_map;
    config.experimental.tree_shaking = args.tree_shaking;

    let builder = GraphBuilder::new(
        Arc::new(config.clone()),
        Arc::new(DefaultTransformer),
        Arc::new(ImageSizeProber),
    )
    .with_progress(Arc::new(|processed, total| {
        tracing::debug!(processed, total, "transforming");
    }));

    let mut graph = builder.build(&config.entry_path()).await?;

    let usage = if !config.dev && config.experimental.tree_shaking {
        let result = shake(&mut graph, &config.root);
        info!(pruned = result.removed.len(), "tree shaking");
        Some(result.usage)
    } else {
        None
    };

    let map_name = args
        .out
        .file_name()
        .map(|n| format!("{}.map", n.to_string_lossy()))
        .unwrap_or_else(|| "bundle.js.map".to_string());
    let ids = ModuleIdFactory::new();
    let bundle = serialize_bundle(
        &graph,
        &SerializeOptions {
            config: &config,
            ids: &ids,
            usage: usage.as_ref(),
            source_map_url: (!config.serializer.inline_source_map).then(|| map_name.clone()),
        },
    )?;

    if let Some(parent) = args.out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }
    std::fs::write(&args.out, &bundle.code)
        .with_context(|| format!("writing {}", args.out.display()))?;
    if !config.serializer.inline_source_map {
        let map_path = args.out.with_file_name(&map_name);
        std::fs::write(&map_path, bundle.map.to_json())
            .with_context(|| format!("writing {}", map_path.display()))?;
    }
    if !bundle.assets.is_empty() {
        let assets_path = args.out.with_extension("assets.json");
        std::fs::write(&assets_path, serde_json::to_string_pretty(&bundle.assets)?)
            .with_context(|| format!("writing {}", assets_path.display()))?;
    }

    info!(
        modules = bundle.modules.len(),
        assets = bundle.assets.len(),
        out = %args.out.display(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "build complete"
    );
    Ok(())
}

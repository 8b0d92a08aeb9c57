use std::path::{Path, PathBuf};

use clap::{Args, Parser, ValueEnum};
use metropack_core::config::{Config, Platform};

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
pub enum Arguments {
    /// Produce a bundle (and its source map) on disk.
    Build(BuildArguments),
    /// Start the development server with file watching and hot reload.
    Dev(DevArguments),
}

impl Arguments {
    /// The directory of the application. see [CommonArguments]::dir
    pub fn dir(&self) -> Option<&Path> {
        match self {
            Arguments::Build(args) => args.common.dir.as_deref(),
            Arguments::Dev(args) => args.common.dir.as_deref(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum PlatformArg {
    Ios,
    Android,
    Web,
}

impl From<PlatformArg> for Platform {
    fn from(value: PlatformArg) -> Self {
        match value {
            PlatformArg::Ios => Platform::Ios,
            PlatformArg::Android => Platform::Android,
            PlatformArg::Web => Platform::Web,
        }
    }
}

#[derive(Debug, Args, Clone)]
pub struct CommonArguments {
    /// The entry source file, relative to the project directory.
    #[clap(value_parser, default_value = "index.js")]
    pub entry: PathBuf,

    /// The directory of the application.
    /// If no directory is provided, the current directory will be used.
    #[clap(short, long, value_parser)]
    pub dir: Option<PathBuf>,

    /// Platform to bundle for.
    #[clap(long, value_enum, default_value_t = PlatformArg::Ios)]
    pub platform: PlatformArg,

    /// Extra `node_modules` roots to search (e.g. a hoisted monorepo root).
    #[clap(long)]
    pub node_modules_path: Vec<PathBuf>,

    /// Disable the `.native.js` fallback between platform-specific and
    /// plain files.
    #[clap(long)]
    pub no_prefer_native_platform: bool,
}

impl CommonArguments {
    pub fn to_config(&self) -> anyhow::Result<Config> {
        let root = match &self.dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let mut config = Config::new(root, self.entry.clone());
        config.platform = self.platform.into();
        config.resolver.node_modules_paths = self.node_modules_path.clone();
        config.resolver.prefer_native_platform = !self.no_prefer_native_platform;
        Ok(config)
    }
}

#[derive(Debug, Args)]
#[clap(author, version, about, long_about = None)]
pub struct BuildArguments {
    #[clap(flatten)]
    pub common: CommonArguments,

    /// Where to write the bundle. The source map lands next to it with a
    /// `.map` suffix.
    #[clap(short, long, default_value = "bundle.js")]
    pub out: PathBuf,

    /// Build a development bundle (`__DEV__ = true`, tolerant resolution).
    #[clap(long)]
    pub dev: bool,

    /// Inline the source map as a data URL instead of a separate file.
    #[clap(long)]
    pub inline_source_map: bool,

    /// Prune modules (and unused exports) unreachable from the entry.
    /// Production bundles only.
    #[clap(long)]
    pub tree_shaking: bool,
}

#[derive(Debug, Args)]
#[clap(author, version, about, long_about = None)]
pub struct DevArguments {
    #[clap(flatten)]
    pub common: CommonArguments,

    /// The port number on which to start the server.
    #[clap(short, long, value_parser, default_value_t = 8081, env = "PORT")]
    pub port: u16,

    /// Quiescence window (in milliseconds) before a batch of file changes
    /// triggers a rebuild.
    #[clap(long, default_value_t = 300)]
    pub debounce_ms: u64,
}

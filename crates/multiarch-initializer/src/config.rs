use std::path::PathBuf;

use clap::Parser;
use utils::version;

use crate::domain::patch::PatchFormat;

pub const DEFAULT_ANNOTATION: &str = "initializer.jeefy.net/multiarch";
pub const DEFAULT_INITIALIZER_NAME: &str = "multiarch.initializer.jeefy.net";
pub const DEFAULT_BASELINE_ARCH: &str = "amd64";

/// Kubernetes initializer rewriting container images for the architecture of the node a
/// pod is assigned to.
#[derive(Parser, Clone, Debug)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        env = "MULTIARCH_ANNOTATION",
        default_value = DEFAULT_ANNOTATION,
        help = "The annotation holding architecture-specific images"
    )]
    pub annotation: String,

    #[arg(
        long,
        env = "MULTIARCH_INITIALIZER_NAME",
        default_value = DEFAULT_INITIALIZER_NAME,
        help = "The initializer name"
    )]
    pub initializer_name: String,

    #[arg(
        long,
        env = "MULTIARCH_NAMESPACE",
        help = "Only watch pods in this namespace, all namespaces when unset"
    )]
    pub namespace: Option<String>,

    #[arg(
        long,
        env = "MULTIARCH_REQUIRE_ANNOTATION",
        help = "Skip image rewriting for pods without the annotation"
    )]
    pub require_annotation: bool,

    #[arg(
        long,
        env = "MULTIARCH_BASELINE_ARCH",
        default_value = DEFAULT_BASELINE_ARCH,
        help = "Node architecture whose images are already in the manifest, never rewritten"
    )]
    pub baseline_arch: String,

    #[arg(
        long,
        value_enum,
        env = "MULTIARCH_PATCH_FORMAT",
        default_value_t = PatchFormat::Strategic,
        help = "Patch format used when committing rewritten images"
    )]
    pub patch_format: PatchFormat,

    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Number of pods initialized concurrently"
    )]
    pub concurrency: u16,

    #[arg(
        long,
        env = "KUBECONFIG_PATH",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to kubeconfig file, in-cluster or default config when unset"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "MULTIARCH_LOG_FILE",
        value_hint = clap::ValueHint::FilePath,
        help = "Also write logs to this file, rotated daily, e.g. /logs/initializer.log"
    )]
    pub log_file: Option<PathBuf>,
}

/// Settings the reconciler needs for every pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializerConfig {
    pub initializer_name: String,
    pub annotation: String,
    pub require_annotation: bool,
    pub baseline_architecture: String,
    pub patch_format: PatchFormat,
}

impl Default for InitializerConfig {
    fn default() -> Self {
        Self {
            initializer_name: DEFAULT_INITIALIZER_NAME.to_string(),
            annotation: DEFAULT_ANNOTATION.to_string(),
            require_annotation: false,
            baseline_architecture: DEFAULT_BASELINE_ARCH.to_string(),
            patch_format: PatchFormat::default(),
        }
    }
}

impl From<&Cli> for InitializerConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            initializer_name: cli.initializer_name.clone(),
            annotation: cli.annotation.clone(),
            require_annotation: cli.require_annotation,
            baseline_architecture: cli.baseline_arch.clone(),
            patch_format: cli.patch_format,
        }
    }
}

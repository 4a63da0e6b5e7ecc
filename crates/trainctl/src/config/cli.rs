use std::path::PathBuf;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use utils::logging::LogFormat;
use utils::version;

use crate::config::submit::SubmitArgs;

#[derive(Parser)]
#[command(about = "Submit, inspect and delete GPU training jobs", version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(
        long,
        global = true,
        help = "Path to the kubeconfig file",
        env = "KUBECONFIG",
        value_hint = clap::ValueHint::FilePath
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        short,
        long,
        global = true,
        help = "Namespace of the jobs",
        env = "TRAINCTL_NAMESPACE",
        default_value = "default"
    )]
    pub namespace: String,

    #[arg(
        long,
        global = true,
        help = "Log output format",
        value_enum,
        default_value_t = LogFormatArg::Text
    )]
    pub log_format: LogFormatArg,

    #[arg(
        long,
        global = true,
        help = "Templating engine binary",
        env = "HELM_BIN",
        default_value = "helm"
    )]
    pub helm_bin: PathBuf,

    #[arg(
        long,
        global = true,
        help = "Cluster apply tool binary",
        env = "KUBECTL_BIN",
        default_value = "kubectl"
    )]
    pub kubectl_bin: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a new job
    Submit(Box<SubmitArgs>),
    /// List jobs in the namespace
    List(ListArgs),
    /// Show the status of one job
    Status(StatusArgs),
    /// Delete jobs and everything they created
    Delete(DeleteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    #[arg(short, long, help = "Output format", value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    #[arg(help = "Job name")]
    pub name: String,

    #[arg(short, long, help = "Output format", value_enum, default_value_t = OutputFormat::Table)]
    pub output: OutputFormat,
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    #[arg(required = true, help = "Names of the jobs to delete")]
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

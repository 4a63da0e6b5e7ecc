use core::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use api_types::WorkloadKind;
use clap::Args;
use clap::ValueEnum;
use error_stack::Report;
use error_stack::ResultExt;
use serde_yaml::Mapping;
use serde_yaml::Value;

use crate::domain::submission::SubmitRequest;
use crate::infrastructure::tools::ChartSource;

/// Chart repository used when `--chart` is not given.
pub const DEFAULT_CHART_REPO: &str = "trainctl";

#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum ConfigError {
    #[display("Invalid --set entry `{entry}`, expected key=value")]
    InvalidSet { entry: String },
    #[display("Failed to read values file {}", path.display())]
    ValuesFile { path: PathBuf },
}

impl Error for ConfigError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    #[value(name = "plainjob")]
    PlainJob,
    #[value(name = "workergroupjob")]
    WorkerGroupJob,
    #[value(name = "interactivejob")]
    InteractiveJob,
}

impl From<KindArg> for WorkloadKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::PlainJob => WorkloadKind::PlainJob,
            KindArg::WorkerGroupJob => WorkloadKind::WorkerGroupJob,
            KindArg::InteractiveJob => WorkloadKind::InteractiveJob,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SubmitArgs {
    #[arg(value_enum, help = "Workload kind")]
    pub kind: KindArg,

    #[arg(long, help = "Job name")]
    pub name: String,

    #[arg(
        long,
        help = "Append the smallest free numeric suffix if the name is taken"
    )]
    pub allow_suffix: bool,

    #[arg(long, help = "Chart reference, defaults to trainctl/<kind>")]
    pub chart: Option<String>,

    #[arg(long, help = "Chart version")]
    pub chart_version: Option<String>,

    #[arg(
        long = "set",
        value_name = "KEY=VALUE",
        help = "Override a chart value, dotted keys address nested values"
    )]
    pub set: Vec<String>,

    #[arg(
        long,
        help = "YAML file with chart values",
        value_hint = clap::ValueHint::FilePath
    )]
    pub values: Option<PathBuf>,

    #[arg(long, help = "Render the manifest to a file without submitting")]
    pub dry_run: bool,

    #[arg(
        long,
        value_name = "SECONDS",
        help = "Wait up to this long for the job to become ready"
    )]
    pub wait: Option<u64>,
}

impl SubmitArgs {
    pub fn request(&self) -> Result<SubmitRequest, Report<ConfigError>> {
        let kind = WorkloadKind::from(self.kind);
        Ok(SubmitRequest {
            base_name: self.name.clone(),
            allow_suffix: self.allow_suffix,
            kind,
            chart: ChartSource {
                chart: self
                    .chart
                    .clone()
                    .unwrap_or_else(|| format!("{DEFAULT_CHART_REPO}/{}", kind.label())),
                version: self.chart_version.clone(),
            },
            values: self.assemble_values()?,
            dry_run: self.dry_run,
        })
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait.map(Duration::from_secs)
    }

    /// Values file overlaid with the `--set` entries, in order.
    fn assemble_values(&self) -> Result<Mapping, Report<ConfigError>> {
        let mut values = match &self.values {
            Some(path) => {
                let file_error = || ConfigError::ValuesFile { path: path.clone() };
                let text = std::fs::read_to_string(path).change_context_lazy(file_error)?;
                parse_values(&text).change_context_lazy(file_error)?
            }
            None => Mapping::new(),
        };
        for entry in &self.set {
            apply_set(&mut values, entry)?;
        }
        Ok(values)
    }
}

fn parse_values(text: &str) -> Result<Mapping, serde_yaml::Error> {
    match serde_yaml::from_str::<Option<Mapping>>(text)? {
        Some(values) => Ok(values),
        None => Ok(Mapping::new()),
    }
}

/// Apply one `a.b.c=value` entry. The value is read as a YAML scalar, so
/// numbers and booleans keep their type; anything else stays a string.
pub fn apply_set(values: &mut Mapping, entry: &str) -> Result<(), Report<ConfigError>> {
    let invalid = || {
        Report::new(ConfigError::InvalidSet {
            entry: entry.to_string(),
        })
    };
    let (path, raw) = entry.split_once('=').ok_or_else(invalid)?;
    let keys: Vec<&str> = path.split('.').map(str::trim).collect();
    if keys.iter().any(|key| key.is_empty()) {
        return Err(invalid());
    }

    let value = match serde_yaml::from_str::<Value>(raw) {
        Ok(scalar @ (Value::Bool(_) | Value::Number(_) | Value::Null)) if !raw.is_empty() => scalar,
        _ => Value::String(raw.to_string()),
    };

    let (last, parents) = keys.split_last().ok_or_else(invalid)?;
    let mut current = values;
    for key in parents {
        let slot = current
            .entry(Value::String((*key).to_string()))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if !slot.is_mapping() {
            *slot = Value::Mapping(Mapping::new());
        }
        current = match slot {
            Value::Mapping(nested) => nested,
            _ => return Err(invalid()),
        };
    }
    current.insert(Value::String((*last).to_string()), value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use similar_asserts::assert_eq;

    use super::*;

    fn args(set: &[&str], values: Option<PathBuf>) -> SubmitArgs {
        SubmitArgs {
            kind: KindArg::WorkerGroupJob,
            name: "train".to_string(),
            allow_suffix: true,
            chart: None,
            chart_version: None,
            set: set.iter().map(|s| s.to_string()).collect(),
            values,
            dry_run: false,
            wait: Some(30),
        }
    }

    #[test]
    fn dotted_keys_nest() {
        let mut values = Mapping::new();
        apply_set(&mut values, "resources.gpu=2").unwrap();
        apply_set(&mut values, "resources.image=trainer:1.0").unwrap();
        apply_set(&mut values, "debug=true").unwrap();
        apply_set(&mut values, "tag=").unwrap();

        let expected: Mapping = serde_yaml::from_str(
            "resources:\n  gpu: 2\n  image: \"trainer:1.0\"\ndebug: true\ntag: \"\"\n",
        )
        .unwrap();
        assert_eq!(values, expected);
    }

    #[test]
    fn scalar_is_replaced_by_nested_map() {
        let mut values = Mapping::new();
        apply_set(&mut values, "workers=4").unwrap();
        apply_set(&mut values, "workers.count=8").unwrap();
        let expected: Mapping = serde_yaml::from_str("workers:\n  count: 8\n").unwrap();
        assert_eq!(values, expected);
    }

    #[test]
    fn malformed_entries_are_rejected() {
        let mut values = Mapping::new();
        for entry in ["novalue", "=1", "a..b=1"] {
            let err = apply_set(&mut values, entry).unwrap_err();
            assert_eq!(
                err.current_context(),
                &ConfigError::InvalidSet {
                    entry: entry.to_string()
                }
            );
        }
    }

    #[test]
    fn set_overrides_values_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "image: trainer:0.9\nworkers: 2").unwrap();

        let request = args(&["workers=4"], Some(file.path().to_path_buf()))
            .request()
            .unwrap();
        let expected: Mapping =
            serde_yaml::from_str("image: \"trainer:0.9\"\nworkers: 4\n").unwrap();
        assert_eq!(request.values, expected);
        assert_eq!(request.kind, WorkloadKind::WorkerGroupJob);
        assert_eq!(request.chart.chart, "trainctl/workergroupjob");
    }

    #[test]
    fn missing_values_file_is_reported() {
        let err = args(&[], Some(PathBuf::from("/nonexistent/values.yaml")))
            .request()
            .unwrap_err();
        assert!(matches!(
            err.current_context(),
            ConfigError::ValuesFile { .. }
        ));
    }
}

//! Configuration settings for SkyTrack
//!
//! Defines the CLI arguments and the sweep document with its defaults
//! and validation.

use crate::error::{IoResultExt, Result, SkyTrackError};
use crate::sweep::{
    OrderedMap, ParamValue, ResourceRule, SlugPolicy, Template, COMMAND_KEY, DEFAULT_SLUG_PATTERN,
};
use crate::tracking::{DEFAULT_ARTIFACT_NAME, DEFAULT_ARTIFACT_TYPE};
use clap::{ArgAction, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default shared cluster name in reuse mode
pub const DEFAULT_CLUSTER_NAME: &str = "skytrack-tune";

/// Default state file
pub const DEFAULT_STATE_FILE: &str = "skytrack_jobs.json";

/// Default directory for rendered task files
pub const DEFAULT_TASKS_DIR: &str = ".sky_tasks";

/// SkyTrack - Sweep orchestrator for SkyPilot clusters
#[derive(Parser, Debug, Clone)]
#[command(name = "skytrack")]
#[command(author = "SkyTrack Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run hyperparameter and benchmark sweeps on SkyPilot")]
#[command(long_about = r#"
SkyTrack expands a declarative sweep into jobs, launches them through the
SkyPilot CLI, tracks them in a resumable state file and retries failures.

Sweep modes:
  - grid       Cartesian product of parameter lists
  - benchmark  One job per model running a shared script, or one job per
               entry of a 'benchmarks' list
  - commands   One job per literal command

Examples:
  skytrack tune --config sweep.yaml              # Run (or resume) a sweep
  skytrack tune --config sweep.yaml --dry-run    # Show the jobs only
  skytrack status --config sweep.yaml            # Show persisted job states
  skytrack clusters                              # List active clusters
"#)]
pub struct CliArgs {
    /// Verbose output (-v debug, -vv trace)
    #[arg(short = 'v', long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Path to the `sky` executable
    #[arg(long, global = true, env = "SKYTRACK_SKY_BIN", default_value = "sky", value_name = "PATH")]
    pub sky_binary: String,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

impl CliArgs {
    /// Default log filter for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "warn";
        }
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run or resume a sweep
    #[command(name = "tune")]
    Tune {
        /// Sweep configuration (YAML, or JSON by extension)
        #[arg(short, long, value_name = "PATH")]
        config: PathBuf,

        /// Expand and print the jobs without submitting anything
        #[arg(long)]
        dry_run: bool,

        /// Show a progress bar
        #[arg(long)]
        progress: bool,

        /// Override the poll interval
        #[arg(long, value_name = "SECS")]
        poll_interval: Option<u64>,

        /// Exit with status 2 when any job failed permanently
        #[arg(long)]
        fail_on_error: bool,

        /// Append sweep metrics to this JSON lines file
        #[arg(long, value_name = "PATH")]
        metrics_log: Option<PathBuf>,

        /// Sample host CPU/RAM into the metrics log at this interval
        #[arg(long, value_name = "SECS", requires = "metrics_log")]
        monitor_interval: Option<u64>,
    },

    /// Show persisted job states
    #[command(name = "status")]
    Status {
        /// Sweep configuration naming the state file
        #[arg(short, long, value_name = "PATH")]
        config: Option<PathBuf>,

        /// State file (overrides the configuration)
        #[arg(long, value_name = "PATH")]
        state_file: Option<PathBuf>,
    },

    /// List active clusters
    #[command(name = "clusters")]
    Clusters,

    /// Record files and directories as one artifact of a run
    #[command(name = "log-artifacts")]
    LogArtifacts {
        /// Files or directories to bundle
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// JSON-lines metrics file to append to
        #[arg(long)]
        metrics_log: PathBuf,

        /// Artifact name
        #[arg(long, default_value = DEFAULT_ARTIFACT_NAME)]
        name: String,

        /// Artifact type
        #[arg(long = "type", default_value = DEFAULT_ARTIFACT_TYPE)]
        kind: String,

        /// Run name (defaults to $SKYTRACK_RUN_NAME)
        #[arg(long)]
        run_name: Option<String>,
    },
}

/// How the job matrix is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    /// Cartesian product of parameter lists
    Grid,
    /// One job per model
    Benchmark,
    /// One job per literal command
    Commands,
}

impl SweepMode {
    /// Configuration keyword
    pub fn name(&self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Benchmark => "benchmark",
            Self::Commands => "commands",
        }
    }
}

impl FromStr for SweepMode {
    type Err = SkyTrackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" => Ok(Self::Grid),
            "benchmark" => Ok(Self::Benchmark),
            "commands" => Ok(Self::Commands),
            other => Err(SkyTrackError::config(format!(
                "unknown sweep mode '{}' (expected grid, benchmark or commands)",
                other
            ))),
        }
    }
}

impl fmt::Display for SweepMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Benchmark matrix section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkSpec {
    /// Command every model job runs
    pub script: String,
    /// Model identifiers, one job each
    #[serde(default)]
    pub models: Vec<String>,
}

/// Entries of a `benchmarks` list
///
/// A list of strings is a list of literal commands; a list of mappings is a
/// list of explicit parameter sets, where a `__cmd` entry carries a literal
/// command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BenchmarkEntries {
    /// Literal commands
    Commands(Vec<String>),
    /// Explicit parameter sets
    ParamSets(Vec<OrderedMap<ParamValue>>),
}

impl BenchmarkEntries {
    /// Check if some entry has no literal command of its own
    pub fn needs_command(&self) -> bool {
        match self {
            Self::Commands(_) => false,
            Self::ParamSets(sets) => sets.iter().any(|set| !set.contains_key(COMMAND_KEY)),
        }
    }
}

/// A sweep document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Matrix mode keyword, parsed by [`SweepConfig::mode`]
    #[serde(alias = "type", default = "default_mode")]
    pub mode: String,

    /// Informational sweep name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Command template with `{param}` placeholders
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Grid candidates, in declaration order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<OrderedMap<Vec<ParamValue>>>,

    /// Benchmark matrix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkSpec>,

    /// Benchmark entries: literal commands or explicit parameter sets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmarks: Option<BenchmarkEntries>,

    /// Literal commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<Vec<String>>,

    /// Ordered resource rules
    #[serde(default)]
    pub resources_rules: Vec<ResourceRule>,

    /// Retries after the first attempt
    #[serde(default)]
    pub retry_limit: u32,

    /// Outstanding jobs in dedicated mode
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Run every job on one persistent cluster
    #[serde(default)]
    pub reuse_cluster: bool,

    /// Shared cluster name in reuse mode
    #[serde(default = "default_cluster_name")]
    pub cluster_name: String,

    /// Job state file
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Job naming template
    #[serde(default = "default_slug_pattern")]
    pub slug_pattern: String,

    /// Seconds between status polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Base task file merged into every rendered task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_template: Option<PathBuf>,

    /// Where rendered task files are written
    #[serde(default = "default_tasks_dir")]
    pub tasks_dir: PathBuf,
}

fn default_mode() -> String {
    SweepMode::Grid.name().to_string()
}

fn default_max_concurrent() -> usize {
    1
}

fn default_cluster_name() -> String {
    DEFAULT_CLUSTER_NAME.to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_FILE)
}

fn default_slug_pattern() -> String {
    DEFAULT_SLUG_PATTERN.to_string()
}

fn default_poll_interval() -> u64 {
    5
}

fn default_tasks_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TASKS_DIR)
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            name: None,
            command: None,
            params: None,
            benchmark: None,
            benchmarks: None,
            commands: None,
            resources_rules: Vec::new(),
            retry_limit: 0,
            max_concurrent: default_max_concurrent(),
            reuse_cluster: false,
            cluster_name: default_cluster_name(),
            state_file: default_state_file(),
            slug_pattern: default_slug_pattern(),
            poll_interval_secs: default_poll_interval(),
            task_template: None,
            tasks_dir: default_tasks_dir(),
        }
    }
}

impl SweepConfig {
    /// Load and validate a sweep document
    ///
    /// `.json` files are parsed as JSON, everything else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        let config = Self::parse(&text, is_json(path))
            .map_err(|e| SkyTrackError::config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a document without validating it
    pub fn parse(text: &str, json: bool) -> Result<Self> {
        if json {
            Ok(serde_json::from_str(text)?)
        } else {
            Ok(serde_yaml::from_str(text)?)
        }
    }

    /// Parsed matrix mode
    pub fn mode(&self) -> Result<SweepMode> {
        self.mode.parse()
    }

    /// Check everything that can fail before the first submission
    pub fn validate(&self) -> Result<()> {
        let mode = self.mode()?;
        match mode {
            SweepMode::Grid if self.params.is_none() => {
                return Err(SkyTrackError::config("mode 'grid' requires a 'params' section"));
            }
            SweepMode::Benchmark => match (&self.benchmark, &self.benchmarks) {
                (None, None) => {
                    return Err(SkyTrackError::config(
                        "mode 'benchmark' requires a 'benchmark' section or a 'benchmarks' list",
                    ))
                }
                (Some(_), Some(_)) => {
                    return Err(SkyTrackError::config(
                        "use either a 'benchmark' section or a 'benchmarks' list, not both",
                    ))
                }
                (Some(b), None) if b.script.trim().is_empty() => {
                    return Err(SkyTrackError::config("benchmark 'script' must not be empty"))
                }
                _ => {}
            },
            SweepMode::Commands if self.commands.is_none() => {
                return Err(SkyTrackError::config("mode 'commands' requires a 'commands' list"));
            }
            _ => {}
        }

        if self.command.is_none() && self.task_template.is_none() && self.needs_command(mode) {
            return Err(SkyTrackError::config(format!(
                "mode '{}' requires a 'command' template or a 'task_template' with a run section",
                mode
            )));
        }

        self.check_finite()?;

        if self.max_concurrent == 0 {
            return Err(SkyTrackError::config("max_concurrent must be at least 1"));
        }

        if self.reuse_cluster && self.cluster_name.trim().is_empty() {
            return Err(SkyTrackError::config("reuse_cluster requires a cluster_name"));
        }

        if let Some(command) = &self.command {
            Template::parse(command)?;
        }
        SlugPolicy::new(&self.slug_pattern)?;

        Ok(())
    }

    /// Check if some jobs take their command from the task template's `run`
    pub fn relies_on_task_run(&self) -> bool {
        self.command.is_none()
            && self.task_template.is_some()
            && self.mode().map(|m| self.needs_command(m)).unwrap_or(false)
    }

    /// Check if some job of `mode` has neither a literal command nor a script
    fn needs_command(&self, mode: SweepMode) -> bool {
        match mode {
            SweepMode::Grid => true,
            SweepMode::Benchmark => self
                .benchmarks
                .as_ref()
                .map(BenchmarkEntries::needs_command)
                .unwrap_or(false),
            SweepMode::Commands => false,
        }
    }

    /// Reject infinite and NaN parameter values, which JSON cannot store
    fn check_finite(&self) -> Result<()> {
        let grid = self
            .params
            .iter()
            .flat_map(|p| p.iter())
            .flat_map(|(k, values)| values.iter().map(move |v| (k, v)));
        let sets: &[OrderedMap<ParamValue>] = match &self.benchmarks {
            Some(BenchmarkEntries::ParamSets(sets)) => sets.as_slice(),
            _ => &[],
        };
        let sets = sets.iter().flat_map(|set| set.iter());

        for (key, value) in grid.chain(sets) {
            if let ParamValue::Float(v) = value {
                if !v.is_finite() {
                    return Err(SkyTrackError::config(format!(
                        "parameter '{}' has non-finite value {}",
                        key, value
                    )));
                }
            }
        }
        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Display name of the sweep
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("sweep")
    }

    /// SHA-256 of the canonical JSON form
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const GRID_YAML: &str = r#"
mode: grid
command: "python train.py --lr {lr}"
params:
  lr: [0.1, 0.01]
retry_limit: 1
max_concurrent: 2
"#;

    fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config: SweepConfig = serde_yaml::from_str("params: {a: [1]}\n").unwrap();
        assert_eq!(config.mode().unwrap(), SweepMode::Grid);
        assert_eq!(config.retry_limit, 0);
        assert_eq!(config.max_concurrent, 1);
        assert!(!config.reuse_cluster);
        assert_eq!(config.cluster_name, DEFAULT_CLUSTER_NAME);
        assert_eq!(config.state_file, PathBuf::from(DEFAULT_STATE_FILE));
        assert_eq!(config.slug_pattern, DEFAULT_SLUG_PATTERN);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config, SweepConfig { params: config.params.clone(), ..Default::default() });
    }

    #[test]
    fn test_type_alias() {
        let config: SweepConfig = serde_yaml::from_str("type: benchmark\n").unwrap();
        assert_eq!(config.mode().unwrap(), SweepMode::Benchmark);
    }

    #[test]
    fn test_unknown_mode() {
        let config: SweepConfig = serde_yaml::from_str("mode: random\n").unwrap();
        assert!(matches!(config.mode(), Err(SkyTrackError::ConfigError(_))));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_sniffs_format() {
        let yaml = write_temp(".yaml", GRID_YAML);
        let from_yaml = SweepConfig::load(yaml.path()).unwrap();
        assert_eq!(from_yaml.max_concurrent, 2);

        let json = write_temp(
            ".json",
            &serde_json::to_string(&from_yaml).unwrap(),
        );
        let from_json = SweepConfig::load(json.path()).unwrap();
        assert_eq!(from_yaml, from_json);

        // YAML content behind a .json name is rejected
        let wrong = write_temp(".json", GRID_YAML);
        assert!(matches!(
            SweepConfig::load(wrong.path()),
            Err(SkyTrackError::ConfigError(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = SweepConfig::load(Path::new("/nonexistent/sweep.yaml")).unwrap_err();
        assert!(matches!(err, SkyTrackError::Io { .. }));
    }

    #[test]
    fn test_validation_errors() {
        let cases = [
            "mode: grid\ncommand: x\n",
            "mode: grid\nparams: {a: [1]}\n",
            "mode: benchmark\n",
            "mode: commands\n",
            "mode: commands\ncommands: [a]\nmax_concurrent: 0\n",
            "mode: commands\ncommands: [a]\nslug_pattern: \"{oops\"\n",
            "mode: grid\nparams: {a: [1]}\ncommand: \"run {a\"\n",
        ];
        for case in cases {
            let config: SweepConfig = serde_yaml::from_str(case).unwrap();
            assert!(
                matches!(config.validate(), Err(SkyTrackError::ConfigError(_))),
                "expected config error for {:?}",
                case
            );
        }
    }

    #[test]
    fn test_grid_runs_from_task_template() {
        let config: SweepConfig = serde_yaml::from_str(
            "mode: grid\nparams: {lr: [0.1, 0.01]}\ntask_template: sky_task.yaml\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert!(config.relies_on_task_run());

        let config: SweepConfig = serde_yaml::from_str(GRID_YAML).unwrap();
        assert!(!config.relies_on_task_run());
    }

    #[test]
    fn test_non_finite_values_rejected() {
        for case in [
            "mode: grid\ncommand: \"clip {clip}\"\nparams: {clip: [.inf, 1.0]}\n",
            "mode: grid\ncommand: \"clip {clip}\"\nparams: {clip: [.nan]}\n",
            "mode: benchmark\ncommand: \"run {x}\"\nbenchmarks:\n  - {x: -.inf}\n",
        ] {
            let config: SweepConfig = serde_yaml::from_str(case).unwrap();
            let err = config.validate().unwrap_err();
            assert!(matches!(err, SkyTrackError::ConfigError(_)), "{:?}", case);
            assert!(err.to_string().contains("non-finite"));
        }
    }

    #[test]
    fn test_benchmarks_list_validation() {
        let ok = [
            "type: benchmark\nbenchmarks: [\"echo 1\", \"echo 2\"]\n",
            "type: benchmark\nbenchmarks:\n  - {__cmd: \"echo 1\", tag: a}\n",
            "type: benchmark\ncommand: \"bench {m}\"\nbenchmarks:\n  - {m: a}\n",
        ];
        for case in ok {
            let config: SweepConfig = serde_yaml::from_str(case).unwrap();
            assert!(config.validate().is_ok(), "expected valid: {:?}", case);
        }

        let bad = [
            // Parameter set with nothing to run
            "type: benchmark\nbenchmarks:\n  - {m: a}\n",
            // Both benchmark shapes at once
            "type: benchmark\nbenchmark: {script: eval.py, models: [a]}\nbenchmarks: [\"echo 1\"]\n",
        ];
        for case in bad {
            let config: SweepConfig = serde_yaml::from_str(case).unwrap();
            assert!(
                matches!(config.validate(), Err(SkyTrackError::ConfigError(_))),
                "expected config error for {:?}",
                case
            );
        }

        let config: SweepConfig =
            serde_yaml::from_str("type: benchmark\nbenchmarks: [\"echo 1\"]\n").unwrap();
        assert_eq!(
            config.benchmarks,
            Some(BenchmarkEntries::Commands(vec!["echo 1".to_string()]))
        );
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let res: std::result::Result<SweepConfig, _> =
            serde_yaml::from_str("mode: grid\nretries: 3\n");
        assert!(res.is_err());

        let res: std::result::Result<SweepConfig, _> = serde_yaml::from_str(
            "resources_rules:\n  - if: {a: 1}\n    resources: {gpus: 2}\n",
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_fingerprint() {
        let a: SweepConfig = serde_yaml::from_str(GRID_YAML).unwrap();
        let mut b = a.clone();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);

        b.retry_limit = 3;
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }

    #[test]
    fn test_cli_parsing() {
        let args = CliArgs::try_parse_from([
            "skytrack", "-vv", "tune", "--config", "s.yaml", "--dry-run", "--poll-interval", "2",
        ])
        .unwrap();
        assert_eq!(args.log_level(), "trace");
        match args.command {
            Commands::Tune { config, dry_run, poll_interval, .. } => {
                assert_eq!(config, PathBuf::from("s.yaml"));
                assert!(dry_run);
                assert_eq!(poll_interval, Some(2));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = CliArgs::try_parse_from([
            "skytrack", "log-artifacts", "ckpt/", "config.yaml", "--metrics-log", "m.jsonl",
        ])
        .unwrap();
        match args.command {
            Commands::LogArtifacts { paths, name, kind, run_name, .. } => {
                assert_eq!(paths.len(), 2);
                assert_eq!(name, DEFAULT_ARTIFACT_NAME);
                assert_eq!(kind, DEFAULT_ARTIFACT_TYPE);
                assert_eq!(run_name, None);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let args = CliArgs::try_parse_from(["skytrack", "status", "-q"]).unwrap();
        assert_eq!(args.log_level(), "warn");

        assert!(CliArgs::try_parse_from(["skytrack", "tune"]).is_err());
        assert!(CliArgs::try_parse_from([
            "skytrack", "tune", "--config", "s.yaml", "--monitor-interval", "5",
        ])
        .is_err());
    }
}

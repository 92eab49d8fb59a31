use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use log::debug;
use serde::{Deserialize, Deserializer};

use crate::histogram::DuplicatePolicy;
use crate::render::{RangeMode, ReportOptions};
use crate::source::bpf::KeyLayout;

const DEFAULT_INTERVAL_SECONDS: u64 = 5;
const DEFAULT_OBJECT_PATH: &str = "runqlat.o";
const ENV_PREFIX: &str = "RUNQLAT";

/// Report contents
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputSettings {
    pub pid: Option<u32>,
    pub range_mode: Option<RangeMode>,
    pub histogram: Option<bool>,
    #[serde(default, deserialize_with = "one_or_many_percentiles")]
    pub percentiles: Option<Vec<f64>>,
    pub p99: Option<bool>,
    pub timestamp: Option<bool>,
}

// The environment source hands over a lone `99` as a number and `50,99` as a list of
// strings, while YAML yields native floats.
#[derive(Deserialize)]
#[serde(untagged)]
enum PercentileValue {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Percentiles {
    One(PercentileValue),
    Many(Vec<PercentileValue>),
}

impl PercentileValue {
    fn parse<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            PercentileValue::Number(p) => Ok(p),
            PercentileValue::Text(text) => text
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid percentile `{}`", text))),
        }
    }
}

fn one_or_many_percentiles<'de, D>(deserializer: D) -> Result<Option<Vec<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Percentiles>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Percentiles::One(value)) => Ok(Some(vec![value.parse()?])),
        Some(Percentiles::Many(values)) => values
            .into_iter()
            .map(PercentileValue::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    pub object_path: Option<PathBuf>,
    pub map_name: Option<String>,
    #[serde(default)]
    pub key_layout: KeyLayout,
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
    pub interval_secs: Option<u64>,
    pub iterations: Option<u64>,
    #[serde(default)]
    pub output: OutputSettings,
}

impl Settings {
    /// Loads `.env`, then the optional YAML file, then `RUNQLAT_*` variables.
    pub fn new(config_file: Option<&PathBuf>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path.as_path()).required(true));
        }
        Self::from_builder(builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("output.percentiles")
                .try_parsing(true),
        ))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let settings: Self = builder.build()?.try_deserialize()?;
        debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }

    pub fn object_path(&self) -> PathBuf {
        self.object_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OBJECT_PATH))
    }

    pub fn map_name(&self) -> &str {
        self.map_name.as_deref().unwrap_or(runqlat_common::DIST_MAP)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(
            self.interval_secs
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_INTERVAL_SECONDS),
        )
    }

    pub fn timestamp(&self) -> bool {
        self.output.timestamp.unwrap_or(false)
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            pid: self.output.pid,
            range_mode: self.output.range_mode.unwrap_or_default(),
            histogram: self.output.histogram.unwrap_or(true),
            percentiles: self.output.percentiles.clone().unwrap_or_default(),
            p99: self.output.p99.unwrap_or(false),
        }
    }
}

/// Summarize run queue latency per process as log2 histograms and percentiles.
#[derive(Debug, Parser)]
#[command(name = "runqlat")]
pub struct Cli {
    /// Verbose output
    #[clap(short, long)]
    pub verbose: bool,

    /// YAML configuration file
    #[clap(short, long)]
    pub config: Option<PathBuf>,

    /// Compiled BPF object exposing the sched programs and the histogram map
    #[clap(long, env = "RUNQLAT_OBJECT")]
    pub object: Option<PathBuf>,

    /// Histogram map name
    #[clap(long)]
    pub map: Option<String>,

    /// Key/value layout of the histogram map
    #[clap(long, value_enum)]
    pub key_layout: Option<KeyLayout>,

    /// Seconds between reports
    #[clap(short, long)]
    pub interval: Option<u64>,

    /// Stop after this many reports
    #[clap(short = 'n', long)]
    pub iterations: Option<u64>,

    /// Only report this pid
    #[clap(short, long)]
    pub pid: Option<u32>,

    /// Print raw slot numbers instead of log2 latency ranges
    #[clap(long)]
    pub raw: bool,

    /// Skip the histogram section
    #[clap(long)]
    pub no_histogram: bool,

    /// Percentiles to tabulate, e.g. `-P 50,95,99`
    #[clap(short = 'P', long, value_delimiter = ',')]
    pub percentiles: Option<Vec<f64>>,

    /// Print an interpolated P99 table
    #[clap(long)]
    pub p99: bool,

    /// Print a timestamp before every report
    #[clap(short = 'T', long)]
    pub timestamp: bool,

    /// Handling of repeated (pid, slot) keys within one pass
    #[clap(long, value_enum)]
    pub duplicates: Option<DuplicatePolicy>,
}

impl Cli {
    /// Command-line flags take precedence over file and environment settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(object) = &self.object {
            settings.object_path = Some(object.clone());
        }
        if let Some(map) = &self.map {
            settings.map_name = Some(map.clone());
        }
        if let Some(layout) = self.key_layout {
            settings.key_layout = layout;
        }
        if let Some(interval) = self.interval {
            settings.interval_secs = Some(interval);
        }
        if let Some(iterations) = self.iterations {
            settings.iterations = Some(iterations);
        }
        if let Some(pid) = self.pid {
            settings.output.pid = Some(pid);
        }
        if self.raw {
            settings.output.range_mode = Some(RangeMode::Raw);
        }
        if self.no_histogram {
            settings.output.histogram = Some(false);
        }
        if let Some(percentiles) = &self.percentiles {
            settings.output.percentiles = Some(percentiles.clone());
        }
        if self.p99 {
            settings.output.p99 = Some(true);
        }
        if self.timestamp {
            settings.output.timestamp = Some(true);
        }
        if let Some(policy) = self.duplicates {
            settings.duplicate_policy = policy;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_load_settings_from_env() {
        unsafe {
            std::env::set_var("RUNQLAT_INTERVAL_SECS", "42");
            std::env::set_var("RUNQLAT_OUTPUT__P99", "true");
            std::env::set_var("RUNQLAT_OUTPUT__PERCENTILES", "50,99.9");
            std::env::set_var("RUNQLAT_KEY_LAYOUT", "compact");
        }

        let settings = Settings::new(None).expect("Failed to load settings");

        assert_eq!(settings.interval_secs, Some(42));
        assert_eq!(settings.output.p99, Some(true));
        assert_eq!(settings.output.percentiles, Some(vec![50.0, 99.9]));
        assert_eq!(settings.key_layout, KeyLayout::Compact);

        unsafe {
            std::env::remove_var("RUNQLAT_INTERVAL_SECS");
            std::env::remove_var("RUNQLAT_OUTPUT__P99");
            std::env::remove_var("RUNQLAT_OUTPUT__PERCENTILES");
            std::env::remove_var("RUNQLAT_KEY_LAYOUT");
        }
    }

    #[test]
    #[serial]
    fn test_single_percentile_from_env() {
        for (raw, expected) in [("99", 99.0), ("99.9", 99.9)] {
            unsafe {
                std::env::set_var("RUNQLAT_OUTPUT__PERCENTILES", raw);
            }
            let settings = Settings::new(None).expect("Failed to load settings");
            assert_eq!(settings.output.percentiles, Some(vec![expected]));
        }
        unsafe {
            std::env::remove_var("RUNQLAT_OUTPUT__PERCENTILES");
        }
    }

    #[test]
    fn test_invalid_percentile_is_rejected() {
        let builder = Config::builder().add_source(File::from_str(
            "output:\n  percentiles: [50, fast]\n",
            FileFormat::Yaml,
        ));
        assert!(Settings::from_builder(builder).is_err());
    }

    #[test]
    fn test_load_settings_from_yaml() {
        let yaml = r#"
object_path: /opt/bpf/runqlat.o
map_name: latency
duplicate_policy: keep
iterations: 3
output:
  pid: 6875
  range_mode: raw
  percentiles: [50.0, 95.0, 99.0]
"#;
        let builder = Config::builder().add_source(File::from_str(yaml, FileFormat::Yaml));
        let settings = Settings::from_builder(builder).unwrap();

        assert_eq!(settings.object_path(), PathBuf::from("/opt/bpf/runqlat.o"));
        assert_eq!(settings.map_name(), "latency");
        assert_eq!(settings.duplicate_policy, DuplicatePolicy::Keep);
        assert_eq!(settings.iterations, Some(3));

        let options = settings.report_options();
        assert_eq!(options.pid, Some(6875));
        assert_eq!(options.range_mode, RangeMode::Raw);
        assert_eq!(options.percentiles, vec![50.0, 95.0, 99.0]);
        assert!(options.histogram);
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.object_path(), PathBuf::from(DEFAULT_OBJECT_PATH));
        assert_eq!(settings.map_name(), "dist");
        assert_eq!(settings.interval(), Duration::from_secs(5));
        assert_eq!(settings.key_layout, KeyLayout::Wide);
        assert_eq!(settings.duplicate_policy, DuplicatePolicy::Sum);
        assert!(!settings.timestamp());

        let options = settings.report_options();
        assert_eq!(options, ReportOptions::default());
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let settings = Settings {
            interval_secs: Some(0),
            ..Default::default()
        };
        assert_eq!(settings.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_cli_overrides_settings() {
        let cli = Cli::parse_from([
            "runqlat", "-i", "1", "-n", "2", "-p", "77", "--raw", "-P", "50,90", "--p99",
            "--duplicates", "keep",
        ]);
        let mut settings = Settings {
            interval_secs: Some(10),
            output: OutputSettings {
                percentiles: Some(vec![99.0]),
                ..Default::default()
            },
            ..Default::default()
        };
        cli.apply(&mut settings);

        assert_eq!(settings.interval(), Duration::from_secs(1));
        assert_eq!(settings.iterations, Some(2));
        assert_eq!(settings.duplicate_policy, DuplicatePolicy::Keep);
        let options = settings.report_options();
        assert_eq!(options.pid, Some(77));
        assert_eq!(options.range_mode, RangeMode::Raw);
        assert_eq!(options.percentiles, vec![50.0, 90.0]);
        assert!(options.p99);
    }
}

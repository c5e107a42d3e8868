use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::ConfigError;

const DEFAULT_ANALYSIS_MIN: f32 = -100.0;
const DEFAULT_ANALYSIS_MAX: f32 = 300.0;
const DEFAULT_BASELINE_MIN: f32 = -50.0;
const DEFAULT_BASELINE_MAX: f32 = -10.0;
const DEFAULT_SIGNAL_MIN: f32 = 0.0;
const DEFAULT_SIGNAL_MAX: f32 = 200.0;
const DEFAULT_CHARGE_MIN: f32 = 0.0;
const DEFAULT_CHARGE_MAX: f32 = 200.0;
const DEFAULT_POLARITY: i32 = 1;
const DEFAULT_CUT_AMP_MAX: f32 = 1.0;

/// How to treat an event whose channels carry different sample counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NsamplesPolicy {
    #[default]
    Strict,
    Pad,
}

impl From<String> for NsamplesPolicy {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "pad" => Self::Pad,
            "strict" => Self::Strict,
            _ => {
                spdlog::warn!("Unknown nsamples_policy '{value}', defaulting to 'strict'");
                Self::Strict
            }
        }
    }
}

impl From<NsamplesPolicy> for String {
    fn from(value: NsamplesPolicy) -> Self {
        match value {
            NsamplesPolicy::Strict => String::from("strict"),
            NsamplesPolicy::Pad => String::from("pad"),
        }
    }
}

/// How to treat an event whose channel headers disagree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventPolicy {
    #[default]
    Error,
    Warn,
    Skip,
}

impl From<String> for EventPolicy {
    fn from(value: String) -> Self {
        match value.to_lowercase().as_str() {
            "warn" => Self::Warn,
            "skip" => Self::Skip,
            "error" => Self::Error,
            _ => {
                spdlog::warn!("Unknown event_policy '{value}', defaulting to 'error'");
                Self::Error
            }
        }
    }
}

impl From<EventPolicy> for String {
    fn from(value: EventPolicy) -> Self {
        match value {
            EventPolicy::Error => String::from("error"),
            EventPolicy::Warn => String::from("warn"),
            EventPolicy::Skip => String::from("skip"),
        }
    }
}

/// An inclusive-by-time window in the units of the time axis (ns)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindow {
    pub min: f32,
    pub max: f32,
}

impl TimeWindow {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, time: f32) -> bool {
        time >= self.min && time <= self.max
    }
}

/// The resolved per-channel analysis settings handed to the feature extractor.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRegionConfig {
    pub analysis: TimeWindow,
    pub baseline: TimeWindow,
    pub signal: TimeWindow,
    pub charge: TimeWindow,
    pub polarity: i32,
    pub cut_amp_max: f32,
}

impl Default for AnalysisRegionConfig {
    fn default() -> Self {
        Self {
            analysis: TimeWindow::new(DEFAULT_ANALYSIS_MIN, DEFAULT_ANALYSIS_MAX),
            baseline: TimeWindow::new(DEFAULT_BASELINE_MIN, DEFAULT_BASELINE_MAX),
            signal: TimeWindow::new(DEFAULT_SIGNAL_MIN, DEFAULT_SIGNAL_MAX),
            charge: TimeWindow::new(DEFAULT_CHARGE_MIN, DEFAULT_CHARGE_MAX),
            polarity: DEFAULT_POLARITY,
            cut_amp_max: DEFAULT_CUT_AMP_MAX,
        }
    }
}

/// Thresholds and constants shared by every channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub snr_threshold: f32,
    /// Percent of the peak amplitude
    pub cfd_thresholds: Vec<i32>,
    /// Absolute level in mV
    pub le_thresholds: Vec<f32>,
    /// Percent of the integrated charge
    pub charge_thresholds: Vec<i32>,
    pub rise_time_low: f32,
    pub rise_time_high: f32,
    /// Ohms
    pub impedance: f32,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            snr_threshold: 3.0,
            cfd_thresholds: vec![10, 20, 30, 50],
            le_thresholds: vec![10.0, 20.0, 50.0],
            charge_thresholds: vec![10, 20, 50],
            rise_time_low: 0.1,
            rise_time_high: 0.9,
            impedance: 50.0,
        }
    }
}

/// Settings of the raw-file conversion stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub input_dir: PathBuf,
    pub input_pattern: String,
    pub input_is_ascii: bool,
    pub special_channel_file: String,
    pub enable_special_override: bool,
    pub special_channel_index: i32,
    pub tsample_ns: f32,
    pub pedestal_window: usize,
    pub ped_target: f32,
    pub event_policy: EventPolicy,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            input_pattern: String::from("wave_%d.dat"),
            input_is_ascii: false,
            special_channel_file: String::from("TR_0_0.dat"),
            enable_special_override: true,
            special_channel_index: 3,
            tsample_ns: 0.2,
            pedestal_window: 100,
            ped_target: 3500.0,
            event_policy: EventPolicy::Error,
        }
    }
}

/// Settings of the feature extraction stage. Region arrays are indexed by channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub analysis_region_min: Vec<f32>,
    pub analysis_region_max: Vec<f32>,
    pub baseline_region_min: Vec<f32>,
    pub baseline_region_max: Vec<f32>,
    pub signal_region_min: Vec<f32>,
    pub signal_region_max: Vec<f32>,
    pub charge_region_min: Vec<f32>,
    pub charge_region_max: Vec<f32>,
    pub signal_polarity: Vec<i32>,
    pub cut_amp_max: Vec<f32>,
    #[serde(flatten)]
    pub thresholds: ThresholdConfig,
    pub events_per_worker: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            analysis_region_min: vec![],
            analysis_region_max: vec![],
            baseline_region_min: vec![],
            baseline_region_max: vec![],
            signal_region_min: vec![],
            signal_region_max: vec![],
            charge_region_min: vec![],
            charge_region_max: vec![],
            signal_polarity: vec![],
            cut_amp_max: vec![],
            thresholds: ThresholdConfig::default(),
            events_per_worker: 1000,
        }
    }
}

/// Settings given for a single run on the command line. Each one that is set replaces the
/// value read from the YAML file.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub event_policy: Option<EventPolicy>,
    pub nsamples_policy: Option<NsamplesPolicy>,
    pub input_is_ascii: Option<bool>,
    pub chunk_size: Option<usize>,
    pub max_cores: Option<usize>,
    pub n_channels: Option<usize>,
    pub input_pattern: Option<String>,
    /// Waveform file, relative to output_dir unless absolute
    pub waveforms_file: Option<PathBuf>,
    /// Feature file, relative to output_dir unless absolute
    pub features_file: Option<PathBuf>,
}

/// Structure representing the application configuration. Contains pathing, ingestion and
/// analysis settings. Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    pub n_channels: usize,
    pub max_cores: usize,
    pub max_events: i64,
    pub chunk_size: usize,
    pub nsamples_policy: NsamplesPolicy,
    pub waveforms_file: PathBuf,
    pub features_file: PathBuf,
    pub converter: ConverterConfig,
    pub analyzer: AnalyzerConfig,
}

impl Default for Config {
    fn default() -> Self {
        let n_channels = 16;
        let mut config = Self {
            output_dir: PathBuf::from("output"),
            n_channels,
            max_cores: 8,
            max_events: -1,
            chunk_size: 100,
            nsamples_policy: NsamplesPolicy::Strict,
            waveforms_file: PathBuf::from("waveforms.h5"),
            features_file: PathBuf::from("waveforms_analyzed.h5"),
            converter: ConverterConfig::default(),
            analyzer: AnalyzerConfig::default(),
        };
        config.fill_channel_defaults();
        config
    }
}

/// Extend a per-channel array with a default value up to n entries
fn pad_to<T: Clone>(values: &mut Vec<T>, n: usize, fill: T) {
    if values.len() < n {
        values.resize(n, fill);
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let mut config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.fill_channel_defaults();
        config.validate()?;
        Ok(config)
    }

    /// Replace the file values with the ones given for this run, then re-check the result
    pub fn apply_overrides(&mut self, overrides: RunOverrides) -> Result<(), ConfigError> {
        if let Some(policy) = overrides.event_policy {
            self.converter.event_policy = policy;
        }
        if let Some(policy) = overrides.nsamples_policy {
            self.nsamples_policy = policy;
        }
        if let Some(ascii) = overrides.input_is_ascii {
            self.converter.input_is_ascii = ascii;
        }
        if let Some(size) = overrides.chunk_size {
            self.chunk_size = size;
        }
        if let Some(cores) = overrides.max_cores {
            self.max_cores = cores;
        }
        if let Some(n) = overrides.n_channels {
            self.n_channels = n;
        }
        if let Some(pattern) = overrides.input_pattern {
            self.converter.input_pattern = pattern;
        }
        if let Some(path) = overrides.waveforms_file {
            self.waveforms_file = path;
        }
        if let Some(path) = overrides.features_file {
            self.features_file = path;
        }
        self.fill_channel_defaults();
        self.validate()
    }

    /// Per-channel arrays shorter than n_channels receive the default for the missing channels
    pub fn fill_channel_defaults(&mut self) {
        let n = self.n_channels;
        let a = &mut self.analyzer;
        pad_to(&mut a.analysis_region_min, n, DEFAULT_ANALYSIS_MIN);
        pad_to(&mut a.analysis_region_max, n, DEFAULT_ANALYSIS_MAX);
        pad_to(&mut a.baseline_region_min, n, DEFAULT_BASELINE_MIN);
        pad_to(&mut a.baseline_region_max, n, DEFAULT_BASELINE_MAX);
        pad_to(&mut a.signal_region_min, n, DEFAULT_SIGNAL_MIN);
        pad_to(&mut a.signal_region_max, n, DEFAULT_SIGNAL_MAX);
        pad_to(&mut a.charge_region_min, n, DEFAULT_CHARGE_MIN);
        pad_to(&mut a.charge_region_max, n, DEFAULT_CHARGE_MAX);
        pad_to(&mut a.signal_polarity, n, DEFAULT_POLARITY);
        pad_to(&mut a.cut_amp_max, n, DEFAULT_CUT_AMP_MAX);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_channels == 0 {
            return Err(ConfigError::InvalidValue(
                "n_channels",
                String::from("must be at least 1"),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue(
                "chunk_size",
                String::from("must be at least 1"),
            ));
        }
        if !(self.converter.tsample_ns > 0.0) {
            return Err(ConfigError::InvalidValue(
                "tsample_ns",
                self.converter.tsample_ns.to_string(),
            ));
        }
        if let Some(p) = self
            .analyzer
            .signal_polarity
            .iter()
            .find(|p| **p != 1 && **p != -1)
        {
            return Err(ConfigError::InvalidValue("signal_polarity", p.to_string()));
        }
        Ok(())
    }

    /// Resolve the analysis windows of a single channel
    pub fn region_config(&self, channel: usize) -> AnalysisRegionConfig {
        let a = &self.analyzer;
        let defaults = AnalysisRegionConfig::default();
        let get = |values: &Vec<f32>, fallback: f32| values.get(channel).copied().unwrap_or(fallback);
        AnalysisRegionConfig {
            analysis: TimeWindow::new(
                get(&a.analysis_region_min, defaults.analysis.min),
                get(&a.analysis_region_max, defaults.analysis.max),
            ),
            baseline: TimeWindow::new(
                get(&a.baseline_region_min, defaults.baseline.min),
                get(&a.baseline_region_max, defaults.baseline.max),
            ),
            signal: TimeWindow::new(
                get(&a.signal_region_min, defaults.signal.min),
                get(&a.signal_region_max, defaults.signal.max),
            ),
            charge: TimeWindow::new(
                get(&a.charge_region_min, defaults.charge.min),
                get(&a.charge_region_max, defaults.charge.max),
            ),
            polarity: a
                .signal_polarity
                .get(channel)
                .copied()
                .unwrap_or(defaults.polarity),
            cut_amp_max: get(&a.cut_amp_max, defaults.cut_amp_max),
        }
    }

    /// Resolved analysis windows for every channel
    pub fn region_configs(&self) -> Vec<AnalysisRegionConfig> {
        (0..self.n_channels).map(|ch| self.region_config(ch)).collect()
    }

    /// The channel exempt from the channelId check, if the override is active and in range
    pub fn special_override_channel(&self) -> Option<usize> {
        let c = &self.converter;
        if c.enable_special_override
            && !c.special_channel_file.is_empty()
            && c.special_channel_index >= 0
            && (c.special_channel_index as usize) < self.n_channels
        {
            Some(c.special_channel_index as usize)
        } else {
            None
        }
    }

    /// Get the path to the raw data file of a channel
    pub fn get_channel_file_path(&self, channel: usize) -> PathBuf {
        let file_name = match self.special_override_channel() {
            Some(special) if special == channel => self.converter.special_channel_file.clone(),
            _ => self
                .converter
                .input_pattern
                .replace("%d", &channel.to_string()),
        };
        // join keeps absolute file names as they are
        self.converter.input_dir.join(file_name)
    }

    /// Get the path to the converted waveform file. An absolute waveforms_file is used as is.
    pub fn get_waveforms_path(&self) -> PathBuf {
        self.output_dir.join(&self.waveforms_file)
    }

    /// Get the path to the feature file
    pub fn get_features_path(&self) -> PathBuf {
        self.output_dir.join(&self.features_file)
    }

    /// None means no event limit
    pub fn event_limit(&self) -> Option<usize> {
        if self.max_events < 0 {
            None
        } else {
            Some(self.max_events as usize)
        }
    }

    /// Ingestion runs chunked over threads when more than one core is allowed
    pub fn is_parallel(&self) -> bool {
        self.max_cores > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "n_channels: 4\nnsamples_policy: PAD\nconverter:\n  event_policy: skip\nanalyzer:\n  signal_polarity: [1, -1]\n  snr_threshold: 5.0\n";
        let mut config: Config = serde_yaml::from_str(yaml).unwrap();
        config.fill_channel_defaults();
        assert_eq!(config.nsamples_policy, NsamplesPolicy::Pad);
        assert_eq!(config.converter.event_policy, EventPolicy::Skip);
        assert_eq!(config.analyzer.signal_polarity, vec![1, -1, 1, 1]);
        assert_eq!(config.analyzer.thresholds.snr_threshold, 5.0);
        assert_eq!(config.analyzer.thresholds.cfd_thresholds, vec![10, 20, 30, 50]);
        assert_eq!(config.region_config(1).polarity, -1);
        assert_eq!(config.region_config(3).baseline, TimeWindow::new(-50.0, -10.0));
    }

    #[test]
    fn test_unknown_policy_falls_back() {
        assert_eq!(EventPolicy::from(String::from("maybe")), EventPolicy::Error);
        assert_eq!(NsamplesPolicy::from(String::from("trim")), NsamplesPolicy::Strict);
    }

    #[test]
    fn test_template_round_trips() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.n_channels, config.n_channels);
        assert_eq!(back.converter.input_pattern, config.converter.input_pattern);
        assert_eq!(back.analyzer.cut_amp_max.len(), config.n_channels);
    }

    #[test]
    fn test_channel_file_paths() {
        let mut config = Config::default();
        config.n_channels = 4;
        config.converter.input_dir = PathBuf::from("/data/run1");
        assert_eq!(
            config.get_channel_file_path(0),
            PathBuf::from("/data/run1/wave_0.dat")
        );
        assert_eq!(
            config.get_channel_file_path(3),
            PathBuf::from("/data/run1/TR_0_0.dat")
        );
        config.converter.enable_special_override = false;
        assert_eq!(
            config.get_channel_file_path(3),
            PathBuf::from("/data/run1/wave_3.dat")
        );
        config.converter.special_channel_index = 7;
        config.converter.enable_special_override = true;
        assert_eq!(config.special_override_channel(), None);
    }

    #[test]
    fn test_run_overrides_replace_file_values() {
        let mut config = Config::default();
        config
            .apply_overrides(RunOverrides {
                event_policy: Some(EventPolicy::Skip),
                nsamples_policy: Some(NsamplesPolicy::Pad),
                input_is_ascii: Some(true),
                chunk_size: Some(7),
                max_cores: Some(1),
                n_channels: Some(20),
                input_pattern: Some(String::from("ch%d.txt")),
                waveforms_file: Some(PathBuf::from("/data/run1/waves.h5")),
                features_file: Some(PathBuf::from("feats.h5")),
            })
            .unwrap();
        assert_eq!(config.converter.event_policy, EventPolicy::Skip);
        assert_eq!(config.nsamples_policy, NsamplesPolicy::Pad);
        assert!(config.converter.input_is_ascii);
        assert_eq!(config.chunk_size, 7);
        assert!(!config.is_parallel());
        assert_eq!(config.analyzer.signal_polarity.len(), 20);
        assert_eq!(config.get_channel_file_path(1), PathBuf::from("./ch1.txt"));
        assert_eq!(config.get_waveforms_path(), PathBuf::from("/data/run1/waves.h5"));
        assert_eq!(config.get_features_path(), PathBuf::from("output/feats.h5"));
    }

    #[test]
    fn test_unset_overrides_keep_file_values() {
        let mut config = Config::default();
        config.chunk_size = 42;
        config.apply_overrides(RunOverrides::default()).unwrap();
        assert_eq!(config.chunk_size, 42);
        assert_eq!(config.converter.event_policy, EventPolicy::Error);

        let bad = RunOverrides {
            chunk_size: Some(0),
            ..Default::default()
        };
        assert!(config.apply_overrides(bad).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_polarity() {
        let mut config = Config::default();
        config.analyzer.signal_polarity[2] = 0;
        assert!(config.validate().is_err());
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Could not parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Missing required configuration key {key:?}")]
    MissingKey { key: String },
    #[error("Calibration file does not exist: {path:?}")]
    MissingFile { path: PathBuf },
    #[error("Invalid calibration table {path:?}: {reason}")]
    InvalidTable { path: PathBuf, reason: String },
    #[error("Unknown cut operator: {operator:?}")]
    UnknownOperator { operator: String },
    #[error("Unknown particle: {name:?}")]
    UnknownObject { name: String },
    #[error("Unknown systematic: {name:?}")]
    UnknownSystematic { name: String },
}

pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    //! Read and deserialize a JSON document.
    //!
    //! # Errors
    //! Returns [`ConfigError::Io`] if the file cannot be read and [`ConfigError::Parse`] if it
    //! does not match the expected structure.
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Values keyed by era name.
pub type PerEra<T> = IndexMap<String, T>;

pub fn era_value<T: Clone>(map: &PerEra<T>, key: &str, era: &str) -> Result<T, ConfigError> {
    map.get(era).cloned().ok_or_else(|| ConfigError::MissingKey {
        key: format!("{key}.{era}"),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicCut {
    pub pt: PerEra<f64>,
    pub eta: PerEra<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkingPoints {
    pub loose: f64,
    pub medium: f64,
    pub tight: f64,
}

impl WorkingPoints {
    pub fn passed(&self, score: f64) -> u8 {
        //! Number of working points (loose, medium, tight) a discriminant exceeds.
        [self.loose, self.medium, self.tight]
            .iter()
            .filter(|threshold| score > **threshold)
            .count() as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetConfig {
    pub pt: PerEra<f64>,
    pub eta: PerEra<f64>,
    /// Tagger name -> era -> working points.
    #[serde(default)]
    pub btag: IndexMap<String, PerEra<WorkingPoints>>,
    /// Names of the jet energy correction uncertainty sources to evaluate.
    #[serde(default)]
    pub jec_syst: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FatJetConfig {
    #[serde(default = "FatJetConfig::default_pt")]
    pub pt: f64,
    #[serde(default = "FatJetConfig::default_mass")]
    pub mass: f64,
}

impl FatJetConfig {
    fn default_pt() -> f64 {
        170.0
    }
    fn default_mass() -> f64 {
        40.0
    }
}

impl Default for FatJetConfig {
    fn default() -> Self {
        Self {
            pt: Self::default_pt(),
            mass: Self::default_mass(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LumiConfig {
    pub nominal: PerEra<f64>,
    pub up: PerEra<f64>,
    pub down: PerEra<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightConfig {
    /// Integrated luminosity in fb^-1.
    pub lumi: LumiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    pub electron: KinematicCut,
    pub muon: KinematicCut,
    pub jet: JetConfig,
    #[serde(default)]
    pub fat_jet: FatJetConfig,
    #[serde(default)]
    pub met_filter: PerEra<Vec<String>>,
    #[serde(default)]
    pub weight: Option<WeightConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionConfig {
    pub operator: String,
    pub threshold: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Object kind -> count requirement, in cut order.
    #[serde(default)]
    pub selection: IndexMap<String, SelectionConfig>,
    #[serde(default)]
    pub trigger: PerEra<Vec<String>>,
}

/// The skim configuration: object thresholds, channel definitions and systematics.
///
/// Keys not named here are ignored. Ordered maps keep the JSON order so that a channel's
/// selection order is its cut order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkimConfig {
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub channel: IndexMap<String, ChannelConfig>,
    /// Systematic name -> channels it applies to. The empty name is the nominal copy.
    #[serde(default)]
    pub systematics: IndexMap<String, Vec<String>>,
}

impl SkimConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn channel(&self, name: &str) -> Result<&ChannelConfig, ConfigError> {
        self.channel.get(name).ok_or_else(|| ConfigError::MissingKey {
            key: format!("channel.{name}"),
        })
    }
}

/// Calibration file paths for one era. Paths may contain `{cone}` (replaced by `AK4` or
/// `AK8`) and `{run}` (replaced by the data-taking period).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EraCalibrationFiles {
    pub jec_mc: Vec<String>,
    #[serde(default)]
    pub jec_data: Vec<String>,
    /// One table per uncertainty source; `{source}` is replaced by the source name.
    pub jec_uncertainty: String,
    pub resolution: String,
    pub resolution_sf: String,
    /// Working-point name -> table.
    #[serde(default)]
    pub electron: IndexMap<String, String>,
    #[serde(default)]
    pub muon: IndexMap<String, String>,
    /// `<tagger>_<wp>_<flavour>` -> table.
    #[serde(default)]
    pub btag: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationConfig {
    pub eras: IndexMap<String, EraCalibrationFiles>,
}

impl CalibrationConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        load_json(path)
    }

    pub fn era(&self, era: &str) -> Result<&EraCalibrationFiles, ConfigError> {
        self.eras.get(era).ok_or_else(|| ConfigError::MissingKey {
            key: era.to_string(),
        })
    }
}

/// Settings for a single skim job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    pub era: String,
    /// `"MC"` for simulation, otherwise the data-taking period.
    pub run: String,
    #[serde(default)]
    pub xsec: f64,
    #[serde(default)]
    pub xsec_unc: f64,
    pub channels: Vec<String>,
    #[serde(default)]
    pub seed: u64,
    /// Fill cutflows with the sign of the generator weight instead of unit weights. Bins then
    /// hold signed sums and are no longer guaranteed to decrease along the cut chain.
    #[serde(default)]
    pub weighted_cutflow: bool,
}

impl JobSettings {
    pub fn new(era: &str, run: &str, channels: &[&str]) -> Self {
        Self {
            era: era.to_string(),
            run: run.to_string(),
            xsec: 1.0,
            xsec_unc: 0.0,
            channels: channels.iter().map(|c| c.to_string()).collect(),
            seed: 0,
            weighted_cutflow: false,
        }
    }

    pub fn is_data(&self) -> bool {
        self.run != "MC"
    }
}

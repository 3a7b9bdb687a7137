use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{load_json, ConfigError, EraCalibrationFiles};
use crate::variation::Shift;

/// An efficiency scale factor with its asymmetric uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Efficiency {
    pub value: f64,
    pub err_up: f64,
    pub err_down: f64,
}

impl Efficiency {
    pub fn up(&self) -> f64 {
        self.value + self.err_up
    }

    pub fn down(&self) -> f64 {
        self.value - self.err_down
    }
}

impl Default for Efficiency {
    fn default() -> Self {
        Self {
            value: 1.0,
            err_up: 0.0,
            err_down: 0.0,
        }
    }
}

/// Jet energy correction, the combined multiplier of every correction level.
pub trait JetCorrector: Send + Sync {
    fn correction(&self, pt: f64, eta: f64, phi: f64, area: f64, rho: f64) -> f64;
}

/// Relative uncertainty of one jet energy correction source, evaluated at corrected $`p_T`$.
pub trait JetUncertainty: Send + Sync {
    fn uncertainty(&self, pt: f64, eta: f64) -> f64;
}

/// Relative $`p_T`$ resolution of jets in simulation.
pub trait JetResolution: Send + Sync {
    fn resolution(&self, pt: f64, eta: f64, rho: f64) -> f64;
}

/// Data/simulation ratio of jet resolutions.
pub trait ResolutionScaleFactor: Send + Sync {
    fn scale_factor(&self, pt: f64, eta: f64, rho: f64, shift: Shift) -> f64;
}

pub trait EfficiencyProvider: Send + Sync {
    fn lookup(&self, pt: f64, eta: f64) -> Efficiency;
}

/// A provider returning the same value everywhere.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Constant(pub f64);

impl JetCorrector for Constant {
    fn correction(&self, _pt: f64, _eta: f64, _phi: f64, _area: f64, _rho: f64) -> f64 {
        self.0
    }
}

impl JetUncertainty for Constant {
    fn uncertainty(&self, _pt: f64, _eta: f64) -> f64 {
        self.0
    }
}

impl JetResolution for Constant {
    fn resolution(&self, _pt: f64, _eta: f64, _rho: f64) -> f64 {
        self.0
    }
}

impl ResolutionScaleFactor for Constant {
    fn scale_factor(&self, _pt: f64, _eta: f64, _rho: f64, _shift: Shift) -> f64 {
        self.0
    }
}

impl EfficiencyProvider for Constant {
    fn lookup(&self, _pt: f64, _eta: f64) -> Efficiency {
        Efficiency {
            value: self.0,
            err_up: 0.0,
            err_down: 0.0,
        }
    }
}

/// A two-dimensional table binned in $`p_T`$ and $`\eta`$.
///
/// Inputs outside the edges are clamped into the first or last bin. With `abs_eta` set, the
/// table is indexed by $`|\eta|`$.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinnedTable {
    pub pt_edges: Vec<f64>,
    pub eta_edges: Vec<f64>,
    #[serde(default)]
    pub abs_eta: bool,
    /// `values[pt_bin][eta_bin]`
    pub values: Vec<Vec<f64>>,
    #[serde(default)]
    pub errors_up: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub errors_down: Option<Vec<Vec<f64>>>,
}

fn clamped_bin(edges: &[f64], x: f64) -> usize {
    let n_bins = edges.len().saturating_sub(1);
    if n_bins == 0 {
        return 0;
    }
    let i = edges.partition_point(|edge| *edge <= x);
    i.saturating_sub(1).min(n_bins - 1)
}

impl BinnedTable {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        //! Load a table from JSON and check that its value grids match its edges.
        //!
        //! # Errors
        //! [`ConfigError::MissingFile`] if nothing exists at `path`,
        //! [`ConfigError::InvalidTable`] if the grid shape is inconsistent.
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        let table: BinnedTable = load_json(path)?;
        table.validate().map_err(|reason| ConfigError::InvalidTable {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(table)
    }

    pub fn validate(&self) -> Result<(), String> {
        let n_pt = self.pt_edges.len().saturating_sub(1);
        let n_eta = self.eta_edges.len().saturating_sub(1);
        if n_pt == 0 || n_eta == 0 {
            return Err("a table needs at least one bin along each axis".to_string());
        }
        for (label, grid) in [
            ("values", Some(&self.values)),
            ("errors_up", self.errors_up.as_ref()),
            ("errors_down", self.errors_down.as_ref()),
        ] {
            let Some(grid) = grid else { continue };
            if grid.len() != n_pt || grid.iter().any(|row| row.len() != n_eta) {
                return Err(format!("{label} is not a {n_pt}x{n_eta} grid"));
            }
        }
        Ok(())
    }

    fn index(&self, pt: f64, eta: f64) -> (usize, usize) {
        let eta = if self.abs_eta { eta.abs() } else { eta };
        (
            clamped_bin(&self.pt_edges, pt),
            clamped_bin(&self.eta_edges, eta),
        )
    }

    pub fn value(&self, pt: f64, eta: f64) -> f64 {
        let (i, j) = self.index(pt, eta);
        self.values[i][j]
    }

    pub fn efficiency(&self, pt: f64, eta: f64) -> Efficiency {
        let (i, j) = self.index(pt, eta);
        let err = |grid: &Option<Vec<Vec<f64>>>| grid.as_ref().map_or(0.0, |g| g[i][j]);
        Efficiency {
            value: self.values[i][j],
            err_up: err(&self.errors_up),
            err_down: err(&self.errors_down),
        }
    }
}

impl JetCorrector for BinnedTable {
    fn correction(&self, pt: f64, eta: f64, _phi: f64, _area: f64, _rho: f64) -> f64 {
        self.value(pt, eta)
    }
}

impl JetUncertainty for BinnedTable {
    fn uncertainty(&self, pt: f64, eta: f64) -> f64 {
        self.value(pt, eta)
    }
}

impl JetResolution for BinnedTable {
    fn resolution(&self, pt: f64, eta: f64, _rho: f64) -> f64 {
        self.value(pt, eta)
    }
}

impl ResolutionScaleFactor for BinnedTable {
    fn scale_factor(&self, pt: f64, eta: f64, _rho: f64, shift: Shift) -> f64 {
        let eff = self.efficiency(pt, eta);
        match shift {
            Shift::Nominal => eff.value,
            Shift::Up => eff.up(),
            Shift::Down => eff.down(),
        }
    }
}

impl EfficiencyProvider for BinnedTable {
    fn lookup(&self, pt: f64, eta: f64) -> Efficiency {
        self.efficiency(pt, eta)
    }
}

/// Correction levels applied in sequence; each level sees the $`p_T`$ corrected by the ones
/// before it and the result is the product of all of them.
#[derive(Clone, Default)]
pub struct FactorizedCorrector {
    levels: Vec<Arc<dyn JetCorrector>>,
}

impl FactorizedCorrector {
    pub fn new(levels: Vec<Arc<dyn JetCorrector>>) -> Self {
        Self { levels }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl JetCorrector for FactorizedCorrector {
    fn correction(&self, pt: f64, eta: f64, phi: f64, area: f64, rho: f64) -> f64 {
        self.levels.iter().fold(1.0, |total, level| {
            total * level.correction(pt * total, eta, phi, area, rho)
        })
    }
}

/// Every provider needed to calibrate jets of one cone size.
#[derive(Clone)]
pub struct JetCalibration {
    pub corrector: Arc<dyn JetCorrector>,
    /// Uncertainty source name -> relative uncertainty.
    pub uncertainties: IndexMap<String, Arc<dyn JetUncertainty>>,
    pub resolution: Option<Arc<dyn JetResolution>>,
    pub resolution_sf: Option<Arc<dyn ResolutionScaleFactor>>,
}

impl JetCalibration {
    pub fn new(corrector: impl JetCorrector + 'static) -> Self {
        Self {
            corrector: Arc::new(corrector),
            uncertainties: IndexMap::new(),
            resolution: None,
            resolution_sf: None,
        }
    }

    pub fn identity() -> Self {
        Self::new(Constant(1.0))
    }

    pub fn with_uncertainty(mut self, source: &str, provider: impl JetUncertainty + 'static) -> Self {
        self.uncertainties
            .insert(source.to_string(), Arc::new(provider));
        self
    }

    pub fn with_resolution(
        mut self,
        resolution: impl JetResolution + 'static,
        scale_factor: impl ResolutionScaleFactor + 'static,
    ) -> Self {
        self.resolution = Some(Arc::new(resolution));
        self.resolution_sf = Some(Arc::new(scale_factor));
        self
    }
}

/// Calibration inputs for one job: a single era, either data or simulation.
///
/// Built once before the event loop and shared by reference with every stage.
#[derive(Clone)]
pub struct CalibrationContext {
    pub era: String,
    pub is_data: bool,
    pub ak4: JetCalibration,
    pub ak8: JetCalibration,
    /// Working point -> electron efficiency scale factor.
    pub electron_sf: IndexMap<String, Arc<dyn EfficiencyProvider>>,
    /// Working point -> muon efficiency scale factor.
    pub muon_sf: IndexMap<String, Arc<dyn EfficiencyProvider>>,
    /// `<tagger>_<wp>_<flavour>` -> b-tagging scale factor.
    pub btag_sf: IndexMap<String, Arc<dyn EfficiencyProvider>>,
}

impl CalibrationContext {
    pub fn new(era: &str, is_data: bool, ak4: JetCalibration, ak8: JetCalibration) -> Self {
        Self {
            era: era.to_string(),
            is_data,
            ak4,
            ak8,
            electron_sf: IndexMap::new(),
            muon_sf: IndexMap::new(),
            btag_sf: IndexMap::new(),
        }
    }

    pub fn identity(era: &str, is_data: bool) -> Self {
        //! A context whose jet corrections are all unity and which has no scale factors.
        Self::new(era, is_data, JetCalibration::identity(), JetCalibration::identity())
    }

    pub fn with_electron_sf(mut self, wp: &str, provider: impl EfficiencyProvider + 'static) -> Self {
        self.electron_sf.insert(wp.to_string(), Arc::new(provider));
        self
    }

    pub fn with_muon_sf(mut self, wp: &str, provider: impl EfficiencyProvider + 'static) -> Self {
        self.muon_sf.insert(wp.to_string(), Arc::new(provider));
        self
    }

    pub fn with_btag_sf(
        mut self,
        tagger: &str,
        wp: &str,
        flavour: &str,
        provider: impl EfficiencyProvider + 'static,
    ) -> Self {
        self.btag_sf
            .insert(btag_key(tagger, wp, flavour), Arc::new(provider));
        self
    }

    pub fn from_config(
        files: &EraCalibrationFiles,
        era: &str,
        run: &str,
        is_data: bool,
        base_dir: impl AsRef<Path>,
        jec_sources: &[String],
    ) -> Result<Self, ConfigError> {
        //! Load every calibration table named for `era`.
        //!
        //! Paths are resolved against `base_dir` after substituting `{cone}`, `{run}` and
        //! `{source}`. Data jobs only load jet energy corrections; simulation additionally loads
        //! uncertainties, resolutions and efficiency scale factors.
        //!
        //! # Errors
        //! Any absent or malformed table aborts construction, as does a data job without
        //! `jec_data` levels.
        if is_data && files.jec_data.is_empty() {
            return Err(ConfigError::MissingKey {
                key: format!("jec_data.{era}"),
            });
        }
        let base_dir = base_dir.as_ref();
        let resolve = |template: &str, cone: &str, source: &str| -> PathBuf {
            base_dir.join(
                template
                    .replace("{cone}", cone)
                    .replace("{run}", run)
                    .replace("{source}", source),
            )
        };
        let load = |path: PathBuf| -> Result<BinnedTable, ConfigError> {
            debug!("Loading calibration table {:?}", path);
            BinnedTable::from_file(path)
        };
        let jet_calibration = |cone: &str| -> Result<JetCalibration, ConfigError> {
            let levels = if is_data { &files.jec_data } else { &files.jec_mc };
            let levels = levels
                .iter()
                .map(|level| {
                    load(resolve(level, cone, "")).map(|t| Arc::new(t) as Arc<dyn JetCorrector>)
                })
                .collect::<Result<Vec<_>, _>>()?;
            let mut calibration = JetCalibration::new(FactorizedCorrector::new(levels));
            if !is_data {
                for source in jec_sources {
                    let table = load(resolve(&files.jec_uncertainty, cone, source))?;
                    calibration = calibration.with_uncertainty(source, table);
                }
                calibration = calibration.with_resolution(
                    load(resolve(&files.resolution, cone, ""))?,
                    load(resolve(&files.resolution_sf, cone, ""))?,
                );
            }
            Ok(calibration)
        };
        let mut context = Self::new(era, is_data, jet_calibration("AK4")?, jet_calibration("AK8")?);
        if !is_data {
            for (wp, path) in &files.electron {
                context = context.with_electron_sf(wp, load(resolve(path, "", ""))?);
            }
            for (wp, path) in &files.muon {
                context = context.with_muon_sf(wp, load(resolve(path, "", ""))?);
            }
            for (key, path) in &files.btag {
                context
                    .btag_sf
                    .insert(key.clone(), Arc::new(load(resolve(path, "", ""))?));
            }
        }
        info!(
            "Calibration for era {} ({}) loaded: {} electron, {} muon, {} b-tag tables",
            era,
            if is_data { "data" } else { "simulation" },
            context.electron_sf.len(),
            context.muon_sf.len(),
            context.btag_sf.len()
        );
        Ok(context)
    }

    pub fn btag(&self, tagger: &str, wp: &str, flavour: &str) -> Option<&Arc<dyn EfficiencyProvider>> {
        self.btag_sf.get(&btag_key(tagger, wp, flavour))
    }
}

pub fn btag_key(tagger: &str, wp: &str, flavour: &str) -> String {
    format!("{tagger}_{wp}_{flavour}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> BinnedTable {
        BinnedTable {
            pt_edges: vec![20.0, 50.0, 100.0],
            eta_edges: vec![0.0, 1.5, 2.5],
            abs_eta: true,
            values: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
            errors_up: Some(vec![vec![0.1, 0.1], vec![0.2, 0.2]]),
            errors_down: None,
        }
    }

    #[test]
    fn lookups_clamp_to_edge_bins() {
        let t = table();
        assert_eq!(t.value(10.0, 0.5), 1.0);
        assert_eq!(t.value(500.0, -2.0), 4.0);
        assert_eq!(t.value(60.0, 9.0), 4.0);
        assert!((t.efficiency(60.0, 0.0).up() - 3.2).abs() < 1e-12);
        assert_eq!(t.efficiency(60.0, 0.0).down(), 3.0);
    }

    #[test]
    fn factorized_levels_see_corrected_pt() {
        let first: Arc<dyn JetCorrector> = Arc::new(Constant(2.0));
        let second: Arc<dyn JetCorrector> = Arc::new(BinnedTable {
            pt_edges: vec![0.0, 150.0, 1000.0],
            eta_edges: vec![-5.0, 5.0],
            abs_eta: false,
            values: vec![vec![1.0], vec![1.5]],
            errors_up: None,
            errors_down: None,
        });
        let corrector = FactorizedCorrector::new(vec![first, second]);
        // 100 GeV raw becomes 200 GeV after the first level, which lands in the second bin
        assert_eq!(corrector.correction(100.0, 0.0, 0.0, 0.5, 10.0), 3.0);
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mut t = table();
        t.values.pop();
        assert!(t.validate().is_err());
    }
}

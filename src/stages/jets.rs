use std::sync::Arc;

use indexmap::IndexMap;
use nalgebra::Vector2;

use crate::calibration::CalibrationContext;
use crate::calibrator::{CalibratedJet, JetCalibrator, JetCone};
use crate::config::{era_value, FatJetConfig, WorkingPoints};
use crate::event::{EventRecord, MissingEnergy, SelectedFatJet, SelectedJet};
use crate::four_momentum::FourMomentum;
use crate::matcher::{TruthInfo, SENTINEL};
use crate::object::{Collection, FatJet, Jet};
use crate::pipeline::{Analyzer, Field, JobContext, SkimError};
use crate::source::{collect_objects, ObjectSource};
use crate::variation::Variation;

/// Small-radius jets closer than this to an accepted large-radius jet are its sub-jets.
pub const SUBJET_DELTA_R: f64 = 1.2;

pub const DEEP_JET: &str = "DeepJet";
pub const DEEP_CSV: &str = "DeepCSV";

/// Calibrates and selects large- and small-radius jets and propagates the corrections to the
/// missing transverse momentum.
#[derive(Default)]
pub struct JetStage {
    calibration: Option<Arc<CalibrationContext>>,
    variation: Variation,
    is_data: bool,
    pt_cut: f64,
    eta_cut: f64,
    fat_jet: FatJetConfig,
    /// Tagger -> working points of the job's era.
    working_points: IndexMap<String, WorkingPoints>,
}

impl JetStage {
    fn btag_id(&self, tagger: &str, score: f64) -> u8 {
        self.working_points
            .get(tagger)
            .map_or(0, |wp| wp.passed(score))
    }

    fn select(&self, jet: &Jet, calibrated: CalibratedJet) -> SelectedJet {
        SelectedJet {
            kinematics: calibrated.kinematics,
            area: jet.area,
            jec: calibrated.jec,
            smear: calibrated.smear,
            deep_jet: jet.deep_jet,
            deep_csv: jet.deep_csv,
            deep_jet_id: self.btag_id(DEEP_JET, jet.deep_jet),
            deep_csv_id: self.btag_id(DEEP_CSV, jet.deep_csv),
            parton_flavour: jet.parton_flavour.unwrap_or(SENTINEL),
            jet_id: jet.jet_id,
            pu_id: jet.pu_id,
            fat_jet_index: None,
            truth: TruthInfo::default(),
            btag_sf: IndexMap::new(),
        }
    }
}

impl Analyzer for JetStage {
    fn name(&self) -> &'static str {
        "Jet"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Jets, Field::SubJets, Field::FatJets, Field::Met]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        let era = context.era();
        let jet = &context.config.analyzer.jet;
        self.calibration = Some(Arc::clone(context.calibration));
        self.variation = context.variation.clone();
        self.is_data = context.is_data();
        self.pt_cut = era_value(&jet.pt, "jet.pt", era)?;
        self.eta_cut = era_value(&jet.eta, "jet.eta", era)?;
        self.fat_jet = context.config.analyzer.fat_jet.clone();
        self.working_points = jet
            .btag
            .iter()
            .map(|(tagger, per_era)| {
                era_value(per_era, &format!("jet.btag.{tagger}"), era).map(|wp| (tagger.clone(), wp))
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        let Some(calibration) = self.calibration.clone() else {
            return;
        };
        let info = source.event_info();
        let rho = info.rho;
        let mut met = FourMomentum::from_pt_eta_phi_m(info.met_pt, 0.0, info.met_phi, 0.0).transverse();

        let ak8 = JetCalibrator::new(&calibration.ak8, JetCone::Ak8, self.is_data);
        let gen_fat_jets = if self.is_data {
            None
        } else {
            Some(record.cache.gen_fat_jets(source))
        };
        for fat_jet in collect_objects::<FatJet>(source, Collection::FatJet) {
            if record.output.fat_jets.is_full() {
                break;
            }
            let calibrated = ak8.calibrate(&fat_jet, rho, &self.variation, gen_fat_jets, &mut record.rng);
            let k = calibrated.kinematics;
            if k.pt > self.fat_jet.pt && k.mass > self.fat_jet.mass && k.eta.abs() < self.eta_cut {
                record.output.fat_jets.push(SelectedFatJet {
                    kinematics: k,
                    jec: calibrated.jec,
                    smear: calibrated.smear,
                    tau1: fat_jet.tau1,
                    tau2: fat_jet.tau2,
                    tau3: fat_jet.tau3,
                    deep_ak8_class: fat_jet.deep_ak8_class,
                });
            }
        }

        let ak4 = JetCalibrator::new(&calibration.ak4, JetCone::Ak4, self.is_data);
        let gen_jets = if self.is_data {
            None
        } else {
            Some(record.cache.gen_jets(source))
        };
        for jet in collect_objects::<Jet>(source, Collection::Jet) {
            if record.output.jets.is_full() {
                break;
            }
            let calibrated = ak4.calibrate(&jet, rho, &self.variation, gen_jets, &mut record.rng);
            let k = calibrated.kinematics;
            if !(k.pt > self.pt_cut && k.eta.abs() < self.eta_cut) {
                continue;
            }
            met += (jet.kinematics.p4() - k.p4()).transverse();
            let selected = self.select(&jet, calibrated);
            match record
                .output
                .fat_jets
                .iter()
                .position(|fat_jet| fat_jet.kinematics.delta_r(&k) < SUBJET_DELTA_R)
            {
                Some(index) => {
                    record.output.sub_jets.push(SelectedJet {
                        fat_jet_index: Some(index),
                        ..selected
                    });
                }
                None => {
                    record.output.jets.push(selected);
                }
            }
        }

        let (dx, dy) = info.met_unclustered_delta.unwrap_or((0.0, 0.0));
        let unclustered = Vector2::new(dx, dy);
        record.output.met = MissingEnergy::from_vectors(met, met + unclustered, met - unclustered);
    }
}

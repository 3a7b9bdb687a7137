use std::sync::Arc;

use indexmap::IndexMap;

use crate::calibration::{CalibrationContext, Efficiency};
use crate::config::era_value;
use crate::event::{EventRecord, ScaleFactor, SelectedJet};
use crate::histogram::Histogram2D;
use crate::pipeline::{Analyzer, Field, JobContext, SkimError, VariationOutput};
use crate::source::ObjectSource;
use crate::stages::jets::{DEEP_CSV, DEEP_JET};

/// Leptons below this transverse momentum are looked up at the threshold.
pub const LEPTON_SF_MIN_PT: f64 = 30.0;

pub const WORKING_POINTS: [&str; 3] = ["Loose", "Medium", "Tight"];
pub const TAGGERS: [&str; 2] = [DEEP_JET, DEEP_CSV];

/// Hadron flavour name of a jet, as used in b-tagging tables.
pub fn flavour(parton_flavour: i32) -> &'static str {
    match parton_flavour.abs() {
        5 => "B",
        4 => "C",
        _ => "Light",
    }
}

fn tagger_id(jet: &SelectedJet, tagger: &str) -> u8 {
    match tagger {
        DEEP_JET => jet.deep_jet_id,
        DEEP_CSV => jet.deep_csv_id,
        _ => 0,
    }
}

fn scale_factor(efficiency: Efficiency) -> ScaleFactor {
    ScaleFactor::new(efficiency.value, efficiency.up(), efficiency.down())
}

/// Lepton and b-tagging scale factors, plus the b-tagging efficiency maps they are applied
/// with. Simulation only.
#[derive(Default)]
pub struct ScaleFactorStage {
    calibration: Option<Arc<CalibrationContext>>,
    is_data: bool,
    /// Histogram name -> true-flavour totals and per working point passes, in $`p_T`$ and
    /// $`\eta`$.
    efficiencies: IndexMap<String, Histogram2D>,
}

impl ScaleFactorStage {
    fn fill_efficiency(&mut self, jet: &SelectedJet) {
        let flavour = flavour(jet.parton_flavour);
        let (pt, eta) = (jet.kinematics.pt, jet.kinematics.eta);
        if let Some(total) = self.efficiencies.get_mut(&format!("nTrue{flavour}")) {
            total.fill(pt, eta, 1.0);
        }
        for tagger in TAGGERS {
            let id = tagger_id(jet, tagger) as usize;
            for wp in WORKING_POINTS.iter().take(id) {
                if let Some(pass) = self.efficiencies.get_mut(&format!("n{wp}{flavour}bTag{tagger}")) {
                    pass.fill(pt, eta, 1.0);
                }
            }
        }
    }

    fn btag_scale_factors(calibration: &CalibrationContext, jet: &mut SelectedJet) {
        let flavour = flavour(jet.parton_flavour);
        for tagger in TAGGERS {
            for wp in WORKING_POINTS {
                if let Some(provider) = calibration.btag(tagger, wp, flavour) {
                    let efficiency = provider.lookup(jet.kinematics.pt, jet.kinematics.eta);
                    jet.btag_sf
                        .insert(format!("{tagger}_{wp}"), scale_factor(efficiency));
                }
            }
        }
    }
}

impl Analyzer for ScaleFactorStage {
    fn name(&self) -> &'static str {
        "ScaleFactor"
    }

    fn reads(&self) -> &'static [Field] {
        &[Field::Electrons, Field::Muons, Field::Jets, Field::SubJets]
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::ScaleFactors]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        self.calibration = Some(Arc::clone(context.calibration));
        self.is_data = context.is_data();
        self.efficiencies.clear();
        if self.is_data {
            return Ok(());
        }
        let jet = &context.config.analyzer.jet;
        let pt_cut = era_value(&jet.pt, "jet.pt", context.era())?;
        let eta_cut = era_value(&jet.eta, "jet.eta", context.era())?;
        let mut pt_edges = vec![pt_cut];
        pt_edges.extend([50.0, 70.0, 90.0, 200.0].into_iter().filter(|edge| *edge > pt_cut));
        let eta_edges = vec![-eta_cut, -1.4, 1.4, eta_cut];
        let mut names = Vec::new();
        for flavour in ["B", "C", "Light"] {
            names.push(format!("nTrue{flavour}"));
            for wp in WORKING_POINTS {
                for tagger in TAGGERS {
                    names.push(format!("n{wp}{flavour}bTag{tagger}"));
                }
            }
        }
        for name in names {
            let histogram = Histogram2D::new(&name, pt_edges.clone(), eta_edges.clone());
            self.efficiencies.insert(name, histogram);
        }
        Ok(())
    }

    fn process(&mut self, _source: &dyn ObjectSource, record: &mut EventRecord) {
        if self.is_data {
            return;
        }
        let Some(calibration) = self.calibration.clone() else {
            return;
        };
        let output = &mut record.output;
        for electron in output.electrons.as_mut_slice() {
            let pt = electron.kinematics.pt.max(LEPTON_SF_MIN_PT);
            for (wp, provider) in &calibration.electron_sf {
                let efficiency = provider.lookup(pt, electron.kinematics.eta);
                electron.scale_factors.insert(wp.clone(), scale_factor(efficiency));
            }
        }
        for muon in output.muons.as_mut_slice() {
            let pt = muon.kinematics.pt.max(LEPTON_SF_MIN_PT);
            for (wp, provider) in &calibration.muon_sf {
                let efficiency = provider.lookup(pt, muon.kinematics.eta.abs());
                muon.scale_factors.insert(wp.clone(), scale_factor(efficiency));
            }
        }
        for jet in output
            .jets
            .as_mut_slice()
            .iter_mut()
            .chain(output.sub_jets.as_mut_slice().iter_mut())
        {
            Self::btag_scale_factors(&calibration, jet);
            self.fill_efficiency(jet);
        }
    }

    fn finalize(&mut self, output: &mut VariationOutput) {
        for histogram in self.efficiencies.values() {
            output.add_histogram(histogram.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::Constant;
    use crate::config::{JobSettings, SkimConfig};
    use crate::event::SelectedMuon;
    use crate::matcher::TruthInfo;
    use crate::object::{Kinematics, Muon};
    use crate::source::{EventBuffer, SyntheticEvent};
    use crate::variation::Variation;

    fn config() -> SkimConfig {
        serde_json::from_str(
            r#"{
                "analyzer": {
                    "electron": {"pt": {"2017": 25.0}, "eta": {"2017": 2.5}},
                    "muon": {"pt": {"2017": 20.0}, "eta": {"2017": 2.4}},
                    "jet": {"pt": {"2017": 30.0}, "eta": {"2017": 2.4}}
                }
            }"#,
        )
        .unwrap()
    }

    fn jet(pt: f64, parton_flavour: i32, deep_jet_id: u8) -> SelectedJet {
        SelectedJet {
            kinematics: Kinematics::new(pt, 0.5, 0.0, 10.0),
            area: 0.5,
            jec: 1.0,
            smear: 1.0,
            deep_jet: 0.0,
            deep_csv: 0.0,
            deep_jet_id,
            deep_csv_id: 0,
            parton_flavour,
            jet_id: 0,
            pu_id: 0,
            fat_jet_index: None,
            truth: TruthInfo::default(),
            btag_sf: IndexMap::new(),
        }
    }

    #[test]
    fn fills_scale_factors_and_cumulative_efficiencies() {
        let config = config();
        let settings = JobSettings::new("2017", "MC", &[]);
        let calibration = Arc::new(
            CalibrationContext::identity("2017", false)
                .with_muon_sf("Tight", Constant(0.97))
                .with_btag_sf(DEEP_JET, "Medium", "B", Constant(0.9)),
        );
        let variation = Variation::nominal();
        let mut stage = ScaleFactorStage::default();
        stage
            .configure(&JobContext {
                config: &config,
                settings: &settings,
                calibration: &calibration,
                variation: &variation,
            })
            .unwrap();

        let mut source = EventBuffer::new(vec![SyntheticEvent::new(1)], false);
        source.load(0).unwrap();
        let mut record = EventRecord::new(0);
        record.begin_event(1);
        record.begin_variation();
        record.output.muons.push(SelectedMuon::new(Muon {
            kinematics: Kinematics::new(22.0, -1.0, 0.0, 0.1),
            charge: 1,
            dxy: 0.0,
            dz: 0.0,
            iso03: 0.0,
            iso04: 0.0,
            mini_iso: 0.0,
            rel_jet_iso: 0.0,
            cut_id: 3,
            mva_id: 0,
            n_tracker_layers: 10,
        }));
        record.output.jets.push(jet(60.0, -5, 2));
        record.output.sub_jets.push(jet(40.0, 21, 0));
        stage.process(&source, &mut record);

        assert_eq!(record.output.muons[0].scale_factors["Tight"].nominal, 0.97);
        assert_eq!(record.output.jets[0].btag_sf["DeepJet_Medium"].nominal, 0.9);
        assert!(record.output.sub_jets[0].btag_sf.is_empty());

        let mut output = VariationOutput::default();
        stage.finalize(&mut output);
        let total = |name: &str| match &output.histograms[name] {
            crate::histogram::Histogram::TwoD(h) => h.total(),
            _ => panic!("{name} is not two-dimensional"),
        };
        assert_eq!(total("nTrueB"), 1.0);
        assert_eq!(total("nTrueLight"), 1.0);
        assert_eq!(total("nLooseBbTagDeepJet"), 1.0);
        assert_eq!(total("nMediumBbTagDeepJet"), 1.0);
        assert_eq!(total("nTightBbTagDeepJet"), 0.0);
        assert_eq!(total("nLooseLightbTagDeepJet"), 0.0);
    }
}

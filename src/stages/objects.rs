use crate::config::era_value;
use crate::event::{EventRecord, SelectedElectron, SelectedMuon, SelectedTrack};
use crate::object::{Collection, Electron, IsoTrack, Kinematics, Muon};
use crate::pipeline::{Analyzer, Field, JobContext, SkimError};
use crate::source::{collect_objects, ObjectSource};
use crate::variation::{Shift, Systematic, Variation};

pub const ISOTRACK_MIN_PT: f64 = 20.0;
pub const ISOTRACK_MAX_DZ: f64 = 0.1;

#[derive(Debug, Default)]
pub struct ElectronStage {
    variation: Variation,
    pt_cut: f64,
    eta_cut: f64,
}

impl ElectronStage {
    fn shifted_pt(&self, electron: &Electron) -> f64 {
        //! Transverse momentum of `electron` in this stage's variation; the nominal value when
        //! the input carries no energy shifts.
        let Some(shifts) = electron.energy_shifts else {
            return electron.kinematics.pt;
        };
        match (&self.variation.systematic, self.variation.shift) {
            (Systematic::ElectronScale, Shift::Up) => shifts.scale_up,
            (Systematic::ElectronScale, Shift::Down) => shifts.scale_down,
            (Systematic::ElectronSigma, Shift::Up) => shifts.sigma_up,
            (Systematic::ElectronSigma, Shift::Down) => shifts.sigma_down,
            _ => electron.kinematics.pt,
        }
    }
}

impl Analyzer for ElectronStage {
    fn name(&self) -> &'static str {
        "Electron"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Electrons]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        let cut = &context.config.analyzer.electron;
        self.variation = context.variation.clone();
        self.pt_cut = era_value(&cut.pt, "electron.pt", context.era())?;
        self.eta_cut = era_value(&cut.eta, "electron.eta", context.era())?;
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        for electron in collect_objects::<Electron>(source, Collection::Electron) {
            if record.output.electrons.is_full() {
                break;
            }
            // Any energy-shifted momentum above threshold keeps the electron in every copy.
            let passes_pt = electron
                .candidate_pts()
                .iter()
                .any(|pt| *pt > self.pt_cut);
            if !passes_pt || electron.kinematics.eta.abs() >= self.eta_cut || !electron.conversion_veto
            {
                continue;
            }
            let kinematics = Kinematics {
                pt: self.shifted_pt(&electron),
                ..electron.kinematics
            };
            record
                .output
                .electrons
                .push(SelectedElectron::new(electron, kinematics));
        }
    }
}

#[derive(Debug, Default)]
pub struct MuonStage {
    pt_cut: f64,
    eta_cut: f64,
}

impl Analyzer for MuonStage {
    fn name(&self) -> &'static str {
        "Muon"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Muons]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        let cut = &context.config.analyzer.muon;
        self.pt_cut = era_value(&cut.pt, "muon.pt", context.era())?;
        self.eta_cut = era_value(&cut.eta, "muon.eta", context.era())?;
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        for muon in collect_objects::<Muon>(source, Collection::Muon) {
            if record.output.muons.is_full() {
                break;
            }
            if muon.kinematics.pt > self.pt_cut && muon.kinematics.eta.abs() < self.eta_cut {
                record.output.muons.push(SelectedMuon::new(muon));
            }
        }
    }
}

/// Isolated tracks within the acceptance of both lepton flavours.
#[derive(Debug, Default)]
pub struct IsoTrackStage {
    eta_cut: f64,
}

impl Analyzer for IsoTrackStage {
    fn name(&self) -> &'static str {
        "IsoTrack"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::IsoTracks]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        let analyzer = &context.config.analyzer;
        let electron = era_value(&analyzer.electron.eta, "electron.eta", context.era())?;
        let muon = era_value(&analyzer.muon.eta, "muon.eta", context.era())?;
        self.eta_cut = electron.min(muon);
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        for track in collect_objects::<IsoTrack>(source, Collection::IsoTrack) {
            if record.output.iso_tracks.is_full() {
                break;
            }
            let k = track.kinematics;
            if k.eta.abs() >= self.eta_cut || k.pt <= ISOTRACK_MIN_PT || track.dz.abs() >= ISOTRACK_MAX_DZ {
                continue;
            }
            record.output.iso_tracks.push(SelectedTrack {
                kinematics: k,
                charge: if track.pdg_id > 0 { 1 } else { -1 },
                pdg_id: track.pdg_id,
                dxy: track.dxy,
                dz: track.dz,
                iso03: track.iso03,
                mini_iso: track.mini_iso,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::calibration::CalibrationContext;
    use crate::config::{JobSettings, SkimConfig};
    use crate::object::EnergyShifts;
    use crate::source::{EventBuffer, SyntheticEvent};

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

    fn electron(pt: f64, shifts: Option<EnergyShifts>) -> Electron {
        Electron {
            kinematics: Kinematics::new(pt, 0.1, 0.2, 0.0),
            charge: -1,
            dxy: 0.0,
            dz: 0.0,
            iso03: 0.0,
            mini_iso: 0.0,
            rel_jet_iso: 0.0,
            cut_id: 4,
            mva_id: 3,
            conversion_veto: true,
            energy_shifts: shifts,
        }
    }

    fn track(pt: f64, eta: f64, dz: f64, pdg_id: i32) -> IsoTrack {
        IsoTrack {
            kinematics: Kinematics::new(pt, eta, 0.0, 0.0),
            dxy: 0.0,
            dz,
            pdg_id,
            iso03: 0.0,
            mini_iso: 0.0,
        }
    }

    fn run(stage: &mut dyn Analyzer, variation: Variation, event: SyntheticEvent) -> EventRecord {
        let config = config();
        let settings = JobSettings::new("2017", "MC", &[]);
        let calibration = Arc::new(CalibrationContext::identity("2017", false));
        stage
            .configure(&JobContext {
                config: &config,
                settings: &settings,
                calibration: &calibration,
                variation: &variation,
            })
            .unwrap();
        let mut source = EventBuffer::new(vec![event], false);
        source.load(0).unwrap();
        let mut record = EventRecord::new(0);
        record.begin_event(1);
        record.begin_variation();
        stage.process(&source, &mut record);
        record
    }

    #[test]
    fn shifted_momenta_keep_electrons_and_set_their_pt() {
        let shifts = EnergyShifts {
            scale_up: 26.0,
            scale_down: 23.0,
            sigma_up: 24.5,
            sigma_down: 24.0,
        };
        let event = SyntheticEvent::new(1)
            .with(electron(24.8, Some(shifts)))
            .with(electron(24.8, None));
        let scale_up = Variation::parse("EleScale", &[]).unwrap()[0].clone();
        let record = run(&mut ElectronStage::default(), scale_up, event.clone());
        assert_eq!(record.output.electrons.len(), 1);
        assert_eq!(record.output.electrons[0].kinematics.pt, 26.0);

        let record = run(&mut ElectronStage::default(), Variation::nominal(), event);
        assert_eq!(record.output.electrons.len(), 1);
        assert_eq!(record.output.electrons[0].kinematics.pt, 24.8);
    }

    #[test]
    fn tracks_use_the_tighter_lepton_acceptance() {
        let event = SyntheticEvent::new(1)
            .with(track(30.0, 2.45, 0.0, 211))
            .with(track(30.0, 1.0, 0.05, -211))
            .with(track(30.0, 1.0, 0.2, 211))
            .with(track(15.0, 1.0, 0.0, 211));
        let record = run(&mut IsoTrackStage::default(), Variation::nominal(), event);
        assert_eq!(record.output.iso_tracks.len(), 1);
        assert_eq!(record.output.iso_tracks[0].charge, -1);
    }
}

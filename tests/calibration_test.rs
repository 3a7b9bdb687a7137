use approx::assert_relative_eq;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use skimmer::config::EraCalibrationFiles;
use skimmer::prelude::*;
use std::fs;

fn jet(pt: f64) -> Jet {
    Jet {
        kinematics: Kinematics::new(pt, 0.3, 1.2, 10.0),
        raw_factor: 0.0,
        area: 0.5,
        deep_jet: 0.0,
        deep_csv: 0.0,
        parton_flavour: None,
        jet_id: 0,
        pu_id: 0,
    }
}

fn gen_jet(pt: f64) -> GenJet {
    GenJet {
        kinematics: Kinematics::new(pt, 0.3, 1.2, 10.0),
    }
}

fn smeared(resolution: f64, scale_factor: f64) -> JetCalibration {
    JetCalibration::identity().with_resolution(Constant(resolution), Constant(scale_factor))
}

#[test]
fn data_jets_are_only_corrected() {
    let calibration = JetCalibration::new(Constant(1.1)).with_resolution(Constant(0.1), Constant(1.5));
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, true);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let result = calibrator.calibrate(&jet(100.0), 20.0, &Variation::nominal(), None, &mut rng);
    assert_relative_eq!(result.jec, 1.1);
    assert_eq!(result.smear, 1.0);
    assert_relative_eq!(result.kinematics.pt, 110.0, epsilon = 1e-9);
    assert_relative_eq!(result.kinematics.mass, 11.0, epsilon = 1e-9);
    assert_eq!(result.kinematics.eta, 0.3);
    assert_eq!(result.kinematics.phi, 1.2);
}

#[test]
fn raw_momentum_removes_stored_correction() {
    let calibration = JetCalibration::new(Constant(1.25));
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, true);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let stored = Jet {
        raw_factor: 0.2,
        ..jet(100.0)
    };
    let result = calibrator.calibrate(&stored, 20.0, &Variation::nominal(), None, &mut rng);
    assert_relative_eq!(result.kinematics.pt, 100.0, epsilon = 1e-9);
}

#[test]
fn matched_jets_scale_towards_generator_jet() {
    let calibration = smeared(0.1, 1.2);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let gen_jets = [gen_jet(90.0)];
    let result = calibrator.calibrate(&jet(100.0), 20.0, &Variation::nominal(), Some(&gen_jets[..]), &mut rng);
    assert_relative_eq!(result.smear, 1.02, epsilon = 1e-12);
    assert_relative_eq!(result.kinematics.pt, 102.0, epsilon = 1e-9);
}

#[test]
fn generator_match_needs_both_distance_and_momentum() {
    let calibration = smeared(0.1, 1.2);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let far = GenJet {
        kinematics: Kinematics::new(95.0, 0.3, 1.5, 0.0),
    };
    let off_scale = gen_jet(50.0);
    let close = GenJet {
        kinematics: Kinematics::new(100.0, 0.35, 1.2, 0.0),
    };
    let nearest = GenJet {
        kinematics: Kinematics::new(92.0, 0.31, 1.2, 0.0),
    };
    assert_eq!(calibrator.match_gen_jet(100.0, 0.3, 1.2, 0.1, &[far, off_scale]), None);
    assert_eq!(
        calibrator.match_gen_jet(100.0, 0.3, 1.2, 0.1, &[close, nearest, far]),
        Some(92.0)
    );
    // Ranked by angle alone, even though the farther candidate is closer in momentum.
    assert_eq!(
        calibrator.match_gen_jet(100.0, 0.3, 1.2, 0.1, &[nearest, close]),
        Some(92.0)
    );
}

#[test]
fn smearing_never_goes_below_floor() {
    let calibration = smeared(1.0, 2.0);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let mut rng = ChaCha8Rng::seed_from_u64(1);
    let gen_jets = [gen_jet(35.0)];
    let result = calibrator.calibrate(&jet(10.0), 20.0, &Variation::nominal(), Some(&gen_jets[..]), &mut rng);
    assert_relative_eq!(result.smear, MIN_SMEARED_PT / 10.0, epsilon = 1e-12);
    assert_relative_eq!(result.kinematics.pt, MIN_SMEARED_PT, epsilon = 1e-12);
}

#[test]
fn unmatched_smearing_depends_only_on_seed() {
    let calibration = smeared(0.1, 1.3);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let no_gen_jets: &[GenJet] = &[];
    let draw = |seed: u64| {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        calibrator.smear_factor(100.0, 0.3, 1.2, 20.0, &Variation::nominal(), Some(no_gen_jets), &mut rng)
    };
    assert_eq!(draw(7), draw(7));
    assert_ne!(draw(7), 1.0);
}

#[test]
fn unmatched_jets_with_unit_scale_factor_are_unchanged() {
    let calibration = smeared(0.1, 1.0);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let no_gen_jets: &[GenJet] = &[];
    let smear = calibrator.smear_factor(100.0, 0.3, 1.2, 20.0, &Variation::nominal(), Some(no_gen_jets), &mut rng);
    assert_eq!(smear, 1.0);
}

#[test]
fn missing_generator_jets_skip_smearing() {
    let calibration = smeared(0.1, 1.3);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak8, false);
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let smear = calibrator.smear_factor(100.0, 0.3, 1.2, 20.0, &Variation::nominal(), None, &mut rng);
    assert_eq!(smear, 1.0);
}

#[test]
fn uncertainty_is_evaluated_at_corrected_momentum() {
    let uncertainty = BinnedTable {
        pt_edges: vec![0.0, 105.0, 1000.0],
        eta_edges: vec![-5.0, 5.0],
        abs_eta: false,
        values: vec![vec![0.5], vec![0.1]],
        errors_up: None,
        errors_down: None,
    };
    let calibration = JetCalibration::new(Constant(1.1)).with_uncertainty("Total", uncertainty);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let sources = vec!["Total".to_string()];
    let variations = Variation::parse("JEC_Total", &sources).unwrap();
    let up = calibrator.jec_factor(&jet(100.0), 20.0, &variations[0]);
    let down = calibrator.jec_factor(&jet(100.0), 20.0, &variations[1]);
    assert_relative_eq!(up, 1.1 * 1.1, epsilon = 1e-12);
    assert_relative_eq!(down, 1.1 * 0.9, epsilon = 1e-12);
    let nominal = calibrator.jec_factor(&jet(100.0), 20.0, &Variation::nominal());
    assert_relative_eq!(nominal, 1.1, epsilon = 1e-12);
}

fn files(dir: &std::path::Path) -> EraCalibrationFiles {
    let table = r#"{"pt_edges": [0.0, 1000.0], "eta_edges": [-5.0, 5.0], "values": [[1.0]]}"#;
    for name in [
        "L2Relative_AK4.json",
        "L2Relative_AK8.json",
        "Residual_B_AK4.json",
        "Residual_B_AK8.json",
    ] {
        fs::write(dir.join(name), table).unwrap();
    }
    EraCalibrationFiles {
        jec_mc: vec!["L2Relative_{cone}.json".to_string()],
        jec_data: vec![
            "L2Relative_{cone}.json".to_string(),
            "Residual_{run}_{cone}.json".to_string(),
        ],
        jec_uncertainty: "Uncertainty_{source}_{cone}.json".to_string(),
        resolution: "Resolution_{cone}.json".to_string(),
        resolution_sf: "ResolutionSF_{cone}.json".to_string(),
        electron: Default::default(),
        muon: Default::default(),
        btag: Default::default(),
    }
}

#[test]
fn data_calibration_only_needs_corrections() {
    let dir = tempfile::tempdir().unwrap();
    let files = files(dir.path());
    let context = CalibrationContext::from_config(&files, "2017", "B", true, dir.path(), &[]).unwrap();
    assert!(context.is_data);
    assert!(context.ak4.resolution.is_none());
}

#[test]
fn missing_calibration_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let files = files(dir.path());
    let result = CalibrationContext::from_config(&files, "2017", "MC", false, dir.path(), &[]);
    assert!(matches!(result, Err(ConfigError::MissingFile { .. })));
}

#[test]
fn malformed_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(
        &path,
        r#"{"pt_edges": [0.0, 50.0, 1000.0], "eta_edges": [-5.0, 5.0], "values": [[1.0]]}"#,
    )
    .unwrap();
    assert!(matches!(
        BinnedTable::from_file(&path),
        Err(ConfigError::InvalidTable { .. })
    ));
}

#[test]
fn generator_jets_with_corrupt_angles_are_ignored() {
    let calibration = smeared(0.1, 1.2);
    let calibrator = JetCalibrator::new(&calibration, JetCone::Ak4, false);
    let corrupt = GenJet {
        kinematics: Kinematics::new(100.0, 0.3, f64::INFINITY, 0.0),
    };
    assert_eq!(calibrator.match_gen_jet(100.0, 0.3, 1.2, 0.1, &[corrupt]), None);
}

#[test]
fn data_calibration_requires_correction_levels() {
    let dir = tempfile::tempdir().unwrap();
    let files = EraCalibrationFiles {
        jec_data: Vec::new(),
        ..files(dir.path())
    };
    let result = CalibrationContext::from_config(&files, "2017", "B", true, dir.path(), &[]);
    match result {
        Err(ConfigError::MissingKey { key }) => assert_eq!(key, "jec_data.2017"),
        _ => panic!("a data job without correction levels must be rejected"),
    }
}

use skimmer::prelude::*;

fn muon() -> SelectedMuon {
    SelectedMuon::new(Muon {
        kinematics: Kinematics::new(30.0, 0.5, 0.0, 0.1),
        charge: 1,
        dxy: 0.0,
        dz: 0.0,
        iso03: 0.0,
        iso04: 0.0,
        mini_iso: 0.0,
        rel_jet_iso: 0.0,
        cut_id: 3,
        mva_id: 0,
        n_tracker_layers: 12,
    })
}

fn jet() -> SelectedJet {
    SelectedJet {
        kinematics: Kinematics::new(50.0, 0.0, 1.0, 8.0),
        area: 0.5,
        jec: 1.0,
        smear: 1.0,
        deep_jet: 0.0,
        deep_csv: 0.0,
        deep_jet_id: 0,
        deep_csv_id: 0,
        parton_flavour: 0,
        jet_id: 6,
        pu_id: 7,
        fat_jet_index: None,
        truth: TruthInfo::default(),
        btag_sf: Default::default(),
    }
}

fn channel() -> Cutflow {
    let mut cutflow = Cutflow::new("Muon2J");
    cutflow.add_cut("Jet", ">=", 2).unwrap();
    cutflow.add_cut("Lepton", "==", 1).unwrap();
    cutflow.add_trigger(vec!["HLT_IsoMu27".to_string()]);
    cutflow
}

#[test]
fn trigger_is_the_first_cut() {
    let cutflow = channel();
    let labels: Vec<String> = cutflow.cuts().iter().map(Cut::label).collect();
    assert_eq!(
        labels,
        vec!["Trigger", "N_{j} >=2 (Not clean)", "N_{l} ==1 (No ID.)"]
    );
    let bins: Vec<&String> = cutflow.histogram().bins.keys().collect();
    assert_eq!(
        bins,
        vec!["No cuts", "Trigger", "N_{j} >=2 (Not clean)", "N_{l} ==1 (No ID.)"]
    );
}

#[test]
fn channels_without_triggers_require_filters() {
    let mut cutflow = Cutflow::new("Electron");
    cutflow.add_cut("Electron", ">=", 1).unwrap();
    cutflow.add_trigger(Vec::new());
    assert_eq!(cutflow.cuts()[0], Cut::Filters);

    let mut record = OutputRecord::default();
    record.met_filters.insert("Flag_goodVertices".to_string(), true);
    record.met_filters.insert("Flag_eeBadScFilter".to_string(), false);
    assert!(!cutflow.evaluate(&record, 1.0));
    assert_eq!(cutflow.histogram().values(), vec![1.0, 0.0, 0.0]);
}

#[test]
fn histogram_records_the_passing_prefix() {
    let mut cutflow = channel();
    let mut record = OutputRecord::default();
    record.triggers.insert("HLT_IsoMu27".to_string(), true);
    record.jets.push(jet());
    record.muons.push(muon());

    assert!(!cutflow.evaluate(&record, 1.0));
    assert!(!cutflow.is_alive());
    // The lepton requirement holds, but is never reached.
    assert_eq!(cutflow.histogram().values(), vec![1.0, 1.0, 0.0, 0.0]);

    record.jets.push(jet());
    assert!(cutflow.evaluate(&record, 1.0));
    assert_eq!(cutflow.histogram().values(), vec![2.0, 2.0, 1.0, 1.0]);

    record.triggers.insert("HLT_IsoMu27".to_string(), false);
    // A negative weight only lowers the first bin, so later bins may exceed it.
    assert!(!cutflow.evaluate(&record, -1.0));
    let values = cutflow.histogram().values();
    assert_eq!(values, vec![1.0, 2.0, 1.0, 1.0]);
}

#[test]
fn bins_never_increase_along_the_chain() {
    let mut cutflow = channel();
    for n_jets in 0..5 {
        for fired in [true, false] {
            let mut record = OutputRecord::default();
            record.triggers.insert("HLT_IsoMu27".to_string(), fired);
            for _ in 0..n_jets {
                record.jets.push(jet());
            }
            if n_jets % 2 == 0 {
                record.muons.push(muon());
            }
            cutflow.evaluate(&record, 1.0);
        }
    }
    let values = cutflow.histogram().values();
    assert_eq!(values[0], 10.0);
    assert!(values.windows(2).all(|pair| pair[1] <= pair[0]));
}

#[test]
fn missing_trigger_counts_as_not_fired() {
    let mut cutflow = channel();
    let mut record = OutputRecord::default();
    record.jets.push(jet());
    record.jets.push(jet());
    record.muons.push(muon());
    assert!(!cutflow.evaluate(&record, 1.0));
}

#[test]
fn unknown_operators_and_objects_are_rejected() {
    let mut cutflow = Cutflow::new("Bad");
    assert!(matches!(
        cutflow.add_cut("Jet", "!=", 2),
        Err(ConfigError::UnknownOperator { .. })
    ));
    assert!(matches!(
        cutflow.add_cut("Photon", ">=", 1),
        Err(ConfigError::UnknownObject { .. })
    ));
    assert!(cutflow.cuts().is_empty());
}

#[test]
fn merged_cutflows_add_up() {
    let mut a = channel();
    let mut b = channel();
    let record = OutputRecord::default();
    a.evaluate(&record, 1.0);
    b.evaluate(&record, 1.0);
    b.evaluate(&record, 1.0);
    a.merge(&b);
    assert_eq!(a.histogram().values()[0], 3.0);
}

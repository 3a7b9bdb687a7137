use std::f64::consts::PI;
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use skimmer::calibration::JetCalibration;
use skimmer::prelude::*;

const CONFIG: &str = r#"{
    "analyzer": {
        "electron": {"pt": {"2017": 20.0}, "eta": {"2017": 2.4}},
        "muon": {"pt": {"2017": 20.0}, "eta": {"2017": 2.4}},
        "jet": {"pt": {"2017": 30.0}, "eta": {"2017": 2.4}, "jec_syst": ["Total"]},
        "met_filter": {"2017": ["Flag_goodVertices"]}
    },
    "channel": {
        "Ele4J": {
            "selection": {
                "Electron": {"operator": "==", "threshold": 1},
                "Jet": {"operator": ">=", "threshold": 4}
            },
            "trigger": {"2017": ["HLT_Ele35_WPTight_Gsf"]}
        },
        "Muon4J": {
            "selection": {
                "Muon": {"operator": "==", "threshold": 1},
                "Jet": {"operator": ">=", "threshold": 4}
            }
        }
    },
    "systematics": {"JEC_Total": ["Ele4J", "Muon4J"], "JER": ["Ele4J", "Muon4J"]}
}"#;

fn generate_events(n: u64) -> Vec<SyntheticEvent> {
    let mut rng = StdRng::seed_from_u64(42);
    (0..n)
        .map(|i| {
            let mut event = SyntheticEvent::new(i)
                .with_flag("HLT_Ele35_WPTight_Gsf", rng.gen_bool(0.8))
                .with_info(|info| {
                    info.gen_weight = Some(1.0);
                    info.n_true_int = Some(rng.gen_range(10.0..60.0));
                    info.rho = 20.0;
                    info.met_pt = rng.gen_range(0.0..100.0);
                });
            let kinematics = |rng: &mut StdRng| {
                Kinematics::new(
                    rng.gen_range(20.0..200.0),
                    rng.gen_range(-2.5..2.5),
                    rng.gen_range(-PI..PI),
                    rng.gen_range(0.0..10.0),
                )
            };
            for _ in 0..rng.gen_range(4..10) {
                let kinematics = kinematics(&mut rng);
                event = event
                    .with(GenJet { kinematics })
                    .with(Jet {
                        kinematics: Kinematics {
                            pt: kinematics.pt * rng.gen_range(0.9..1.1),
                            ..kinematics
                        },
                        raw_factor: 0.05,
                        area: 0.5,
                        deep_jet: rng.gen(),
                        deep_csv: rng.gen(),
                        parton_flavour: Some(5),
                        jet_id: 6,
                        pu_id: 7,
                    });
            }
            if rng.gen_bool(0.5) {
                event = event.with(Electron {
                    kinematics: kinematics(&mut rng),
                    charge: -1,
                    dxy: 0.0,
                    dz: 0.0,
                    iso03: 0.05,
                    mini_iso: 0.05,
                    rel_jet_iso: 0.0,
                    cut_id: 4,
                    mva_id: 3,
                    conversion_veto: true,
                    energy_shifts: None,
                });
            } else {
                event = event.with(Muon {
                    kinematics: kinematics(&mut rng),
                    charge: 1,
                    dxy: 0.0,
                    dz: 0.0,
                    iso03: 0.05,
                    iso04: 0.05,
                    mini_iso: 0.05,
                    rel_jet_iso: 0.0,
                    cut_id: 3,
                    mva_id: 0,
                    n_tracker_layers: 12,
                });
            }
            event
        })
        .collect()
}

fn pipeline_benchmark(c: &mut Criterion) {
    let config: SkimConfig = serde_json::from_str(CONFIG).unwrap();
    let settings = JobSettings::new("2017", "MC", &["Ele4J", "Muon4J"]);
    let ak4 = JetCalibration::identity().with_resolution(Constant(0.1), Constant(1.1));
    let calibration = Arc::new(CalibrationContext::new(
        "2017",
        false,
        ak4,
        JetCalibration::identity(),
    ));
    let source = EventBuffer::new(generate_events(2000), false);
    c.bench_function("skim 2000 events", |b| {
        b.iter(|| {
            let mut skimmer = Skimmer::new(&config, &settings, calibration.clone()).unwrap();
            let mut sink = MemorySink::new();
            skimmer.run(&mut source.clone(), &mut sink).unwrap();
            black_box(skimmer.finish());
        })
    });
    c.bench_function("skim 2000 events in 4 chunks", |b| {
        b.iter(|| {
            let sink = SharedSink::new(MemorySink::new());
            let output = Skimmer::run_parallel(
                || Skimmer::new(&config, &settings, calibration.clone()),
                &source,
                4,
                &sink,
            )
            .unwrap();
            black_box(output);
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(20);
    targets = pipeline_benchmark
}
criterion_main!(benches);

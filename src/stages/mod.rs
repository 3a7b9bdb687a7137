//! The standard per-event stages, each writing one part of the [`crate::event::OutputRecord`].
use crate::pipeline::Analyzer;

pub mod jets;
pub mod misc;
pub mod objects;
pub mod scale_factors;
pub mod trigger;
pub mod truth;
pub mod weights;

pub use jets::JetStage;
pub use misc::MiscStage;
pub use objects::{ElectronStage, IsoTrackStage, MuonStage};
pub use scale_factors::ScaleFactorStage;
pub use trigger::TriggerStage;
pub use truth::TruthStage;
pub use weights::WeightStage;

/// Fresh, unconfigured instances of every stage in processing order.
pub fn standard_stages() -> Vec<Box<dyn Analyzer>> {
    vec![
        Box::<TriggerStage>::default(),
        Box::<JetStage>::default(),
        Box::<ElectronStage>::default(),
        Box::<MuonStage>::default(),
        Box::<IsoTrackStage>::default(),
        Box::<TruthStage>::default(),
        Box::<WeightStage>::default(),
        Box::new(MiscStage),
        Box::<ScaleFactorStage>::default(),
    ]
}

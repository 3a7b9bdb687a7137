pub mod calibration;
pub mod calibrator;
pub mod config;
pub mod cutflow;
pub mod event;
pub mod four_momentum;
pub mod histogram;
pub mod matcher;
pub mod object;
pub mod pipeline;
pub mod sink;
pub mod skimmer;
pub mod source;
pub mod stages;
pub mod variation;

pub mod prelude {
    pub use crate::calibration::{
        BinnedTable, CalibrationContext, Constant, Efficiency, EfficiencyProvider,
        FactorizedCorrector, JetCalibration, JetCorrector, JetResolution, JetUncertainty,
        ResolutionScaleFactor,
    };
    pub use crate::calibrator::{CalibratedJet, JetCalibrator, JetCone, MIN_SMEARED_PT};
    pub use crate::config::{
        CalibrationConfig, ConfigError, JobSettings, SkimConfig, WorkingPoints,
    };
    pub use crate::cutflow::{CompareOp, CountedObject, Cut, Cutflow};
    pub use crate::event::{
        CappedVec, EventCache, EventRecord, EventWeights, MissingEnergy, OutputRecord,
        ScaleFactor, SelectedElectron, SelectedFatJet, SelectedJet, SelectedMuon, SelectedTrack,
    };
    pub use crate::four_momentum::FourMomentum;
    pub use crate::histogram::{Histogram, Histogram1D, Histogram2D, LabelledHistogram};
    pub use crate::matcher::{ClaimSet, MatchCriteria, TruthInfo, TruthMatchable, SENTINEL};
    pub use crate::object::{
        Collection, Electron, EnergyShifts, FatJet, GenJet, GenParticle, IsoTrack, Jet,
        Kinematics, Muon, PhysicsObject, RawJet,
    };
    pub use crate::physics_object;
    pub use crate::pipeline::{
        Analyzer, Field, JobContext, JobOutput, Pipeline, SkimError, VariationOutput,
    };
    pub use crate::sink::{JsonLinesSink, MemorySink, SharedSink, Sink, SinkError};
    pub use crate::skimmer::{log_summary, Skimmer};
    pub use crate::source::{
        EventBuffer, EventInfo, NanoSource, ObjectSource, SourceError, SyntheticEvent,
    };
    pub use crate::stages::standard_stages;
    pub use crate::variation::{Shift, Systematic, Variation};
}

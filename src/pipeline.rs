use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::calibration::CalibrationContext;
use crate::config::{ConfigError, JobSettings, SkimConfig};
use crate::cutflow::Cutflow;
use crate::event::EventRecord;
use crate::histogram::Histogram;
use crate::sink::SinkError;
use crate::source::{ObjectSource, SourceError};
use crate::variation::Variation;

#[derive(Error, Debug)]
pub enum SkimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Sink(#[from] SinkError),
    #[error("Stage {stage} reads {field:?}, which no earlier stage writes")]
    StageOrder { stage: String, field: Field },
}

/// Parts of the [`crate::event::OutputRecord`] a stage can depend on or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Triggers,
    MetFilters,
    Jets,
    SubJets,
    FatJets,
    Met,
    Electrons,
    Muons,
    IsoTracks,
    Truth,
    Weights,
    EventNumber,
    NParton,
    ScaleFactors,
}

/// Everything a stage may look at while configuring itself.
pub struct JobContext<'a> {
    pub config: &'a SkimConfig,
    pub settings: &'a JobSettings,
    pub calibration: &'a Arc<CalibrationContext>,
    pub variation: &'a Variation,
}

impl JobContext<'_> {
    pub fn era(&self) -> &str {
        &self.settings.era
    }

    pub fn is_data(&self) -> bool {
        self.settings.is_data()
    }
}

/// One step of the per-event chain.
///
/// A stage declares which record fields it reads and writes; the [`Pipeline`] refuses an
/// order in which a read is not preceded by a write.
pub trait Analyzer: Send {
    fn name(&self) -> &'static str;

    fn reads(&self) -> &'static [Field] {
        &[]
    }

    fn writes(&self) -> &'static [Field];

    /// Called once before the event loop; errors abort the job.
    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError>;

    /// Called once per event. Absent inputs are replaced by neutral values, never reported.
    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord);

    #[allow(unused_variables)]
    fn finalize(&mut self, output: &mut VariationOutput) {}
}

/// An ordered chain of stages sharing one [`EventRecord`].
pub struct Pipeline {
    stages: Vec<Box<dyn Analyzer>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn Analyzer>>) -> Result<Self, SkimError> {
        //! Create a pipeline after checking that every field a stage reads has been written by
        //! an earlier stage.
        //!
        //! # Errors
        //! Returns [`SkimError::StageOrder`] naming the first offending stage.
        let mut written: IndexSet<Field> = IndexSet::new();
        for stage in &stages {
            if let Some(field) = stage.reads().iter().find(|f| !written.contains(*f)) {
                return Err(SkimError::StageOrder {
                    stage: stage.name().to_string(),
                    field: *field,
                });
            }
            written.extend(stage.writes().iter().copied());
        }
        Ok(Self { stages })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        for stage in self.stages.iter_mut() {
            stage.configure(context)?;
            debug!("Configured stage {} for variation {}", stage.name(), context.variation.label());
        }
        Ok(())
    }

    pub fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        for stage in self.stages.iter_mut() {
            stage.process(source, record);
        }
    }

    pub fn finalize(&mut self, output: &mut VariationOutput) {
        for stage in self.stages.iter_mut() {
            stage.finalize(output);
        }
    }
}

/// Job-level results of one variation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariationOutput {
    /// Channel -> cutflow.
    pub cutflows: IndexMap<String, Cutflow>,
    /// Channel -> number of written events.
    pub selected: IndexMap<String, u64>,
    pub histograms: IndexMap<String, Histogram>,
    /// Additive counts such as the number of generated events.
    pub counters: IndexMap<String, f64>,
    /// Per-job constants such as the cross section.
    pub parameters: IndexMap<String, f64>,
}

impl VariationOutput {
    pub fn add_histogram(&mut self, histogram: impl Into<Histogram>) {
        let histogram = histogram.into();
        match self.histograms.get_mut(histogram.name()) {
            Some(existing) => existing.merge(&histogram),
            None => {
                self.histograms
                    .insert(histogram.name().to_string(), histogram);
            }
        }
    }

    pub fn add_counter(&mut self, name: &str, value: f64) {
        *self.counters.entry(name.to_string()).or_insert(0.0) += value;
    }

    pub fn set_parameter(&mut self, name: &str, value: f64) {
        self.parameters.insert(name.to_string(), value);
    }

    pub fn merge(&mut self, other: &Self) {
        for (channel, cutflow) in &other.cutflows {
            match self.cutflows.get_mut(channel) {
                Some(existing) => existing.merge(cutflow),
                None => {
                    self.cutflows.insert(channel.clone(), cutflow.clone());
                }
            }
        }
        for (channel, n) in &other.selected {
            *self.selected.entry(channel.clone()).or_insert(0) += n;
        }
        for histogram in other.histograms.values() {
            self.add_histogram(histogram.clone());
        }
        for (name, value) in &other.counters {
            self.add_counter(name, *value);
        }
        for (name, value) in &other.parameters {
            self.parameters.entry(name.clone()).or_insert(*value);
        }
    }
}

/// Results of a whole job, keyed by variation label.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobOutput {
    pub variations: IndexMap<String, VariationOutput>,
}

impl JobOutput {
    pub fn merge(&mut self, other: &Self) {
        for (label, output) in &other.variations {
            self.variations
                .entry(label.clone())
                .or_default()
                .merge(output);
        }
    }

    pub fn variation(&self, label: &str) -> Option<&VariationOutput> {
        self.variations.get(label)
    }

    pub fn cutflow(&self, variation: &str, channel: &str) -> Option<&Cutflow> {
        self.variations.get(variation)?.cutflows.get(channel)
    }

    pub fn nominal(&self) -> Option<&VariationOutput> {
        self.variation("Nominal")
    }
}

use tracing::debug;

use crate::config::era_value;
use crate::event::EventRecord;
use crate::histogram::Histogram1D;
use crate::pipeline::{Analyzer, Field, JobContext, SkimError, VariationOutput};
use crate::source::ObjectSource;

pub const N_GEN: &str = "nGen";
pub const SUM_GEN_WEIGHT: &str = "sumGenWeight";
pub const PILEUP_HISTOGRAM: &str = "puMC";

/// Per-event generator weights plus the job-level normalisation inputs.
#[derive(Debug)]
pub struct WeightStage {
    is_data: bool,
    n_gen: f64,
    sum_gen_weight: f64,
    pileup: Histogram1D,
    /// `(name, value)` pairs written at finalize.
    parameters: Vec<(&'static str, f64)>,
}

impl Default for WeightStage {
    fn default() -> Self {
        Self {
            is_data: false,
            n_gen: 0.0,
            sum_gen_weight: 0.0,
            pileup: Histogram1D::uniform(PILEUP_HISTOGRAM, 100, 0.0, 100.0),
            parameters: Vec::new(),
        }
    }
}

impl Analyzer for WeightStage {
    fn name(&self) -> &'static str {
        "Weight"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Weights]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        self.is_data = context.is_data();
        self.parameters.clear();
        if self.is_data {
            return Ok(());
        }
        let settings = context.settings;
        self.parameters.extend([
            ("xsec", settings.xsec),
            ("xsecUp", settings.xsec + settings.xsec_unc),
            ("xsecDown", settings.xsec - settings.xsec_unc),
        ]);
        // Luminosity is configured in fb^-1 and stored in pb^-1.
        if let Some(weight) = &context.config.analyzer.weight {
            let era = context.era();
            self.parameters.extend([
                ("lumi", era_value(&weight.lumi.nominal, "weight.lumi.nominal", era)? * 1e3),
                ("lumiUp", era_value(&weight.lumi.up, "weight.lumi.up", era)? * 1e3),
                ("lumiDown", era_value(&weight.lumi.down, "weight.lumi.down", era)? * 1e3),
            ]);
        }
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        if self.is_data {
            return;
        }
        let info = source.event_info();
        let weights = &mut record.output.weights;
        weights.gen_weight = info.gen_weight.unwrap_or(1.0);
        weights.n_true_int = info.n_true_int.unwrap_or(0.0);
        weights.pdf = info.pdf_weights.unwrap_or_default();
        weights.scale = info.scale_weights.unwrap_or_default();
        weights.prefire = info.prefire.unwrap_or_default();

        self.n_gen += 1.0;
        self.sum_gen_weight += weights.gen_weight;
        self.pileup.fill(weights.n_true_int, 1.0);
    }

    fn finalize(&mut self, output: &mut VariationOutput) {
        if self.is_data {
            return;
        }
        debug!("{} generated events, sum of weights {}", self.n_gen, self.sum_gen_weight);
        output.add_counter(N_GEN, self.n_gen);
        output.add_counter(SUM_GEN_WEIGHT, self.sum_gen_weight);
        output.add_histogram(self.pileup.clone());
        for (name, value) in &self.parameters {
            output.set_parameter(name, *value);
        }
    }
}

use std::ops::Range;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::calibration::CalibrationContext;
use crate::config::{JobSettings, SkimConfig};
use crate::cutflow::Cutflow;
use crate::event::EventRecord;
use crate::pipeline::{Analyzer, JobContext, JobOutput, Pipeline, SkimError, VariationOutput};
use crate::sink::{SharedSink, Sink};
use crate::source::{EventInfo, ObjectSource};
use crate::stages::standard_stages;
use crate::variation::Variation;

pub const N_PROCESSED: &str = "nProcessed";

/// One processing copy of the event stream: a variation with its own stages and the cutflows
/// of the channels it applies to.
struct VariationRun {
    variation: Variation,
    pipeline: Pipeline,
    cutflows: IndexMap<String, Cutflow>,
    selected: IndexMap<String, u64>,
}

/// Runs every configured (variation, channel) pair over a stream of events.
///
/// Each event is loaded once and then processed by every variation in turn, sharing the
/// generator-level cache but starting from a fresh record.
pub struct Skimmer {
    settings: JobSettings,
    runs: Vec<VariationRun>,
    record: EventRecord,
    n_processed: u64,
}

impl Skimmer {
    pub fn new(
        config: &SkimConfig,
        settings: &JobSettings,
        calibration: Arc<CalibrationContext>,
    ) -> Result<Self, SkimError> {
        Self::with_stages(config, settings, calibration, standard_stages)
    }

    pub fn with_stages<F>(
        config: &SkimConfig,
        settings: &JobSettings,
        calibration: Arc<CalibrationContext>,
        stages: F,
    ) -> Result<Self, SkimError>
    where
        F: Fn() -> Vec<Box<dyn Analyzer>>,
    {
        //! Build and configure one pipeline per variation. `stages` is called once per variation
        //! so that no two variations share stage state.
        //!
        //! # Errors
        //! Unknown channels, systematics, cut operators or object kinds, stage-order violations
        //! and any stage configuration failure abort construction.
        let mut runs = Vec::new();
        for (variation, channels) in Self::plan(config, settings)? {
            let mut pipeline = Pipeline::new(stages())?;
            pipeline.configure(&JobContext {
                config,
                settings,
                calibration: &calibration,
                variation: &variation,
            })?;
            let mut cutflows = IndexMap::new();
            for channel in channels {
                let channel_config = config.channel(&channel)?;
                let mut cutflow = Cutflow::new(&channel);
                for (object, selection) in &channel_config.selection {
                    cutflow.add_cut(object, &selection.operator, selection.threshold)?;
                }
                cutflow.add_trigger(
                    channel_config
                        .trigger
                        .get(&settings.era)
                        .cloned()
                        .unwrap_or_default(),
                );
                cutflows.insert(channel, cutflow);
            }
            debug!(
                "Variation {} runs channels [{}]",
                variation.label(),
                cutflows.keys().join(", ")
            );
            runs.push(VariationRun {
                variation,
                pipeline,
                selected: cutflows.keys().map(|c| (c.clone(), 0)).collect(),
                cutflows,
            });
        }
        Ok(Self {
            settings: settings.clone(),
            runs,
            record: EventRecord::new(settings.seed),
            n_processed: 0,
        })
    }

    fn plan(
        config: &SkimConfig,
        settings: &JobSettings,
    ) -> Result<IndexMap<Variation, Vec<String>>, SkimError> {
        //! Variation -> channels. The nominal copy runs every job channel; a systematic only runs
        //! the job channels it lists. Data only runs the nominal copy.
        let mut plan: IndexMap<Variation, Vec<String>> = IndexMap::new();
        plan.insert(Variation::nominal(), settings.channels.clone());
        if settings.is_data() {
            return Ok(plan);
        }
        for (name, channels) in &config.systematics {
            let channels: Vec<String> = channels
                .iter()
                .filter(|channel| settings.channels.contains(channel))
                .unique()
                .cloned()
                .collect();
            for variation in Variation::parse(name, &config.analyzer.jet.jec_syst)? {
                if variation.is_nominal() || channels.is_empty() {
                    continue;
                }
                let entry = plan.entry(variation).or_default();
                for channel in &channels {
                    if !entry.contains(channel) {
                        entry.push(channel.clone());
                    }
                }
            }
        }
        Ok(plan)
    }

    pub fn variations(&self) -> Vec<&Variation> {
        self.runs.iter().map(|run| &run.variation).collect()
    }

    fn cutflow_weight(&self, info: &EventInfo, is_data: bool) -> f64 {
        if !self.settings.weighted_cutflow || is_data {
            return 1.0;
        }
        info.gen_weight.map_or(1.0, f64::signum)
    }

    pub fn process_event(
        &mut self,
        source: &mut dyn ObjectSource,
        index: usize,
        sink: &mut dyn Sink,
    ) -> Result<(), SkimError> {
        //! Load event `index` and run it through every variation, writing the record of each
        //! channel it passes.
        source.load(index)?;
        let info = source.event_info();
        let weight = self.cutflow_weight(&info, source.is_data());
        self.record.begin_event(info.event_number);
        for run in self.runs.iter_mut() {
            self.record.begin_variation();
            run.pipeline.process(&*source, &mut self.record);
            for (channel, cutflow) in run.cutflows.iter_mut() {
                if cutflow.evaluate(&self.record.output, weight) {
                    sink.write(&run.variation, channel, &self.record.output)?;
                    *run.selected.entry(channel.clone()).or_insert(0) += 1;
                }
            }
        }
        self.n_processed += 1;
        Ok(())
    }

    pub fn run_range(
        &mut self,
        source: &mut dyn ObjectSource,
        range: Range<usize>,
        sink: &mut dyn Sink,
    ) -> Result<(), SkimError> {
        debug!("Processing events {}..{}", range.start, range.end);
        for index in range {
            self.process_event(source, index, sink)?;
        }
        Ok(())
    }

    pub fn run(&mut self, source: &mut dyn ObjectSource, sink: &mut dyn Sink) -> Result<(), SkimError> {
        //! Process every event of `source`. The sink is not finished.
        let n_events = source.n_events();
        info!("Processing {} events in {} variations", n_events, self.runs.len());
        self.run_range(source, 0..n_events, sink)
    }

    pub fn finish(mut self) -> JobOutput {
        //! Finalize every stage and collect cutflows, selected-event counts and stage outputs.
        let mut output = JobOutput::default();
        for run in self.runs.iter_mut() {
            let mut variation_output = VariationOutput::default();
            run.pipeline.finalize(&mut variation_output);
            variation_output.add_counter(N_PROCESSED, self.n_processed as f64);
            variation_output.cutflows = run.cutflows.clone();
            variation_output.selected = run.selected.clone();
            output
                .variations
                .insert(run.variation.label(), variation_output);
        }
        output
    }

    pub fn run_parallel<S, K, F>(
        build: F,
        source: &S,
        n_chunks: usize,
        sink: &SharedSink<K>,
    ) -> Result<JobOutput, SkimError>
    where
        S: ObjectSource + Clone + Send + Sync,
        K: Sink + Send,
        F: Fn() -> Result<Skimmer, SkimError> + Sync,
    {
        //! Split `source` into `n_chunks` contiguous ranges and process them in parallel, each
        //! with its own [`Skimmer`] and therefore its own record, claim set and random stream.
        //! Chunk outputs are merged and the sink is finished once every chunk succeeded.
        //!
        //! # Errors
        //! The job is configured once up front, so configuration errors surface before any event
        //! is read. The first failing chunk aborts the job without finishing the sink.
        build()?;
        let n_events = source.n_events();
        let chunk_size = n_events.div_ceil(n_chunks.max(1)).max(1);
        let starts: Vec<usize> = (0..n_events).step_by(chunk_size).collect();
        info!("Processing {} events in {} chunks", n_events, starts.len());
        let output = starts
            .into_par_iter()
            .map(|start| -> Result<JobOutput, SkimError> {
                let mut skimmer = build()?;
                let mut source = source.clone();
                let mut sink = sink.clone();
                skimmer.run_range(&mut source, start..(start + chunk_size).min(n_events), &mut sink)?;
                Ok(skimmer.finish())
            })
            .try_reduce(JobOutput::default, |mut a, b| {
                a.merge(&b);
                Ok(a)
            })?;
        sink.clone().finish()?;
        Ok(output)
    }
}

pub fn log_summary(output: &JobOutput) {
    //! Report the selected fraction of every (variation, channel) pair.
    for (label, variation) in &output.variations {
        let n_events = variation.counters.get(N_PROCESSED).copied().unwrap_or(0.0);
        for (channel, selected) in &variation.selected {
            let percent = if n_events > 0.0 {
                100.0 * *selected as f64 / n_events
            } else {
                0.0
            };
            info!(
                "{} ({}): selected {} of {} ({:.2} %)",
                channel, label, selected, n_events, percent
            );
        }
    }
}

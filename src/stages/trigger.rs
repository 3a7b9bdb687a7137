use indexmap::IndexSet;
use tracing::warn;

use crate::event::EventRecord;
use crate::pipeline::{Analyzer, Field, JobContext, SkimError};
use crate::source::ObjectSource;

/// Copies trigger and data-quality filter bits into the record.
///
/// A trigger absent from the input counts as not fired. An absent filter counts as passed and
/// is reported once.
#[derive(Debug, Default)]
pub struct TriggerStage {
    triggers: IndexSet<String>,
    filters: Vec<String>,
    missing_filters: IndexSet<String>,
}

impl Analyzer for TriggerStage {
    fn name(&self) -> &'static str {
        "Trigger"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Triggers, Field::MetFilters]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        self.triggers.clear();
        for channel in &context.settings.channels {
            if let Some(triggers) = context.config.channel(channel)?.trigger.get(context.era()) {
                self.triggers.extend(triggers.iter().cloned());
            }
        }
        self.filters = context
            .config
            .analyzer
            .met_filter
            .get(context.era())
            .cloned()
            .unwrap_or_default();
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        for trigger in &self.triggers {
            record
                .output
                .triggers
                .insert(trigger.clone(), source.flag(trigger).unwrap_or(false));
        }
        for filter in &self.filters {
            let passed = match source.flag(filter) {
                Some(passed) => passed,
                None => {
                    if self.missing_filters.insert(filter.clone()) {
                        warn!("Filter {} not found in input, treating it as passed", filter);
                    }
                    true
                }
            };
            record.output.met_filters.insert(filter.clone(), passed);
        }
    }
}

use crate::event::EventRecord;
use crate::matcher::SENTINEL;
use crate::pipeline::{Analyzer, Field, JobContext, SkimError};
use crate::source::ObjectSource;

#[derive(Debug, Default)]
pub struct MiscStage;

impl Analyzer for MiscStage {
    fn name(&self) -> &'static str {
        "Misc"
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::EventNumber, Field::NParton]
    }

    fn configure(&mut self, _context: &JobContext) -> Result<(), SkimError> {
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        let info = source.event_info();
        record.output.event_number = info.event_number;
        record.output.n_parton = info.n_parton.unwrap_or(SENTINEL);
    }
}

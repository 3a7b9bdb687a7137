use tracing::warn;

use crate::event::EventRecord;
use crate::matcher::match_all;
use crate::pipeline::{Analyzer, Field, JobContext, SkimError};
use crate::source::ObjectSource;

/// Associates selected leptons and jets with generator particles.
///
/// Electrons are matched first, then muons, jets and sub-jets, all drawing from one claim set
/// so that no generator particle is used twice in an event.
#[derive(Debug, Default)]
pub struct TruthStage {
    is_data: bool,
    warned: bool,
}

impl Analyzer for TruthStage {
    fn name(&self) -> &'static str {
        "TruthMatch"
    }

    fn reads(&self) -> &'static [Field] {
        &[Field::Electrons, Field::Muons, Field::Jets, Field::SubJets]
    }

    fn writes(&self) -> &'static [Field] {
        &[Field::Truth]
    }

    fn configure(&mut self, context: &JobContext) -> Result<(), SkimError> {
        self.is_data = context.is_data();
        Ok(())
    }

    fn process(&mut self, source: &dyn ObjectSource, record: &mut EventRecord) {
        if self.is_data {
            return;
        }
        let gen = record.cache.gen_particles(source);
        if gen.is_empty() && !self.warned {
            warn!(
                "Simulated event {} has no generator particles, objects stay unmatched",
                record.output.event_number
            );
            self.warned = true;
        }
        let output = &mut record.output;
        let claims = &mut record.claims;
        match_all(output.electrons.as_mut_slice(), gen, claims);
        match_all(output.muons.as_mut_slice(), gen, claims);
        match_all(output.jets.as_mut_slice(), gen, claims);
        match_all(output.sub_jets.as_mut_slice(), gen, claims);
    }
}

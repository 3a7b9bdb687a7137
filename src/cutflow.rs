use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::config::ConfigError;
use crate::event::OutputRecord;
use crate::histogram::LabelledHistogram;

pub const NO_CUTS: &str = "No cuts";
pub const TRIGGER: &str = "Trigger";
pub const MET_FILTER: &str = "MET Filter";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Equal,
    AtLeast,
    AtMost,
}

impl CompareOp {
    pub fn apply(&self, value: i64, threshold: i64) -> bool {
        match self {
            CompareOp::Equal => value == threshold,
            CompareOp::AtLeast => value >= threshold,
            CompareOp::AtMost => value <= threshold,
        }
    }
}

impl FromStr for CompareOp {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(CompareOp::Equal),
            ">=" => Ok(CompareOp::AtLeast),
            "<=" => Ok(CompareOp::AtMost),
            _ => Err(ConfigError::UnknownOperator {
                operator: s.to_string(),
            }),
        }
    }
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompareOp::Equal => write!(f, "=="),
            CompareOp::AtLeast => write!(f, ">="),
            CompareOp::AtMost => write!(f, "<="),
        }
    }
}

/// Object kinds a count cut can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountedObject {
    Electron,
    Muon,
    /// Electrons and muons together.
    Lepton,
    Jet,
    SubJet,
    FatJet,
    IsoTrack,
}

impl CountedObject {
    fn symbol(&self) -> &'static str {
        match self {
            CountedObject::Electron => "e",
            CountedObject::Muon => "#mu",
            CountedObject::Lepton => "l",
            CountedObject::Jet => "j",
            CountedObject::SubJet => "sj",
            CountedObject::FatJet => "fj",
            CountedObject::IsoTrack => "trk",
        }
    }

    fn suffix(&self) -> &'static str {
        match self {
            CountedObject::Electron | CountedObject::Muon | CountedObject::Lepton => " (No ID.)",
            CountedObject::Jet => " (Not clean)",
            _ => "",
        }
    }
}

impl FromStr for CountedObject {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Electron" => Ok(CountedObject::Electron),
            "Muon" => Ok(CountedObject::Muon),
            "Lepton" => Ok(CountedObject::Lepton),
            "Jet" => Ok(CountedObject::Jet),
            "SubJet" => Ok(CountedObject::SubJet),
            "FatJet" => Ok(CountedObject::FatJet),
            "IsoTrack" => Ok(CountedObject::IsoTrack),
            _ => Err(ConfigError::UnknownObject {
                name: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Cut {
    Count {
        object: CountedObject,
        op: CompareOp,
        threshold: i64,
    },
    /// Passes if any of the named triggers fired.
    Trigger(Vec<String>),
    /// Passes if every MET filter passed.
    Filters,
}

impl Cut {
    pub fn label(&self) -> String {
        match self {
            Cut::Count {
                object,
                op,
                threshold,
            } => format!("N_{{{}}} {}{}{}", object.symbol(), op, threshold, object.suffix()),
            Cut::Trigger(_) => TRIGGER.to_string(),
            Cut::Filters => MET_FILTER.to_string(),
        }
    }

    pub fn passes(&self, record: &OutputRecord) -> bool {
        match self {
            Cut::Count {
                object,
                op,
                threshold,
            } => op.apply(record.count(*object) as i64, *threshold),
            Cut::Trigger(names) => names
                .iter()
                .any(|name| record.triggers.get(name).copied().unwrap_or(false)),
            Cut::Filters => record.met_filters.values().all(|passed| *passed),
        }
    }
}

/// Ordered selection of one channel with its cumulative survival histogram.
///
/// A cut's bin is only filled when every earlier cut passed, so with non-negative weights
/// the bins never increase along the chain. Negative weights can break that ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cutflow {
    channel: String,
    cuts: Vec<Cut>,
    histogram: LabelledHistogram,
    alive: bool,
}

impl Cutflow {
    pub fn new(channel: &str) -> Self {
        let mut histogram = LabelledHistogram::new(&format!("Cutflow_{channel}"));
        histogram.register(NO_CUTS);
        Self {
            channel: channel.to_string(),
            cuts: Vec::new(),
            histogram,
            alive: true,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn name(&self) -> &str {
        &self.histogram.name
    }

    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    pub fn histogram(&self) -> &LabelledHistogram {
        &self.histogram
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn add_cut(&mut self, object: &str, op: &str, threshold: i64) -> Result<(), ConfigError> {
        //! Append an object-count cut.
        //!
        //! # Errors
        //! Unknown operators and object kinds are configuration errors.
        let cut = Cut::Count {
            object: object.parse()?,
            op: op.parse()?,
            threshold,
        };
        self.histogram.register(&cut.label());
        self.cuts.push(cut);
        Ok(())
    }

    pub fn add_trigger(&mut self, triggers: Vec<String>) {
        //! Put the trigger requirement in front of every other cut. A channel without
        //! triggers gets the MET filter requirement there instead.
        let cut = if triggers.is_empty() {
            Cut::Filters
        } else {
            Cut::Trigger(triggers)
        };
        self.histogram.insert_at(1, &cut.label());
        self.cuts.insert(0, cut);
    }

    pub fn count(&mut self, weight: f64) {
        self.alive = true;
        self.histogram.fill(NO_CUTS, weight);
    }

    pub fn fill(&mut self, record: &OutputRecord, weight: f64) {
        //! Fill the bins of the longest passing prefix of the cut chain.
        for cut in &self.cuts {
            if !cut.passes(record) {
                return;
            }
            self.histogram.fill(&cut.label(), weight);
        }
    }

    pub fn passed(&mut self, record: &OutputRecord) -> bool {
        self.alive = self.cuts.iter().all(|cut| cut.passes(record));
        self.alive
    }

    pub fn evaluate(&mut self, record: &OutputRecord, weight: f64) -> bool {
        //! Count the event, fill the survival bins and return whether it passes every cut.
        self.count(weight);
        self.fill(record, weight);
        let passed = self.passed(record);
        trace!("{}: event {} passed = {}", self.name(), record.event_number, passed);
        passed
    }

    pub fn merge(&mut self, other: &Self) {
        self.histogram.merge(&other.histogram);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_follow_cut_kind() {
        let cut = Cut::Count {
            object: CountedObject::Electron,
            op: CompareOp::AtLeast,
            threshold: 2,
        };
        assert_eq!(cut.label(), "N_{e} >=2 (No ID.)");
        assert_eq!(Cut::Filters.label(), "MET Filter");
    }

    #[test]
    fn trigger_lands_after_baseline_bin() {
        let mut cutflow = Cutflow::new("MuonIncl");
        cutflow.add_cut("Muon", ">=", 1).unwrap();
        cutflow.add_trigger(vec!["HLT_IsoMu27".to_string()]);
        let labels: Vec<&String> = cutflow.histogram().bins.keys().collect();
        assert_eq!(labels, vec!["No cuts", "Trigger", "N_{#mu} >=1 (No ID.)"]);
        assert_eq!(cutflow.name(), "Cutflow_MuonIncl");
    }
}

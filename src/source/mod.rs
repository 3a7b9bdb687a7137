use std::path::PathBuf;

use thiserror::Error;

use crate::event::ScaleFactor;
use crate::object::{Collection, PhysicsObject};

mod buffer;
mod nano;

pub use buffer::{EventBuffer, SyntheticEvent};
pub use nano::{Column, NanoSource};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("ROOT error: {reason}")]
    Root { reason: String },
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("Unsupported input file {path:?}, expected .root or .parquet")]
    UnsupportedFormat { path: PathBuf },
    #[error("Missing required column {name:?}")]
    MissingColumn { name: String },
    #[error("Column {name:?} has {found} entries, expected {expected}")]
    LengthMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Event {index} is out of range for a source with {n_events} events")]
    OutOfRange { index: usize, n_events: usize },
}

/// Event-level quantities that are not part of an object collection.
///
/// Anything only present in simulation is optional.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventInfo {
    pub event_number: u64,
    pub rho: f64,
    pub met_pt: f64,
    pub met_phi: f64,
    /// Unclustered-energy shift of the missing momentum, `(dx, dy)`.
    pub met_unclustered_delta: Option<(f64, f64)>,
    pub gen_weight: Option<f64>,
    pub n_true_int: Option<f64>,
    pub pdf_weights: Option<Vec<f64>>,
    pub scale_weights: Option<Vec<f64>>,
    pub prefire: Option<ScaleFactor>,
    pub n_parton: Option<i32>,
}

/// Random access to the collections of the current event.
///
/// Stages only see events through this trait, so every input format is an independent
/// implementation.
pub trait ObjectSource {
    fn n_events(&self) -> usize;

    /// Make event `index` current. Called exactly once per event.
    fn load(&mut self, index: usize) -> Result<(), SourceError>;

    fn collection_size(&self, collection: Collection) -> usize;

    /// Object `index` of `collection` in the current event, `None` past the end or when the
    /// collection is not present in the input.
    fn get(&self, collection: Collection, index: usize) -> Option<PhysicsObject>;

    fn event_info(&self) -> EventInfo;

    /// A trigger or filter bit, `None` if the input does not carry it.
    fn flag(&self, name: &str) -> Option<bool>;

    fn is_data(&self) -> bool;
}

pub fn collect_objects<T>(source: &dyn ObjectSource, collection: Collection) -> Vec<T>
where
    T: TryFrom<PhysicsObject>,
{
    //! Every object of `collection` in the current event that converts to `T`.
    (0..source.collection_size(collection))
        .filter_map(|i| source.get(collection, i))
        .filter_map(|object| T::try_from(object).ok())
        .collect()
}

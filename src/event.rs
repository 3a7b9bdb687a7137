use indexmap::IndexMap;
use nalgebra::Vector2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Serialize, Serializer};

use crate::cutflow::CountedObject;
use crate::matcher::{ClaimSet, MatchCriteria, TruthInfo, TruthMatchable};
use crate::object::{Collection, Electron, GenJet, GenParticle, Kinematics, Muon};
use crate::source::{collect_objects, ObjectSource};

pub const ELECTRON_CAPACITY: usize = 10;
pub const MUON_CAPACITY: usize = 10;
pub const JET_CAPACITY: usize = 20;
pub const SUBJET_CAPACITY: usize = 20;
pub const FAT_JET_CAPACITY: usize = 5;
pub const ISOTRACK_CAPACITY: usize = 20;

/// A vector that silently refuses elements beyond a fixed capacity.
///
/// Elements are kept in insertion order, so an overflowing collection retains exactly its
/// first `capacity` entries.
#[derive(Debug, Clone, PartialEq)]
pub struct CappedVec<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> CappedVec<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) -> bool {
        //! Append `item`, returning `false` if the vector is already full.
        if self.is_full() {
            return false;
        }
        self.items.push(item);
        true
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T> std::ops::Index<usize> for CappedVec<T> {
    type Output = T;
    fn index(&self, index: usize) -> &Self::Output {
        &self.items[index]
    }
}

impl<T: Serialize> Serialize for CappedVec<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.items.serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleFactor {
    pub nominal: f64,
    pub up: f64,
    pub down: f64,
}

impl ScaleFactor {
    pub fn new(nominal: f64, up: f64, down: f64) -> Self {
        Self { nominal, up, down }
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedElectron {
    pub source: Electron,
    /// Kinematics in the current variation.
    pub kinematics: Kinematics,
    pub truth: TruthInfo,
    pub scale_factors: IndexMap<String, ScaleFactor>,
}

impl SelectedElectron {
    pub fn new(source: Electron, kinematics: Kinematics) -> Self {
        Self {
            source,
            kinematics,
            truth: TruthInfo::default(),
            scale_factors: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedMuon {
    pub source: Muon,
    pub kinematics: Kinematics,
    pub truth: TruthInfo,
    pub scale_factors: IndexMap<String, ScaleFactor>,
}

impl SelectedMuon {
    pub fn new(source: Muon) -> Self {
        Self {
            kinematics: source.kinematics,
            source,
            truth: TruthInfo::default(),
            scale_factors: IndexMap::new(),
        }
    }
}

/// A calibrated small-radius jet, or a sub-jet of an accepted large-radius jet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedJet {
    pub kinematics: Kinematics,
    pub area: f64,
    pub jec: f64,
    pub smear: f64,
    pub deep_jet: f64,
    pub deep_csv: f64,
    /// Number of passed working points (loose, medium, tight).
    pub deep_jet_id: u8,
    pub deep_csv_id: u8,
    pub parton_flavour: i32,
    pub jet_id: i32,
    pub pu_id: i32,
    /// Index of the large-radius jet this sub-jet lies in.
    pub fat_jet_index: Option<usize>,
    pub truth: TruthInfo,
    /// `<tagger>_<wp>` -> scale factor.
    pub btag_sf: IndexMap<String, ScaleFactor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedFatJet {
    pub kinematics: Kinematics,
    pub jec: f64,
    pub smear: f64,
    pub tau1: f64,
    pub tau2: f64,
    pub tau3: f64,
    pub deep_ak8_class: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedTrack {
    pub kinematics: Kinematics,
    pub charge: i32,
    pub pdg_id: i32,
    pub dxy: f64,
    pub dz: f64,
    pub iso03: f64,
    pub mini_iso: f64,
}

impl TruthMatchable for SelectedElectron {
    const CRITERIA: MatchCriteria = MatchCriteria::ELECTRON;
    fn match_kinematics(&self) -> Kinematics {
        self.kinematics
    }
    fn truth_mut(&mut self) -> &mut TruthInfo {
        &mut self.truth
    }
}

impl TruthMatchable for SelectedMuon {
    const CRITERIA: MatchCriteria = MatchCriteria::MUON;
    fn match_kinematics(&self) -> Kinematics {
        self.kinematics
    }
    fn truth_mut(&mut self) -> &mut TruthInfo {
        &mut self.truth
    }
}

impl TruthMatchable for SelectedJet {
    const CRITERIA: MatchCriteria = MatchCriteria::JET;
    fn match_kinematics(&self) -> Kinematics {
        self.kinematics
    }
    fn truth_mut(&mut self) -> &mut TruthInfo {
        &mut self.truth
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventWeights {
    pub gen_weight: f64,
    pub n_true_int: f64,
    pub pdf: Vec<f64>,
    pub scale: Vec<f64>,
    pub prefire: ScaleFactor,
}

impl Default for EventWeights {
    fn default() -> Self {
        Self {
            gen_weight: 1.0,
            n_true_int: 0.0,
            pdf: Vec::new(),
            scale: Vec::new(),
            prefire: ScaleFactor::default(),
        }
    }
}

/// Missing transverse momentum with its unclustered-energy variations.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MissingEnergy {
    pub pt: f64,
    pub phi: f64,
    pub pt_unclustered_up: f64,
    pub phi_unclustered_up: f64,
    pub pt_unclustered_down: f64,
    pub phi_unclustered_down: f64,
}

impl MissingEnergy {
    pub fn from_vectors(nominal: Vector2<f64>, up: Vector2<f64>, down: Vector2<f64>) -> Self {
        Self {
            pt: nominal.norm(),
            phi: nominal.y.atan2(nominal.x),
            pt_unclustered_up: up.norm(),
            phi_unclustered_up: up.y.atan2(up.x),
            pt_unclustered_down: down.norm(),
            phi_unclustered_down: down.y.atan2(down.x),
        }
    }
}

/// Everything the stages derive for one event in one variation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputRecord {
    pub event_number: u64,
    pub n_parton: i32,
    pub triggers: IndexMap<String, bool>,
    pub met_filters: IndexMap<String, bool>,
    pub weights: EventWeights,
    pub electrons: CappedVec<SelectedElectron>,
    pub muons: CappedVec<SelectedMuon>,
    pub jets: CappedVec<SelectedJet>,
    pub sub_jets: CappedVec<SelectedJet>,
    pub fat_jets: CappedVec<SelectedFatJet>,
    pub iso_tracks: CappedVec<SelectedTrack>,
    pub met: MissingEnergy,
}

impl Default for OutputRecord {
    fn default() -> Self {
        Self {
            event_number: 0,
            n_parton: crate::matcher::SENTINEL,
            triggers: IndexMap::new(),
            met_filters: IndexMap::new(),
            weights: EventWeights::default(),
            electrons: CappedVec::new(ELECTRON_CAPACITY),
            muons: CappedVec::new(MUON_CAPACITY),
            jets: CappedVec::new(JET_CAPACITY),
            sub_jets: CappedVec::new(SUBJET_CAPACITY),
            fat_jets: CappedVec::new(FAT_JET_CAPACITY),
            iso_tracks: CappedVec::new(ISOTRACK_CAPACITY),
            met: MissingEnergy::default(),
        }
    }
}

impl OutputRecord {
    pub fn count(&self, object: CountedObject) -> usize {
        match object {
            CountedObject::Electron => self.electrons.len(),
            CountedObject::Muon => self.muons.len(),
            CountedObject::Lepton => self.electrons.len() + self.muons.len(),
            CountedObject::Jet => self.jets.len(),
            CountedObject::SubJet => self.sub_jets.len(),
            CountedObject::FatJet => self.fat_jets.len(),
            CountedObject::IsoTrack => self.iso_tracks.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct Cached<T> {
    epoch: Option<u64>,
    value: Vec<T>,
}

impl<T> Default for Cached<T> {
    fn default() -> Self {
        Self {
            epoch: None,
            value: Vec::new(),
        }
    }
}

impl<T> Cached<T> {
    fn get_or_load(&mut self, epoch: u64, load: impl FnOnce() -> Vec<T>) -> &[T] {
        if self.epoch != Some(epoch) {
            self.value = load();
            self.epoch = Some(epoch);
        }
        &self.value
    }
}

/// Generator-level collections read at most once per event.
///
/// Every entry remembers the epoch it was loaded in and is reloaded lazily once the event
/// epoch moves on, so all variations of an event share one read.
#[derive(Debug, Clone, Default)]
pub struct EventCache {
    epoch: u64,
    gen_particles: Cached<GenParticle>,
    gen_jets: Cached<GenJet>,
    gen_fat_jets: Cached<GenJet>,
}

impl EventCache {
    pub fn advance(&mut self) {
        self.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn gen_particles(&mut self, source: &dyn ObjectSource) -> &[GenParticle] {
        self.gen_particles
            .get_or_load(self.epoch, || collect_objects(source, Collection::GenParticle))
    }

    pub fn gen_jets(&mut self, source: &dyn ObjectSource) -> &[GenJet] {
        self.gen_jets
            .get_or_load(self.epoch, || collect_objects(source, Collection::GenJet))
    }

    pub fn gen_fat_jets(&mut self, source: &dyn ObjectSource) -> &[GenJet] {
        self.gen_fat_jets
            .get_or_load(self.epoch, || collect_objects(source, Collection::GenFatJet))
    }
}

/// Mutable per-event state shared by the stages of one pipeline.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub output: OutputRecord,
    pub cache: EventCache,
    pub claims: ClaimSet,
    pub rng: ChaCha8Rng,
    event_number: u64,
}

impl EventRecord {
    pub fn new(seed: u64) -> Self {
        Self {
            output: OutputRecord::default(),
            cache: EventCache::default(),
            claims: ClaimSet::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            event_number: 0,
        }
    }

    pub fn begin_event(&mut self, event_number: u64) {
        //! Move to a new event, invalidating every cached generator collection.
        self.cache.advance();
        self.event_number = event_number;
    }

    pub fn begin_variation(&mut self) {
        //! Reset the derived record, the claim set and the random stream for another pass over
        //! the current event. The stream is selected by event number, so every variation of an
        //! event sees the same draws.
        self.output = OutputRecord::default();
        self.output.event_number = self.event_number;
        self.claims.clear();
        self.rng.set_stream(self.event_number);
        self.rng.set_word_pos(0);
    }

    pub fn event_number(&self) -> u64 {
        self.event_number
    }
}

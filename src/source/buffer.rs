use std::sync::Arc;

use indexmap::IndexMap;

use super::{EventInfo, ObjectSource, SourceError};
use crate::object::{Collection, GenJet, PhysicsObject};

/// One event held in memory.
#[derive(Debug, Clone, Default)]
pub struct SyntheticEvent {
    pub info: EventInfo,
    pub objects: IndexMap<Collection, Vec<PhysicsObject>>,
    pub flags: IndexMap<String, bool>,
}

impl SyntheticEvent {
    pub fn new(event_number: u64) -> Self {
        Self {
            info: EventInfo {
                event_number,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn with(mut self, object: impl Into<PhysicsObject>) -> Self {
        //! Append an object to the collection its type belongs to. Generator jets go to the
        //! small-radius collection; use [`SyntheticEvent::with_gen_fat_jet`] for the other.
        let object = object.into();
        let collection = match &object {
            PhysicsObject::Electron(_) => Collection::Electron,
            PhysicsObject::Muon(_) => Collection::Muon,
            PhysicsObject::Jet(_) => Collection::Jet,
            PhysicsObject::FatJet(_) => Collection::FatJet,
            PhysicsObject::IsoTrack(_) => Collection::IsoTrack,
            PhysicsObject::GenParticle(_) => Collection::GenParticle,
            PhysicsObject::GenJet(_) => Collection::GenJet,
        };
        self.objects.entry(collection).or_default().push(object);
        self
    }

    pub fn with_gen_fat_jet(mut self, gen_jet: GenJet) -> Self {
        self.objects
            .entry(Collection::GenFatJet)
            .or_default()
            .push(gen_jet.into());
        self
    }

    pub fn with_flag(mut self, name: &str, value: bool) -> Self {
        self.flags.insert(name.to_string(), value);
        self
    }

    pub fn with_info(mut self, edit: impl FnOnce(&mut EventInfo)) -> Self {
        edit(&mut self.info);
        self
    }
}

/// An [`ObjectSource`] over events already in memory.
///
/// Cloning shares the underlying events, so chunks of a parallel run are cheap.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    events: Arc<Vec<SyntheticEvent>>,
    current: usize,
    is_data: bool,
}

impl EventBuffer {
    pub fn new(events: Vec<SyntheticEvent>, is_data: bool) -> Self {
        Self {
            events: Arc::new(events),
            current: 0,
            is_data,
        }
    }

    fn event(&self) -> Option<&SyntheticEvent> {
        self.events.get(self.current)
    }
}

impl ObjectSource for EventBuffer {
    fn n_events(&self) -> usize {
        self.events.len()
    }

    fn load(&mut self, index: usize) -> Result<(), SourceError> {
        if index >= self.events.len() {
            return Err(SourceError::OutOfRange {
                index,
                n_events: self.events.len(),
            });
        }
        self.current = index;
        Ok(())
    }

    fn collection_size(&self, collection: Collection) -> usize {
        self.event()
            .and_then(|event| event.objects.get(&collection))
            .map_or(0, Vec::len)
    }

    fn get(&self, collection: Collection, index: usize) -> Option<PhysicsObject> {
        self.event()?.objects.get(&collection)?.get(index).cloned()
    }

    fn event_info(&self) -> EventInfo {
        self.event().map(|event| event.info.clone()).unwrap_or_default()
    }

    fn flag(&self, name: &str) -> Option<bool> {
        self.event()?.flags.get(name).copied()
    }

    fn is_data(&self) -> bool {
        self.is_data
    }
}

use std::collections::HashMap;

use parking_lot::Mutex;
use swf::CharacterId;
use tracing::{trace, warn};

use crate::character::Resource;

/// Character id → resource, filled in by the loader as definition tags are
/// parsed and read concurrently by consumers.
///
/// Lookups of ids the loader has not reached yet simply return `None`; the
/// format allows forward references.
#[derive(Default)]
pub struct ResourceDictionary {
    characters: Mutex<HashMap<CharacterId, Resource>>,
}

impl ResourceDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `id` to `resource`. A second definition of the same id is
    /// malformed input: it is logged and the first binding is kept.
    pub fn define(&self, id: CharacterId, resource: Resource) -> bool {
        let mut characters = self.characters.lock();
        if characters.contains_key(&id) {
            drop(characters);
            warn!("Character {} already defined, ignoring redefinition", id);
            return false;
        }
        characters.insert(id, resource);
        true
    }

    pub fn lookup(&self, id: CharacterId) -> Option<Resource> {
        let character = self.characters.lock().get(&id).cloned();
        if character.is_none() {
            trace!("Could not find character {}", id);
        }
        character
    }

    pub fn contains(&self, id: CharacterId) -> bool {
        self.characters.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.characters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted ids of every defined character.
    pub fn ids(&self) -> Vec<CharacterId> {
        let mut ids: Vec<_> = self.characters.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Calls `f` for every live resource, e.g. to mark it reachable.
    ///
    /// The callback runs on a snapshot, outside the dictionary lock.
    pub fn for_each_resource(&self, mut f: impl FnMut(CharacterId, &Resource)) {
        let snapshot: Vec<_> = self
            .characters
            .lock()
            .iter()
            .map(|(id, resource)| (*id, resource.clone()))
            .collect();
        for (id, resource) in &snapshot {
            f(*id, resource);
        }
    }
}

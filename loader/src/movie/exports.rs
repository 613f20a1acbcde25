use indexmap::IndexMap;
use parking_lot::Mutex;
use swf::CharacterId;
use tracing::debug;

use crate::{character::Resource, config::NameMatching};

/// One exported symbol.
#[derive(Debug, Clone)]
pub struct ExportEntry {
    /// The name as spelled by the most recent export.
    pub name: String,
    pub id: CharacterId,
    pub resource: Resource,
}

/// Symbol name → resource for sharing with other streams.
///
/// Names can be exported again at any point during the load; the latest
/// export wins.
pub struct ExportTable {
    matching: NameMatching,
    exports: Mutex<IndexMap<String, ExportEntry>>,
}

impl ExportTable {
    pub fn new(matching: NameMatching) -> Self {
        Self {
            matching,
            exports: Mutex::new(IndexMap::new()),
        }
    }

    fn key(&self, name: &str) -> String {
        match self.matching {
            NameMatching::CaseInsensitive => name.to_lowercase(),
            NameMatching::Exact => name.to_owned(),
        }
    }

    pub fn export(&self, name: &str, id: CharacterId, resource: Resource) {
        let key = self.key(name);
        debug!("registering export {} (character {})", name, id);
        self.exports.lock().insert(
            key,
            ExportEntry {
                name: name.to_owned(),
                id,
                resource,
            },
        );
    }

    pub fn lookup(&self, name: &str) -> Option<Resource> {
        let key = self.key(name);
        self.exports
            .lock()
            .get(&key)
            .map(|entry| entry.resource.clone())
    }

    /// Character id the name currently refers to in the exporting stream.
    pub fn export_id(&self, name: &str) -> Option<CharacterId> {
        let key = self.key(name);
        self.exports.lock().get(&key).map(|entry| entry.id)
    }

    pub fn len(&self) -> usize {
        self.exports.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Exported names in first-export order.
    pub fn names(&self) -> Vec<String> {
        self.exports
            .lock()
            .values()
            .map(|entry| entry.name.clone())
            .collect()
    }

    /// Calls `f` for every export outside the table lock.
    pub fn for_each_export(&self, mut f: impl FnMut(&ExportEntry)) {
        let snapshot: Vec<_> = self.exports.lock().values().cloned().collect();
        snapshot.iter().for_each(|entry| f(entry));
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::character::{BinaryDataDefinition, Character};

    fn binary(id: CharacterId) -> Resource {
        Arc::new(Character::BinaryData(BinaryDataDefinition {
            id,
            data: Vec::new(),
        }))
    }

    #[test]
    fn last_export_wins() {
        let exports = ExportTable::new(NameMatching::CaseInsensitive);
        exports.export("hero", 1, binary(1));
        exports.export("hero", 2, binary(2));

        assert_eq!(exports.export_id("hero"), Some(2));
        assert_eq!(exports.lookup("hero").map(|resource| resource.id()), Some(2));
        assert_eq!(exports.len(), 1);
    }

    #[test]
    fn case_insensitive_lookup() {
        let exports = ExportTable::new(NameMatching::CaseInsensitive);
        exports.export("Hero", 7, binary(7));

        assert_eq!(exports.export_id("HERO"), Some(7));
        assert_eq!(exports.names(), vec![String::from("Hero")]);
    }

    #[test]
    fn exact_lookup() {
        let exports = ExportTable::new(NameMatching::Exact);
        exports.export("Hero", 7, binary(7));

        assert!(exports.lookup("hero").is_none());
        assert!(exports.lookup("Hero").is_some());
    }

    #[test]
    fn enumerates_in_export_order() {
        let exports = ExportTable::new(NameMatching::Exact);
        exports.export("b", 2, binary(2));
        exports.export("a", 1, binary(1));

        let mut ids = Vec::new();
        exports.for_each_export(|entry| ids.push(entry.id));
        assert_eq!(ids, vec![2, 1]);
    }
}

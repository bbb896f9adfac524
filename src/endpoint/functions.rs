/*!
 * Function Tables
 * Local and remote function registries keyed by name and by id
 */

use super::args::LocalFn;
use crate::core::types::FunctionId;
use crate::protocol::FunctionDescriptor;
use ahash::AHashMap;

/// Function registered on this endpoint
pub(crate) struct LocalFunction {
    pub descriptor: FunctionDescriptor,
    pub func: LocalFn,
}

/// Entries retrievable by id, with the latest registration winning a name
pub(crate) struct FunctionTable<T> {
    by_name: AHashMap<String, FunctionId>,
    by_id: AHashMap<FunctionId, T>,
}

impl<T> FunctionTable<T> {
    pub fn new() -> Self {
        Self {
            by_name: AHashMap::new(),
            by_id: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, id: FunctionId, name: &str, entry: T) {
        self.by_name.insert(name.to_string(), id);
        self.by_id.insert(id, entry);
    }

    pub fn get(&self, id: FunctionId) -> Option<&T> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&T> {
        self.by_name.get(name).and_then(|id| self.by_id.get(id))
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.by_id.values()
    }
}

impl FunctionTable<FunctionDescriptor> {
    /// Descriptors sorted by id
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        let mut all: Vec<_> = self.values().cloned().collect();
        all.sort_by_key(|d| d.id);
        all
    }
}

impl FunctionTable<LocalFunction> {
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        let mut all: Vec<_> = self.values().map(|f| f.descriptor.clone()).collect();
        all.sort_by_key(|d| d.id);
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Params;

    fn descriptor(id: FunctionId, name: &str) -> FunctionDescriptor {
        FunctionDescriptor {
            id,
            name: name.to_string(),
            params: Params::Any,
            ret: None,
        }
    }

    #[test]
    fn test_latest_registration_wins_name() {
        let mut table = FunctionTable::new();
        table.insert(0, "inc", descriptor(0, "inc"));
        table.insert(1, "inc", descriptor(1, "inc"));

        assert_eq!(table.by_name("inc").map(|d| d.id), Some(1));
        assert_eq!(table.get(0).map(|d| d.id), Some(0));
        assert!(table.contains_name("inc"));
        assert_eq!(table.descriptors().len(), 2);
    }
}

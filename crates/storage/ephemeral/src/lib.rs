//! In-memory `RecordStore`, the default for tests and short-lived embeds.
//! Same revisioning contract as the durable stores, no persistence.

use std::collections::HashMap;

use casebook_core::{CaseRecord, RecordStore, StoreError};
use parking_lot::RwLock;
use uuid::Uuid;

pub struct EphemeralStore {
    map: RwLock<HashMap<String, CaseRecord>>,
}

impl EphemeralStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

impl Default for EphemeralStore {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

fn new_record_id() -> String {
    format!("rec_{}", Uuid::new_v4().simple())
}

/// Ordering key for `all()`: records without a name sort ahead of named
/// ones, named ones alphabetically.
pub fn name_order_key(record: &CaseRecord) -> (bool, String) {
    let name = record.field("name").unwrap_or_default().trim().to_string();
    (!name.is_empty(), name)
}

impl RecordStore for EphemeralStore {
    fn save(&self, record: &CaseRecord) -> Result<CaseRecord, StoreError> {
        let mut map = self.map.write();
        let mut saved = record.clone();
        match &record.id {
            Some(id) => {
                let current = map
                    .get(id)
                    .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                if current.rev != record.rev {
                    return Err(StoreError::Conflict {
                        id: id.clone(),
                        attempted: record.rev,
                        current: current.rev,
                    });
                }
                saved.rev = record.rev + 1;
                map.insert(id.clone(), saved.clone());
            }
            None => {
                let id = new_record_id();
                saved.id = Some(id.clone());
                saved.rev = 1;
                map.insert(id, saved.clone());
            }
        }
        Ok(saved)
    }

    fn get(&self, id: &str) -> Result<Option<CaseRecord>, StoreError> {
        Ok(self.map.read().get(id).cloned())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        if self.map.write().remove(id).is_some() {
            Ok(())
        } else {
            Err(StoreError::NotFound(id.to_string()))
        }
    }

    fn all(&self) -> Result<Vec<CaseRecord>, StoreError> {
        let mut records: Vec<CaseRecord> = self.map.read().values().cloned().collect();
        records.sort_by_key(name_order_key);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> CaseRecord {
        let mut record = CaseRecord::new();
        if !name.is_empty() {
            record.set_field("name", name);
        }
        record
    }

    #[test]
    fn save_assigns_id_and_first_revision() {
        let store = EphemeralStore::new();
        let saved = store.save(&named("Bob")).unwrap();
        let id = saved.id.as_deref().unwrap();
        assert!(id.starts_with("rec_"));
        assert_eq!(saved.rev, 1);
        assert_eq!(store.get(id).unwrap().unwrap().field("name"), Some("Bob"));
    }

    #[test]
    fn resave_bumps_revision() {
        let store = EphemeralStore::new();
        let mut saved = store.save(&named("Bob")).unwrap();
        saved.set_field("name", "Robert");
        let again = store.save(&saved).unwrap();
        assert_eq!(again.rev, 2);
    }

    #[test]
    fn stale_revision_conflicts() {
        let store = EphemeralStore::new();
        let saved = store.save(&named("Bob")).unwrap();
        let stale = saved.clone();
        store.save(&saved).unwrap();
        let err = store.save(&stale).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn save_with_unknown_id_is_not_found() {
        let store = EphemeralStore::new();
        let mut record = named("Bob");
        record.id = Some("rec_missing".to_string());
        assert!(matches!(
            store.save(&record).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn delete_removes_the_record() {
        let store = EphemeralStore::new();
        let saved = store.save(&named("Bob")).unwrap();
        let id = saved.id.unwrap();
        store.delete(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
        assert!(matches!(
            store.delete(&id).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn all_orders_by_name_blanks_first() {
        let store = EphemeralStore::new();
        store.save(&named("Zelda")).unwrap();
        store.save(&named("")).unwrap();
        store.save(&named("Alice")).unwrap();
        let names: Vec<Option<String>> = store
            .all()
            .unwrap()
            .into_iter()
            .map(|r| r.field("name").map(str::to_string))
            .collect();
        assert_eq!(
            names,
            [None, Some("Alice".to_string()), Some("Zelda".to_string())]
        );
    }
}

//! File-backed `RecordStore`.
//!
//! Layout under the root:
//!   records/<id>.json   one file per record, written atomically
//!   meta/MANIFEST.json  id index plus a most-recently-saved list
//!   meta/LOCK           exclusive file lock guarding save/delete
//!
//! Revision checks and manifest reads happen against the on-disk copy (the
//! latter re-read per call, never cached), so two processes sharing a root
//! see each other's records and get the same conflict semantics as two
//! threads.

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use casebook_core::{CaseRecord, RecordStore, StoreError};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

const RECENT_CAP: usize = 1024;

#[derive(Default, Serialize, Deserialize, Clone)]
struct Manifest {
    /// id -> relative path under the root
    ids: HashMap<String, String>,
    /// most-recent save at the front
    recent: VecDeque<String>,
}

pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("records")).map_err(io_err)?;
        fs::create_dir_all(root.join("meta")).map_err(io_err)?;
        Ok(Self { root })
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("meta").join("MANIFEST.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join("meta").join("LOCK")
    }

    fn record_rel(id: &str) -> String {
        format!("records/{id}.json")
    }

    fn abs(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    fn acquire_lock(&self) -> Result<File, StoreError> {
        let lockf = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())
            .map_err(io_err)?;
        fs4::FileExt::lock_exclusive(&lockf).map_err(io_err)?;
        Ok(lockf)
    }

    /// Always read fresh from disk so records written by another handle or
    /// process over the same root are visible without reopening.
    fn load_manifest(&self) -> Result<Manifest, StoreError> {
        let path = self.manifest_path();
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let mut s = String::new();
        File::open(&path)
            .map_err(io_err)?
            .read_to_string(&mut s)
            .map_err(io_err)?;
        serde_json::from_str(&s).map_err(|e| StoreError::Serde(e.to_string()))
    }

    fn save_manifest(&self, manifest: &Manifest) -> Result<(), StoreError> {
        let path = self.manifest_path();
        let dir = path.parent().unwrap();
        let tmp = dir.join(format!(
            ".tmp-manifest-{}-{}.json",
            std::process::id(),
            unique_suffix()
        ));
        let data =
            serde_json::to_vec_pretty(manifest).map_err(|e| StoreError::Serde(e.to_string()))?;
        write_atomic(&tmp, &path, &data)
    }

    fn read_record(&self, rel: &str) -> Result<Option<CaseRecord>, StoreError> {
        let path = self.abs(rel);
        let mut s = String::new();
        match File::open(&path) {
            Ok(mut f) => {
                f.read_to_string(&mut s).map_err(io_err)?;
                let record: CaseRecord =
                    serde_json::from_str(&s).map_err(|e| StoreError::Serde(e.to_string()))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(e)),
        }
    }

    /// Ids in most-recently-saved order, for sync and backup tooling.
    pub fn recent_ids(&self, limit: usize) -> Result<Vec<String>, StoreError> {
        let manifest = self.load_manifest()?;
        Ok(manifest.recent.iter().take(limit).cloned().collect())
    }
}

fn new_record_id() -> String {
    format!("rec_{}", Uuid::new_v4().simple())
}

impl RecordStore for LocalStore {
    fn save(&self, record: &CaseRecord) -> Result<CaseRecord, StoreError> {
        let lockf = self.acquire_lock()?;
        let res = (|| {
            let mut saved = record.clone();
            let id = match &record.id {
                Some(id) => {
                    let current = self
                        .read_record(&Self::record_rel(id))?
                        .ok_or_else(|| StoreError::NotFound(id.clone()))?;
                    if current.rev != record.rev {
                        return Err(StoreError::Conflict {
                            id: id.clone(),
                            attempted: record.rev,
                            current: current.rev,
                        });
                    }
                    saved.rev = record.rev + 1;
                    id.clone()
                }
                None => {
                    let id = new_record_id();
                    saved.id = Some(id.clone());
                    saved.rev = 1;
                    id
                }
            };

            let rel = Self::record_rel(&id);
            let path = self.abs(&rel);
            let data =
                serde_json::to_vec_pretty(&saved).map_err(|e| StoreError::Serde(e.to_string()))?;
            let tmp = path
                .parent()
                .unwrap()
                .join(format!(".tmp-{}-{}.json", id, unique_suffix()));
            debug!(record_id = %id, rev = saved.rev, "local save start");
            write_atomic(&tmp, &path, &data)?;

            let mut manifest = self.load_manifest()?;
            manifest.ids.insert(id.clone(), rel.clone());
            if let Some(pos) = manifest.recent.iter().position(|x| x == &id) {
                manifest.recent.remove(pos);
            }
            manifest.recent.push_front(id.clone());
            while manifest.recent.len() > RECENT_CAP {
                manifest.recent.pop_back();
            }
            self.save_manifest(&manifest)?;
            debug!(record_id = %id, rev = saved.rev, "local save committed");
            Ok(saved)
        })();
        let _ = fs4::FileExt::unlock(&lockf);
        res
    }

    fn get(&self, id: &str) -> Result<Option<CaseRecord>, StoreError> {
        let manifest = self.load_manifest()?;
        match manifest.ids.get(id) {
            Some(rel) => self.read_record(rel),
            None => Ok(None),
        }
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let lockf = self.acquire_lock()?;
        let res = (|| {
            let mut manifest = self.load_manifest()?;
            let rel = manifest
                .ids
                .remove(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            if let Some(pos) = manifest.recent.iter().position(|x| x == id) {
                manifest.recent.remove(pos);
            }
            self.save_manifest(&manifest)?;
            fs::remove_file(self.abs(&rel)).map_err(io_err)?;
            debug!(record_id = id, "local delete removed file");
            Ok(())
        })();
        let _ = fs4::FileExt::unlock(&lockf);
        res
    }

    fn all(&self) -> Result<Vec<CaseRecord>, StoreError> {
        let manifest = self.load_manifest()?;
        let rels: Vec<String> = manifest.ids.values().cloned().collect();
        let mut records = Vec::with_capacity(rels.len());
        for rel in rels {
            if let Some(record) = self.read_record(&rel)? {
                records.push(record);
            }
        }
        records.sort_by_key(|record| {
            let name = record.field("name").unwrap_or_default().trim().to_string();
            (!name.is_empty(), name)
        });
        Ok(records)
    }
}

fn io_err(e: std::io::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

fn write_atomic(tmp: &Path, final_path: &Path, data: &[u8]) -> Result<(), StoreError> {
    {
        let mut f = File::create(tmp).map_err(io_err)?;
        f.write_all(data).map_err(io_err)?;
        f.sync_all().map_err(io_err)?;
    }
    fs::rename(tmp, final_path).map_err(io_err)?;
    if let Some(dir) = final_path.parent() {
        let dir_file = File::open(dir).map_err(io_err)?;
        dir_file.sync_all().map_err(io_err)?;
    }
    Ok(())
}

fn unique_suffix() -> u128 {
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let nanos = now.as_nanos();
    nanos ^ (std::thread::current().name().unwrap_or("").as_ptr() as usize as u128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use casebook_core::Attachment;
    use tempfile::TempDir;

    fn named(name: &str) -> CaseRecord {
        let mut record = CaseRecord::new();
        record.set_field("name", name);
        record
    }

    #[test]
    fn save_get_delete_roundtrip() {
        let root = TempDir::new().unwrap();
        let store = LocalStore::new(root.path()).unwrap();
        let saved = store.save(&named("Bob")).unwrap();
        let id = saved.id.clone().unwrap();
        assert_eq!(saved.rev, 1);

        let got = store.get(&id).unwrap().unwrap();
        assert_eq!(got.field("name"), Some("Bob"));
        assert_eq!(got.rev, 1);

        store.delete(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
        assert!(matches!(
            store.delete(&id).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn attachments_survive_the_disk_round_trip() {
        let root = TempDir::new().unwrap();
        let store = LocalStore::new(root.path()).unwrap();
        let mut record = named("Bob");
        record.attach(
            "photo-20100120T171032",
            Attachment::new("image/jpeg", vec![0xff, 0xd8, 0xff, 0xe0]),
        );
        let saved = store.save(&record).unwrap();
        let got = store.get(saved.id.as_deref().unwrap()).unwrap().unwrap();
        let attachment = got.attachment_for_key("photo-20100120T171032").unwrap();
        assert_eq!(attachment.content_type, "image/jpeg");
        assert_eq!(attachment.data, vec![0xff, 0xd8, 0xff, 0xe0]);
    }

    #[test]
    fn stale_revision_conflicts_across_handles() {
        let root = TempDir::new().unwrap();
        let store = LocalStore::new(root.path()).unwrap();
        let saved = store.save(&named("Bob")).unwrap();

        // a second handle over the same root, as another process would hold
        let other = LocalStore::new(root.path()).unwrap();
        let mut theirs = other.get(saved.id.as_deref().unwrap()).unwrap().unwrap();
        theirs.set_field("name", "Robert");
        other.save(&theirs).unwrap();

        let err = store.save(&saved).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn records_saved_by_another_handle_are_visible() {
        let root = TempDir::new().unwrap();
        let ours = LocalStore::new(root.path()).unwrap();
        ours.save(&named("First")).unwrap();

        let theirs = LocalStore::new(root.path()).unwrap();
        let id = theirs.save(&named("Second")).unwrap().id.unwrap();

        // no reopen: the first handle picks up the other writer's record
        assert_eq!(
            ours.get(&id).unwrap().unwrap().field("name"),
            Some("Second")
        );
        assert_eq!(ours.all().unwrap().len(), 2);
        assert_eq!(ours.recent_ids(1).unwrap(), [id]);
    }

    #[test]
    fn manifest_persists_across_reopen() {
        let root = TempDir::new().unwrap();
        let id = {
            let store = LocalStore::new(root.path()).unwrap();
            store.save(&named("Zelda")).unwrap();
            store.save(&named("Alice")).unwrap().id.unwrap()
        };
        let reopened = LocalStore::new(root.path()).unwrap();
        assert_eq!(
            reopened.get(&id).unwrap().unwrap().field("name"),
            Some("Alice")
        );
        assert_eq!(reopened.all().unwrap().len(), 2);
        assert_eq!(reopened.recent_ids(1).unwrap(), [id]);
    }

    #[test]
    fn all_orders_by_name_blanks_first() {
        let root = TempDir::new().unwrap();
        let store = LocalStore::new(root.path()).unwrap();
        store.save(&named("Zelda")).unwrap();
        store.save(&CaseRecord::new()).unwrap();
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

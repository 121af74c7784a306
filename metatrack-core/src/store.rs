//! File-backed persisted store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.metatrack/
//!   environments/
//!     <name>.yaml       (environment + branch record, mode 0600: holds credentials)
//!   objects/
//!     <name>.json       (object snapshot for the environment)
//!   integrations/
//!     <dest>.yaml       (pending integration branch, at most one per destination)
//! ```
//!
//! # API pattern
//!
//! [`Store::at`] takes an explicit home (tests use a `TempDir`);
//! [`Store::open`] derives it from `dirs::home_dir()`.
//!
//! Every write serializes to a sibling `.tmp` file and renames it over the
//! target, so replacing an environment's whole object set is atomic.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{io_err, StoreError};
use crate::paths;
use crate::types::{
    EnvironmentName, EnvironmentRecord, IntegrationBranch, ObjectId, SnapshotFile, TrackedObject,
};

#[derive(Debug, Clone)]
pub struct Store {
    home: PathBuf,
}

impl Store {
    /// Store rooted at `<home>/.metatrack/`.
    pub fn at(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Store rooted at the user's home directory.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::at(home()?))
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    // -----------------------------------------------------------------------
    // 1. Path helpers
    // -----------------------------------------------------------------------

    pub fn environment_path(&self, name: &EnvironmentName) -> PathBuf {
        paths::environments_dir(&self.home).join(format!("{}.yaml", name.0))
    }

    pub fn objects_path(&self, name: &EnvironmentName) -> PathBuf {
        paths::objects_dir(&self.home).join(format!("{}.json", name.0))
    }

    pub fn integration_path(&self, dest: &EnvironmentName) -> PathBuf {
        paths::integrations_dir(&self.home).join(format!("{}.yaml", dest.0))
    }

    // -----------------------------------------------------------------------
    // 2. Environments
    // -----------------------------------------------------------------------

    /// All environment records, sorted by name.
    pub fn list_environments(&self) -> Result<Vec<EnvironmentRecord>, StoreError> {
        let dir = paths::environments_dir(&self.home);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut entries: Vec<_> = std::fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
            .collect();
        entries.sort_by_key(|e| e.file_name());

        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(read_yaml(&entry.path())?);
        }
        Ok(out)
    }

    pub fn find_environment(
        &self,
        name: &EnvironmentName,
    ) -> Result<Option<EnvironmentRecord>, StoreError> {
        let path = self.environment_path(name);
        if !path.exists() {
            return Ok(None);
        }
        read_yaml(&path).map(Some)
    }

    /// Load an environment record; `EnvironmentNotFound` if absent.
    pub fn load_environment(&self, name: &EnvironmentName) -> Result<EnvironmentRecord, StoreError> {
        self.find_environment(name)?
            .ok_or_else(|| StoreError::EnvironmentNotFound { name: name.0.clone() })
    }

    /// The production environment, if one has been created.
    pub fn production(&self) -> Result<Option<EnvironmentRecord>, StoreError> {
        Ok(self.list_environments()?.into_iter().find(|e| e.production))
    }

    pub fn save_environment(&self, record: &EnvironmentRecord) -> Result<(), StoreError> {
        let path = self.environment_path(&record.name);
        let yaml = serde_yaml::to_string(record)?;
        write_atomic(&path, yaml.as_bytes())?;
        set_file_permissions(&path)
    }

    /// Flip the persisted lock flag. Idempotent.
    pub fn set_locked(
        &self,
        name: &EnvironmentName,
        locked: bool,
    ) -> Result<EnvironmentRecord, StoreError> {
        let mut record = self.load_environment(name)?;
        if record.locked != locked {
            record.locked = locked;
            record.updated_at = Utc::now();
            self.save_environment(&record)?;
        }
        Ok(record)
    }

    /// Delete an environment record. Tolerates an already absent record.
    pub fn delete_environment(&self, name: &EnvironmentName) -> Result<(), StoreError> {
        remove_if_exists(&self.environment_path(name))
    }

    // -----------------------------------------------------------------------
    // 3. Tracked objects
    // -----------------------------------------------------------------------

    /// The stored snapshot; empty (taken now) if none has been recorded yet.
    pub fn load_snapshot(&self, name: &EnvironmentName) -> Result<SnapshotFile, StoreError> {
        let path = self.objects_path(name);
        if !path.exists() {
            return Ok(SnapshotFile {
                taken_at: Utc::now(),
                objects: vec![],
            });
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|source| StoreError::ParseSnapshot { path, source })
    }

    pub fn load_objects(&self, name: &EnvironmentName) -> Result<Vec<TrackedObject>, StoreError> {
        Ok(self.load_snapshot(name)?.objects)
    }

    /// Replace every object of an environment in one atomic write.
    pub fn replace_objects(
        &self,
        name: &EnvironmentName,
        objects: Vec<TrackedObject>,
    ) -> Result<(), StoreError> {
        self.save_snapshot(
            name,
            &SnapshotFile {
                taken_at: Utc::now(),
                objects,
            },
        )
    }

    pub fn find_object(
        &self,
        name: &EnvironmentName,
        object_id: &ObjectId,
    ) -> Result<Option<TrackedObject>, StoreError> {
        Ok(self
            .load_objects(name)?
            .into_iter()
            .find(|o| &o.object_id == object_id))
    }

    /// Resolve a repository path to the object stored under it.
    pub fn find_object_by_path(
        &self,
        name: &EnvironmentName,
        file_path: &str,
    ) -> Result<Option<TrackedObject>, StoreError> {
        Ok(self
            .load_objects(name)?
            .into_iter()
            .find(|o| o.file_path == file_path))
    }

    /// Append a new object record.
    pub fn insert_object(
        &self,
        name: &EnvironmentName,
        object: TrackedObject,
    ) -> Result<(), StoreError> {
        let mut snapshot = self.load_snapshot(name)?;
        snapshot.objects.retain(|o| o.object_id != object.object_id);
        snapshot.objects.push(object);
        self.save_snapshot(name, &snapshot)
    }

    /// Replace the record with `object`'s id wholesale, keeping its position.
    pub fn replace_object(
        &self,
        name: &EnvironmentName,
        object: TrackedObject,
    ) -> Result<(), StoreError> {
        let mut snapshot = self.load_snapshot(name)?;
        let slot = snapshot
            .objects
            .iter_mut()
            .find(|o| o.object_id == object.object_id)
            .ok_or_else(|| StoreError::ObjectNotFound {
                environment: name.0.clone(),
                object_id: object.object_id.0.clone(),
            })?;
        *slot = object;
        self.save_snapshot(name, &snapshot)
    }

    pub fn delete_object(
        &self,
        name: &EnvironmentName,
        object_id: &ObjectId,
    ) -> Result<(), StoreError> {
        let mut snapshot = self.load_snapshot(name)?;
        let before = snapshot.objects.len();
        snapshot.objects.retain(|o| &o.object_id != object_id);
        if snapshot.objects.len() == before {
            return Err(StoreError::ObjectNotFound {
                environment: name.0.clone(),
                object_id: object_id.0.clone(),
            });
        }
        self.save_snapshot(name, &snapshot)
    }

    /// Drop the whole snapshot of an environment. Tolerates absence.
    pub fn delete_objects(&self, name: &EnvironmentName) -> Result<(), StoreError> {
        remove_if_exists(&self.objects_path(name))
    }

    fn save_snapshot(&self, name: &EnvironmentName, snapshot: &SnapshotFile) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(snapshot)?;
        write_atomic(&self.objects_path(name), json.as_bytes())
    }

    // -----------------------------------------------------------------------
    // 4. Integration branches
    // -----------------------------------------------------------------------

    pub fn load_integration(
        &self,
        dest: &EnvironmentName,
    ) -> Result<Option<IntegrationBranch>, StoreError> {
        let path = self.integration_path(dest);
        if !path.exists() {
            return Ok(None);
        }
        read_yaml(&path).map(Some)
    }

    pub fn save_integration(&self, integration: &IntegrationBranch) -> Result<(), StoreError> {
        let yaml = serde_yaml::to_string(integration)?;
        write_atomic(&self.integration_path(&integration.dest), yaml.as_bytes())
    }

    pub fn delete_integration(&self, dest: &EnvironmentName) -> Result<(), StoreError> {
        remove_if_exists(&self.integration_path(dest))
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, StoreError> {
    dirs::home_dir().ok_or(StoreError::HomeNotFound)
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    serde_yaml::from_str(&contents).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Write flow: ensure parent (mode `0700`) → `<file>.tmp` sibling → `rename`.
/// The `.tmp` lives in the target directory so the rename never crosses
/// filesystems.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("path has no parent")));
    };
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{file_name}.tmp"));
    std::fs::write(&tmp, bytes).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BranchRecord, Credentials};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn env(name: &str, production: bool) -> EnvironmentRecord {
        let now = Utc::now();
        EnvironmentRecord {
            name: EnvironmentName::from(name),
            credentials: Credentials {
                username: format!("{name}@example.com"),
                password: "secret".into(),
            },
            production,
            locked: false,
            branch: BranchRecord {
                name: name.into(),
                local_path: PathBuf::from("/tmp").join(name),
            },
            created_at: now,
            updated_at: now,
        }
    }

    fn object(id: &str, name: &str) -> TrackedObject {
        TrackedObject {
            object_id: ObjectId::from(id),
            object_type: "ApexClass".into(),
            full_name: name.into(),
            file_path: format!("classes/{name}.cls"),
            last_modified_by: None,
            last_modified_by_id: None,
            last_modified_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            created_by: None,
            created_at: None,
            namespace_prefix: None,
            manageable_state: None,
            environment: EnvironmentName::from("prod"),
        }
    }

    #[test]
    fn save_and_load_environment_roundtrip() {
        let home = TempDir::new().unwrap();
        let store = Store::at(home.path());
        let record = env("prod", true);
        store.save_environment(&record).unwrap();
        assert_eq!(store.load_environment(&record.name).unwrap(), record);
        assert_eq!(store.production().unwrap(), Some(record));
    }

    #[test]
    #[cfg(unix)]
    fn environment_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let home = TempDir::new().unwrap();
        let store = Store::at(home.path());
        let record = env("prod", true);
        store.save_environment(&record).unwrap();
        let mode = std::fs::metadata(store.environment_path(&record.name))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn load_missing_environment_is_not_found() {
        let home = TempDir::new().unwrap();
        let err = Store::at(home.path())
            .load_environment(&EnvironmentName::from("nope"))
            .unwrap_err();
        assert!(matches!(err, StoreError::EnvironmentNotFound { .. }));
    }

    #[test]
    fn set_locked_is_idempotent() {
        let home = TempDir::new().unwrap();
        let store = Store::at(home.path());
        let record = env("uat", false);
        store.save_environment(&record).unwrap();

        assert!(store.set_locked(&record.name, true).unwrap().locked);
        assert!(store.set_locked(&record.name, true).unwrap().locked);
        assert!(!store.set_locked(&record.name, false).unwrap().locked);
    }

    #[test]
    fn replace_object_keeps_position() {
        let home = TempDir::new().unwrap();
        let store = Store::at(home.path());
        let name = EnvironmentName::from("prod");
        store
            .replace_objects(&name, vec![object("1", "A"), object("2", "B"), object("3", "C")])
            .unwrap();

        let renamed = object("2", "Bee");
        store.replace_object(&name, renamed.clone()).unwrap();

        let objects = store.load_objects(&name).unwrap();
        assert_eq!(objects[1], renamed);
        assert_eq!(objects.len(), 3);
    }

    #[test]
    fn delete_missing_object_is_an_error() {
        let home = TempDir::new().unwrap();
        let store = Store::at(home.path());
        let name = EnvironmentName::from("prod");
        store.replace_objects(&name, vec![object("1", "A")]).unwrap();
        let err = store.delete_object(&name, &ObjectId::from("9")).unwrap_err();
        assert!(matches!(err, StoreError::ObjectNotFound { .. }));
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = TempDir::new().unwrap();
        let store = Store::at(home.path());
        let name = EnvironmentName::from("prod");
        store.replace_objects(&name, vec![object("1", "A")]).unwrap();
        let tmp = store.objects_path(&name).with_file_name("prod.json.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn list_environments_empty_when_nothing_saved() {
        let home = TempDir::new().unwrap();
        assert!(Store::at(home.path()).list_environments().unwrap().is_empty());
    }
}

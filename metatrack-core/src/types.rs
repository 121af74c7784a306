//! Domain types for tracked org metadata.
//!
//! Filesystem locations use `PathBuf`. Object `file_path`s are repository
//! paths (relative, `/`-separated) and stay `String` so they compare directly
//! against SCM diff output.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidObject;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed environment (org) name. Unique; doubles as the
/// environment's identity in the store.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EnvironmentName(pub String);

impl fmt::Display for EnvironmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for EnvironmentName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for EnvironmentName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Remote-assigned identity of a metadata object. Stable across renames.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub String);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Tracked objects
// ---------------------------------------------------------------------------

/// One metadata object of an org, as recorded in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedObject {
    pub object_id: ObjectId,
    pub object_type: String,
    pub full_name: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_id: Option<String>,
    pub last_modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manageable_state: Option<String>,
    pub environment: EnvironmentName,
}

impl TrackedObject {
    /// Every populated field as an ordered `(key, value)` list.
    pub fn fields(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("object_id", self.object_id.0.clone()),
            ("object_type", self.object_type.clone()),
            ("full_name", self.full_name.clone()),
            ("file_path", self.file_path.clone()),
        ];
        if let Some(v) = &self.last_modified_by {
            out.push(("last_modified_by", v.clone()));
        }
        if let Some(v) = &self.last_modified_by_id {
            out.push(("last_modified_by_id", v.clone()));
        }
        out.push(("last_modified_at", self.last_modified_at.to_rfc3339()));
        if let Some(v) = &self.created_by {
            out.push(("created_by", v.clone()));
        }
        if let Some(v) = &self.created_at {
            out.push(("created_at", v.to_rfc3339()));
        }
        if let Some(v) = &self.namespace_prefix {
            out.push(("namespace_prefix", v.clone()));
        }
        if let Some(v) = &self.manageable_state {
            out.push(("manageable_state", v.clone()));
        }
        out
    }

    /// Fields of `self` whose value differs from (or is absent in) `previous`.
    pub fn changed_fields(&self, previous: &TrackedObject) -> Vec<(&'static str, String)> {
        let before = previous.fields();
        self.fields()
            .into_iter()
            .filter(|(key, value)| !before.iter().any(|(k, v)| k == key && v == value))
            .collect()
    }

    /// Path of the companion metadata file that some types carry next to
    /// their primary file.
    pub fn companion_path(&self, suffix: &str) -> String {
        format!("{}{}", self.file_path, suffix)
    }
}

/// A raw listing record as returned by a metadata gateway.
///
/// Every field is optional on the wire; [`ObjectRecord::into_tracked`]
/// enforces the ones a [`TrackedObject`] requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manageable_state: Option<String>,
}

impl ObjectRecord {
    /// Convert into a [`TrackedObject`] owned by `environment`.
    ///
    /// `listed_type` is the metadata type the record was listed under; it
    /// fills in a missing `type`. A missing `fileName` is an error because the
    /// object could not be placed in the working copy.
    pub fn into_tracked(
        self,
        environment: &EnvironmentName,
        listed_type: &str,
    ) -> Result<TrackedObject, InvalidObject> {
        let id = match self.id.filter(|s| !s.is_empty()) {
            Some(id) => id,
            None => return Err(InvalidObject::new(None, "missing id")),
        };
        let full_name = self
            .full_name
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InvalidObject::new(Some(&id), "missing fullName"))?;
        let last_modified_at = self
            .last_modified_date
            .ok_or_else(|| InvalidObject::new(Some(&id), "missing lastModifiedDate"))?;
        let file_path = self
            .file_name
            .filter(|s| !s.is_empty())
            .ok_or_else(|| InvalidObject::new(Some(&id), "missing fileName"))?;

        Ok(TrackedObject {
            object_id: ObjectId(id),
            object_type: self
                .object_type
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| listed_type.to_owned()),
            full_name,
            file_path,
            last_modified_by: self.last_modified_by_name,
            last_modified_by_id: self.last_modified_by_id,
            last_modified_at,
            created_by: self.created_by_name,
            created_at: self.created_date,
            namespace_prefix: self.namespace_prefix,
            manageable_state: self.manageable_state,
            environment: environment.clone(),
        })
    }
}

impl From<&TrackedObject> for ObjectRecord {
    fn from(obj: &TrackedObject) -> Self {
        Self {
            id: Some(obj.object_id.0.clone()),
            object_type: Some(obj.object_type.clone()),
            full_name: Some(obj.full_name.clone()),
            file_name: Some(obj.file_path.clone()),
            last_modified_by_id: obj.last_modified_by_id.clone(),
            last_modified_by_name: obj.last_modified_by.clone(),
            last_modified_date: Some(obj.last_modified_at),
            created_by_name: obj.created_by.clone(),
            created_date: obj.created_at,
            namespace_prefix: obj.namespace_prefix.clone(),
            manageable_state: obj.manageable_state.clone(),
        }
    }
}

/// On-disk snapshot payload for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub taken_at: DateTime<Utc>,
    #[serde(default)]
    pub objects: Vec<TrackedObject>,
}

// ---------------------------------------------------------------------------
// Changes
// ---------------------------------------------------------------------------

/// Discriminant of a [`Change`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Addition,
    Modification,
    Deletion,
    Rename,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Addition => write!(f, "Addition"),
            ChangeKind::Modification => write!(f, "Modification"),
            ChangeKind::Deletion => write!(f, "Deletion"),
            ChangeKind::Rename => write!(f, "Rename"),
        }
    }
}

/// One typed difference between two snapshots of the same environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Change {
    Addition { object: TrackedObject },
    Modification { object: TrackedObject },
    Deletion { object: TrackedObject },
    Rename { old: TrackedObject, new: TrackedObject },
}

impl Change {
    pub fn kind(&self) -> ChangeKind {
        match self {
            Change::Addition { .. } => ChangeKind::Addition,
            Change::Modification { .. } => ChangeKind::Modification,
            Change::Deletion { .. } => ChangeKind::Deletion,
            Change::Rename { .. } => ChangeKind::Rename,
        }
    }

    /// The object that defines this change's ordering key: the new object for
    /// additions, modifications and renames, the old object for deletions.
    pub fn object(&self) -> &TrackedObject {
        match self {
            Change::Addition { object }
            | Change::Modification { object }
            | Change::Deletion { object } => object,
            Change::Rename { new, .. } => new,
        }
    }

    pub fn ordering_key(&self) -> (DateTime<Utc>, &ObjectId) {
        let obj = self.object();
        (obj.last_modified_at, &obj.object_id)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Change::Rename { old, new } => {
                write!(f, "Rename: {} -> {}", old.full_name, new.full_name)
            }
            other => write!(f, "{}: {}", other.kind(), other.object().full_name),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment records
// ---------------------------------------------------------------------------

/// Opaque org login credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Per-environment working-copy branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub name: String,
    /// Absolute path of the local working copy.
    pub local_path: PathBuf,
}

/// A tracked org.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub name: EnvironmentName,
    pub credentials: Credentials,
    pub production: bool,
    #[serde(default)]
    pub locked: bool,
    pub branch: BranchRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An in-flight promotion from `source` into `dest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationBranch {
    pub name: String,
    pub source: EnvironmentName,
    pub dest: EnvironmentName,
    /// Tip of the destination branch the integration branch was forked from.
    pub pre_merge_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_merge_ref: Option<String>,
    #[serde(default)]
    pub is_deployed: bool,
    /// The integration still holds both environments' locks. Cleared once
    /// they are released with the record left behind.
    #[serde(default)]
    pub holds_locks: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

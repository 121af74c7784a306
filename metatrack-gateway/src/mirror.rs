//! Filesystem mirror of an org.
//!
//! # Layout
//!
//! ```text
//! <root>/<env>/
//!   listings/<Type>.json    (array of listing records, camelCase)
//!   src/<file_path>         (primary files and companions)
//! ```
//!
//! A deploy rewrites the listing: additive deploys upsert by
//! `(type, fullName)` and stamp `lastModifiedDate` with the deploy time,
//! destructive deploys drop the record and its files.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use metatrack_core::{settings::DEFAULT_COMPANION_SUFFIX, EnvironmentRecord, ObjectRecord};

use crate::error::{io_err, GatewayError};
use crate::gateway::{DeployOptions, DeployResult, GatewayConnector, MetadataGateway};
use crate::manifest::Manifest;
use crate::package::{DeployPackage, PACKAGE_MANIFEST};

const DEPLOY_USER: &str = "Metadata Deploy";

#[derive(Debug, Clone)]
pub struct MirrorGateway {
    root: PathBuf,
    types: Vec<String>,
    companion_suffix: String,
}

impl MirrorGateway {
    pub fn new(root: impl Into<PathBuf>, types: Vec<String>) -> Self {
        Self {
            root: root.into(),
            types,
            companion_suffix: DEFAULT_COMPANION_SUFFIX.to_string(),
        }
    }

    pub fn with_companion_suffix(mut self, suffix: &str) -> Self {
        self.companion_suffix = suffix.to_owned();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn listing_path(&self, object_type: &str) -> PathBuf {
        self.root.join("listings").join(format!("{object_type}.json"))
    }

    pub fn source_path(&self, file_path: &str) -> PathBuf {
        self.root.join("src").join(file_path)
    }

    /// Write (or overwrite) one object and its files into the mirror, keyed by
    /// `(type, fullName)`. The record's `id` is kept when it is set, otherwise
    /// derived from the key.
    pub fn upsert(
        &self,
        mut record: ObjectRecord,
        files: &[(String, Vec<u8>)],
    ) -> Result<ObjectRecord, GatewayError> {
        let object_type = record.object_type.clone().unwrap_or_default();
        let full_name = record.full_name.clone().unwrap_or_default();
        let mut listing = self.read_listing(&object_type)?;

        let existing = listing
            .iter()
            .position(|r| r.full_name.as_deref() == Some(full_name.as_str()));
        if record.id.is_none() {
            record.id = match existing {
                Some(i) => listing[i].id.clone(),
                None => Some(derive_id(&object_type, &full_name)),
            };
        }
        match existing {
            Some(i) => listing[i] = record.clone(),
            None => listing.push(record.clone()),
        }

        for (rel, bytes) in files {
            let path = self.source_path(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
            fs::write(&path, bytes).map_err(|e| io_err(&path, e))?;
        }
        self.write_listing(&object_type, &listing)?;
        Ok(record)
    }

    /// Drop one object and its files. Returns whether it existed.
    pub fn remove(&self, object_type: &str, full_name: &str) -> Result<bool, GatewayError> {
        let mut listing = self.read_listing(object_type)?;
        let Some(i) = listing
            .iter()
            .position(|r| r.full_name.as_deref() == Some(full_name))
        else {
            return Ok(false);
        };
        let record = listing.remove(i);
        if let Some(file) = record.file_name.as_deref() {
            for path in [
                self.source_path(file),
                self.source_path(&format!("{file}{}", self.companion_suffix)),
            ] {
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err(&path, e)),
                }
            }
        }
        self.write_listing(object_type, &listing)?;
        Ok(true)
    }

    fn read_listing(&self, object_type: &str) -> Result<Vec<ObjectRecord>, GatewayError> {
        let path = self.listing_path(object_type);
        if !path.exists() {
            return Ok(vec![]);
        }
        let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_str(&contents).map_err(|e| GatewayError::Listing {
            object_type: object_type.to_owned(),
            reason: format!("{}: {e}", path.display()),
        })
    }

    fn write_listing(&self, object_type: &str, listing: &[ObjectRecord]) -> Result<(), GatewayError> {
        let path = self.listing_path(object_type);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let json = serde_json::to_string_pretty(listing)?;
        fs::write(&path, json).map_err(|e| io_err(&path, e))
    }

    fn deploy_additive(&self, package: &DeployPackage) -> Result<(), GatewayError> {
        let now = Utc::now();
        for entry in package.entries() {
            let mut files = Vec::with_capacity(entry.files.len());
            for rel in &entry.files {
                let from = package.dir().join(rel);
                let bytes = fs::read(&from).map_err(|e| io_err(&from, e))?;
                files.push((rel.clone(), bytes));
            }
            let previous = self
                .read_listing(&entry.object_type)?
                .into_iter()
                .find(|r| r.full_name.as_deref() == Some(entry.full_name.as_str()));
            let file_name = entry
                .files
                .iter()
                .find(|f| !f.ends_with(&self.companion_suffix))
                .cloned()
                .or_else(|| previous.as_ref().and_then(|p| p.file_name.clone()));

            let record = ObjectRecord {
                id: previous.as_ref().and_then(|p| p.id.clone()),
                object_type: Some(entry.object_type.clone()),
                full_name: Some(entry.full_name.clone()),
                file_name,
                last_modified_by_name: Some(DEPLOY_USER.to_string()),
                last_modified_date: Some(now),
                created_by_name: previous
                    .as_ref()
                    .and_then(|p| p.created_by_name.clone())
                    .or_else(|| Some(DEPLOY_USER.to_string())),
                created_date: previous.as_ref().and_then(|p| p.created_date).or(Some(now)),
                ..ObjectRecord::default()
            };
            self.upsert(record, &files)?;
        }
        Ok(())
    }

    fn deploy_destructive(&self, package: &DeployPackage) -> Result<(), GatewayError> {
        for entry in package.entries() {
            if !self.remove(&entry.object_type, &entry.full_name)? {
                tracing::debug!(object_type = %entry.object_type, full_name = %entry.full_name, "already absent");
            }
        }
        Ok(())
    }
}

impl MetadataGateway for MirrorGateway {
    fn list_types(&self) -> Vec<String> {
        self.types.clone()
    }

    fn list_objects(&self, object_type: &str) -> Result<Vec<ObjectRecord>, GatewayError> {
        let mut records = self.read_listing(object_type)?;
        for record in &mut records {
            if record.object_type.is_none() {
                record.object_type = Some(object_type.to_owned());
            }
        }
        Ok(records)
    }

    fn retrieve(&self, manifest: &Manifest, dest: &Path) -> Result<(), GatewayError> {
        for (object_type, members) in manifest.types() {
            let listing = self.read_listing(object_type)?;
            for full_name in members {
                let record = listing
                    .iter()
                    .find(|r| r.full_name.as_deref() == Some(full_name.as_str()))
                    .ok_or_else(|| GatewayError::UnknownMember {
                        object_type: object_type.to_owned(),
                        full_name: full_name.clone(),
                    })?;
                let Some(file) = record.file_name.as_deref() else {
                    continue;
                };
                for rel in [file.to_owned(), format!("{file}{}", self.companion_suffix)] {
                    let from = self.source_path(&rel);
                    if !from.is_file() {
                        continue;
                    }
                    let to = dest.join(&rel);
                    if let Some(parent) = to.parent() {
                        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                    }
                    fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
                }
            }
        }
        Ok(())
    }

    fn deploy(
        &self,
        package: &DeployPackage,
        options: &DeployOptions,
    ) -> Result<DeployResult, GatewayError> {
        let job_id = job_id(package.dir());
        if !package.dir().join(PACKAGE_MANIFEST).is_file() {
            return Ok(DeployResult {
                job_id,
                success: false,
                message: format!("{PACKAGE_MANIFEST} not found in package"),
            });
        }
        if options.check_only {
            return Ok(DeployResult {
                job_id,
                success: true,
                message: "validated".into(),
            });
        }

        if package.is_destructive() {
            self.deploy_destructive(package)?;
        } else {
            self.deploy_additive(package)?;
        }
        tracing::info!(root = %self.root.display(), %job_id, members = package.manifest().len(), "deploy complete");
        Ok(DeployResult {
            job_id,
            success: true,
            message: format!("deployed {} component(s)", package.manifest().len()),
        })
    }
}

/// Connects environments to mirrored orgs at `<root>/<environment name>`.
#[derive(Debug, Clone)]
pub struct MirrorConnector {
    root: PathBuf,
    types: Vec<String>,
    companion_suffix: String,
}

impl MirrorConnector {
    pub fn new(root: impl Into<PathBuf>, types: Vec<String>, companion_suffix: &str) -> Self {
        Self {
            root: root.into(),
            types,
            companion_suffix: companion_suffix.to_owned(),
        }
    }

    pub fn org_root(&self, environment: &str) -> PathBuf {
        self.root.join(environment)
    }
}

impl GatewayConnector for MirrorConnector {
    fn connect(
        &self,
        environment: &EnvironmentRecord,
    ) -> Result<Box<dyn MetadataGateway>, GatewayError> {
        let root = self.org_root(&environment.name.0);
        if !root.is_dir() {
            return Err(GatewayError::Connection {
                org: environment.name.0.clone(),
                reason: format!("no mirrored org at {}", root.display()),
            });
        }
        tracing::debug!(org = %environment.name, user = %environment.credentials.username, "connected to mirror");
        Ok(Box::new(
            MirrorGateway::new(root, self.types.clone()).with_companion_suffix(&self.companion_suffix),
        ))
    }
}

fn derive_id(object_type: &str, full_name: &str) -> String {
    let digest = Sha256::digest(format!("{object_type}:{full_name}").as_bytes());
    hex::encode(digest)[..18].to_string()
}

fn job_id(dir: &Path) -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let digest = Sha256::digest(format!("{}:{nanos}", dir.display()).as_bytes());
    format!("0Af{}", &hex::encode(digest)[..15])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str) -> ObjectRecord {
        ObjectRecord {
            object_type: Some("ApexClass".into()),
            full_name: Some(name.into()),
            file_name: Some(format!("classes/{name}.cls")),
            last_modified_date: Some(Utc::now()),
            ..ObjectRecord::default()
        }
    }

    #[test]
    fn missing_listing_is_empty() {
        let tmp = TempDir::new().unwrap();
        let gw = MirrorGateway::new(tmp.path(), vec!["ApexClass".into()]);
        assert!(gw.list_objects("ApexClass").unwrap().is_empty());
    }

    #[test]
    fn upsert_derives_stable_id_and_keeps_it() {
        let tmp = TempDir::new().unwrap();
        let gw = MirrorGateway::new(tmp.path(), vec![]);
        let first = gw.upsert(record("A"), &[]).unwrap();
        let second = gw.upsert(record("A"), &[]).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.id.as_deref().map(str::len), Some(18));
        assert_eq!(gw.list_objects("ApexClass").unwrap().len(), 1);
    }

    #[test]
    fn corrupt_listing_is_listing_error() {
        let tmp = TempDir::new().unwrap();
        let gw = MirrorGateway::new(tmp.path(), vec![]);
        fs::create_dir_all(tmp.path().join("listings")).unwrap();
        fs::write(gw.listing_path("ApexClass"), "[{").unwrap();
        let err = gw.list_objects("ApexClass").unwrap_err();
        assert!(matches!(err, GatewayError::Listing { .. }));
    }

    #[test]
    fn remove_deletes_companion_file() {
        let tmp = TempDir::new().unwrap();
        let gw = MirrorGateway::new(tmp.path(), vec![]);
        gw.upsert(
            record("A"),
            &[
                ("classes/A.cls".into(), b"class A {}".to_vec()),
                ("classes/A.cls-meta.xml".into(), b"<meta/>".to_vec()),
            ],
        )
        .unwrap();
        assert!(gw.remove("ApexClass", "A").unwrap());
        assert!(!gw.source_path("classes/A.cls-meta.xml").exists());
        assert!(!gw.remove("ApexClass", "A").unwrap());
    }
}

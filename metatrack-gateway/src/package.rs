//! Deploy-package staging.
//!
//! A package is a scratch directory holding a rendered `package.xml` and,
//! depending on its shape, either the files of the members to deploy or a
//! `destructiveChanges.xml` naming the members to delete. A destructive
//! package carries an empty `package.xml` because the metadata API refuses a
//! deploy without one.

use std::fs;
use std::path::{Path, PathBuf};

use metatrack_core::TrackedObject;

use crate::error::{io_err, GatewayError};
use crate::manifest::{Manifest, ManifestRenderer};

pub const PACKAGE_MANIFEST: &str = "package.xml";
pub const DESTRUCTIVE_MANIFEST: &str = "destructiveChanges.xml";

/// One member staged into a package, with the repository paths of the files
/// that were copied for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageEntry {
    pub object_type: String,
    pub full_name: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeployPackage {
    dir: PathBuf,
    manifest: Manifest,
    entries: Vec<PackageEntry>,
    destructive: bool,
}

impl DeployPackage {
    /// Stage a package deleting `objects`.
    pub fn stage_destructive(
        dir: &Path,
        renderer: &ManifestRenderer,
        objects: &[TrackedObject],
    ) -> Result<Self, GatewayError> {
        ensure_dir(dir)?;
        let manifest = Manifest::from_objects(objects);
        write(&dir.join(PACKAGE_MANIFEST), &renderer.render(&Manifest::new())?)?;
        write(&dir.join(DESTRUCTIVE_MANIFEST), &renderer.render(&manifest)?)?;

        let entries = objects
            .iter()
            .map(|o| PackageEntry {
                object_type: o.object_type.clone(),
                full_name: o.full_name.clone(),
                files: vec![],
            })
            .collect();
        tracing::debug!(dir = %dir.display(), members = manifest.len(), "staged destructive package");
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            entries,
            destructive: true,
        })
    }

    /// Stage a package deploying `objects`, copying each primary file (and
    /// its companion, when one exists) out of the working copy at `source`.
    pub fn stage_additive(
        dir: &Path,
        renderer: &ManifestRenderer,
        source: &Path,
        objects: &[TrackedObject],
        companion_suffix: &str,
    ) -> Result<Self, GatewayError> {
        ensure_dir(dir)?;
        let mut entries = Vec::with_capacity(objects.len());
        for obj in objects {
            let mut files = Vec::new();
            for rel in [obj.file_path.clone(), obj.companion_path(companion_suffix)] {
                let from = source.join(&rel);
                if !from.is_file() {
                    continue;
                }
                let to = dir.join(&rel);
                if let Some(parent) = to.parent() {
                    ensure_dir(parent)?;
                }
                fs::copy(&from, &to).map_err(|e| io_err(&from, e))?;
                files.push(rel);
            }
            if files.is_empty() {
                tracing::warn!(object = %obj.full_name, path = %obj.file_path, "no files in working copy for member");
            }
            entries.push(PackageEntry {
                object_type: obj.object_type.clone(),
                full_name: obj.full_name.clone(),
                files,
            });
        }

        let manifest = Manifest::from_objects(objects);
        write(&dir.join(PACKAGE_MANIFEST), &renderer.render(&manifest)?)?;
        tracing::debug!(dir = %dir.display(), members = manifest.len(), "staged additive package");
        Ok(Self {
            dir: dir.to_path_buf(),
            manifest,
            entries,
            destructive: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Members deployed (additive) or deleted (destructive).
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn entries(&self) -> &[PackageEntry] {
        &self.entries
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }
}

fn ensure_dir(dir: &Path) -> Result<(), GatewayError> {
    fs::create_dir_all(dir).map_err(|e| io_err(dir, e))
}

fn write(path: &Path, contents: &str) -> Result<(), GatewayError> {
    fs::write(path, contents).map_err(|e| io_err(path, e))
}

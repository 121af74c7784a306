//! `type → [full_name]` manifests and their `package.xml` rendering.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tera::{Context, Tera};

use metatrack_core::TrackedObject;

use crate::error::GatewayError;

/// Metadata API version written into rendered manifests.
pub const API_VERSION: &str = "59.0";

const PACKAGE_TEMPLATE_NAME: &str = "package.xml.tera";
const PACKAGE_TEMPLATE: &str = include_str!("templates/package.xml.tera");

/// A retrieval or deploy manifest. Types and members are kept sorted so the
/// rendered XML is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    types: BTreeMap<String, BTreeSet<String>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_objects<'a>(objects: impl IntoIterator<Item = &'a TrackedObject>) -> Self {
        let mut manifest = Self::new();
        for obj in objects {
            manifest.insert(&obj.object_type, &obj.full_name);
        }
        manifest
    }

    pub fn insert(&mut self, object_type: &str, full_name: &str) {
        self.types
            .entry(object_type.to_owned())
            .or_default()
            .insert(full_name.to_owned());
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Total number of members across all types.
    pub fn len(&self) -> usize {
        self.types.values().map(BTreeSet::len).sum()
    }

    pub fn types(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.types.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn contains(&self, object_type: &str, full_name: &str) -> bool {
        self.types
            .get(object_type)
            .is_some_and(|members| members.contains(full_name))
    }
}

#[derive(Serialize)]
struct TypeEntry<'a> {
    name: &'a str,
    members: Vec<String>,
}

/// Renders manifests to the `Package` XML document.
pub struct ManifestRenderer {
    tera: Tera,
    api_version: String,
}

impl ManifestRenderer {
    pub fn new() -> Result<Self, GatewayError> {
        Self::with_api_version(API_VERSION)
    }

    pub fn with_api_version(api_version: &str) -> Result<Self, GatewayError> {
        let mut tera = Tera::default();
        tera.add_raw_template(PACKAGE_TEMPLATE_NAME, PACKAGE_TEMPLATE)?;
        Ok(Self {
            tera,
            api_version: api_version.to_owned(),
        })
    }

    pub fn render(&self, manifest: &Manifest) -> Result<String, GatewayError> {
        let types: Vec<TypeEntry<'_>> = manifest
            .types()
            .map(|(name, members)| TypeEntry {
                name,
                members: members.iter().map(|m| xml_escape(m)).collect(),
            })
            .collect();

        let mut ctx = Context::new();
        ctx.insert("types", &types);
        ctx.insert("api_version", &self.api_version);
        Ok(self.tera.render(PACKAGE_TEMPLATE_NAME, &ctx)?)
    }
}

fn xml_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

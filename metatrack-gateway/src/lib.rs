//! # metatrack-gateway
//!
//! The metadata gateway boundary: the [`MetadataGateway`] contract consumed by
//! the sync workflows, per-type gathering, `type → [full_name]` manifests
//! rendered as `package.xml` with tera, deploy-package staging, and a
//! filesystem [`MirrorGateway`] that stands in for a remote org.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use metatrack_core::EnvironmentName;
//! use metatrack_gateway::{gather, MirrorGateway};
//!
//! let gateway = MirrorGateway::new("/srv/orgs/prod", vec!["ApexClass".into()]);
//! let objects = gather(&gateway, &EnvironmentName::from("prod"));
//! println!("{} objects", objects.len());
//! ```

pub mod error;
pub mod gateway;
pub mod manifest;
pub mod mirror;
pub mod package;

pub use error::GatewayError;
pub use gateway::{gather, DeployOptions, DeployResult, GatewayConnector, MetadataGateway};
pub use manifest::{Manifest, ManifestRenderer, API_VERSION};
pub use mirror::{MirrorConnector, MirrorGateway};
pub use package::{DeployPackage, PackageEntry, DESTRUCTIVE_MANIFEST, PACKAGE_MANIFEST};

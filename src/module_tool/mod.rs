//! WAR/AMP inspection: checks that a module package can be installed into a target WAR.

pub mod details;
pub mod helper;
pub mod war;

pub use details::{parse_properties, ModuleDependency, ModuleDetails, VersionNumber, VersionRange};
pub use helper::{amp_module_details, WarHelper};
pub use war::{parse_manifest, WarSource};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid version number: {0}")]
    InvalidVersion(String),
    #[error("invalid module properties: {0}")]
    InvalidProperties(String),
    /// Version or edition check failed.
    #[error("{0}")]
    Incompatible(String),
    #[error("the following modules must first be installed: {0}")]
    MissingDependencies(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

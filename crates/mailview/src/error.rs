//! Error types for the registry and view layers
//!
//! Storage backends report `anyhow::Error`; it is wrapped in the `Storage`
//! variants so callers can still match on the domain failures.

use crate::models::{FolderId, VirtualFolderId};

/// Virtual folder registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("A virtual folder named {name:?} already exists")]
    DuplicateName { name: String },

    #[error("Virtual folder not found: {id}")]
    NotFound { id: VirtualFolderId },

    #[error("Preference storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// View wrapper errors
#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("Virtual folder {id} has no backing folders")]
    EmptyVirtualFolder { id: VirtualFolderId },

    #[error("Unknown virtual folder: {id}")]
    UnknownVirtualFolder { id: VirtualFolderId },

    #[error("Unknown folder: {id}")]
    UnknownFolder { id: FolderId },

    #[error("Preference storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<RegistryError> for ViewError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound { id } => ViewError::UnknownVirtualFolder { id },
            RegistryError::Storage(e) => ViewError::Storage(e),
            other => ViewError::Storage(anyhow::Error::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_not_found_maps_to_unknown_virtual_folder() {
        let err: ViewError = RegistryError::NotFound {
            id: VirtualFolderId::new("vfolder-9"),
        }
        .into();
        assert!(matches!(err, ViewError::UnknownVirtualFolder { .. }));
        assert_eq!(err.to_string(), "Unknown virtual folder: vfolder-9");
    }

    #[test]
    fn test_storage_error_keeps_context() {
        let err = RegistryError::from(anyhow::anyhow!("disk full").context("saving record"));
        assert_eq!(err.to_string(), "Preference storage failed: saving record: disk full");
    }
}

// Per-component restore readiness checks. Read-only: artifacts are inspected,
// live backends are never touched.

use crate::backup::artifacts::{inspect_component, ArtifactError, ArtifactLayout};
use crate::backup::types::{BackupRecord, BackupStatus, Component};
use crate::codec::{MetadataMap, TaggedValue};
use crate::storage::{StorageError, StorageProvider};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Valid,
    Warning,
    Invalid,
    Missing,
}

impl ValidationStatus {
    /// `invalid` and `missing` block a restore
    pub fn is_blocking(&self) -> bool {
        matches!(self, ValidationStatus::Invalid | ValidationStatus::Missing)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentValidation {
    pub component: Component,
    pub status: ValidationStatus,
    pub details: String,
    #[serde(default)]
    pub metadata: MetadataMap,
}

impl ComponentValidation {
    fn new(component: Component, status: ValidationStatus, details: impl Into<String>) -> Self {
        Self {
            component,
            status,
            details: details.into(),
            metadata: MetadataMap::new(),
        }
    }
}

/// Validate every component of the record, in restore order.
///
/// Only a completed backup is restorable; any other status blocks every
/// component without reading storage.
pub async fn validate_components(
    record: &BackupRecord,
    provider: &dyn StorageProvider,
    destination: Option<&str>,
) -> Result<Vec<ComponentValidation>, StorageError> {
    if record.metadata.status != BackupStatus::Completed {
        let details = format!("Backup status is {}", record.metadata.status.as_str());
        return Ok(Component::ALL
            .into_iter()
            .map(|component| ComponentValidation::new(component, ValidationStatus::Invalid, details.clone()))
            .collect());
    }

    let mut validations = Vec::with_capacity(Component::ALL.len());
    for component in Component::ALL {
        let validation = if record.metadata.included(component) {
            validate_component(record, provider, destination, component).await?
        } else {
            ComponentValidation::new(component, ValidationStatus::Warning, "Component not included in backup")
        };
        validations.push(validation);
    }
    Ok(validations)
}

async fn validate_component(
    record: &BackupRecord,
    provider: &dyn StorageProvider,
    destination: Option<&str>,
    component: Component,
) -> Result<ComponentValidation, StorageError> {
    let artifacts = match inspect_component(provider, destination, record.id(), component).await {
        Ok(artifacts) => artifacts,
        Err(ArtifactError::InvalidManifest { path, source }) => {
            let mut validation = ComponentValidation::new(
                component,
                ValidationStatus::Invalid,
                format!("Manifest {} cannot be parsed: {}", path, source),
            );
            validation.metadata.insert("manifest".into(), TaggedValue::plain(path));
            return Ok(validation);
        }
        Err(ArtifactError::Storage(e)) => return Err(e),
    };

    if !artifacts.is_complete() {
        let mut validation = ComponentValidation::new(
            component,
            ValidationStatus::Missing,
            format!("Missing artifacts: {}", artifacts.missing.join(", ")),
        );
        validation
            .metadata
            .insert("missing".into(), TaggedValue::plain(artifacts.missing.clone()));
        return Ok(validation);
    }

    let mut total_size: u64 = 0;
    for path in &artifacts.paths {
        total_size += provider.stat(path).await?.size;
    }

    let mut validation = ComponentValidation::new(component, ValidationStatus::Valid, "Artifacts present");
    validation
        .metadata
        .insert("artifacts".into(), TaggedValue::plain(artifacts.paths.clone()));
    validation
        .metadata
        .insert("sizeBytes".into(), TaggedValue::plain(total_size));

    match &artifacts.layout {
        ArtifactLayout::Collections(manifest) => {
            validation
                .metadata
                .insert("collections".into(), TaggedValue::plain(manifest.collections.len()));
            if manifest.collections.is_empty() {
                validation.status = ValidationStatus::Warning;
                validation.details = "Manifest lists no collections".to_string();
            }
        }
        ArtifactLayout::Single => {
            if total_size == 0 {
                validation.status = ValidationStatus::Warning;
                validation.details = "Artifact is empty".to_string();
            } else if component == Component::Config {
                let raw = provider.read_file(&artifacts.paths[0]).await?;
                if let Err(e) = serde_json::from_slice::<serde_json::Value>(&raw) {
                    validation.status = ValidationStatus::Invalid;
                    validation.details = format!("Config snapshot is not valid JSON: {}", e);
                }
            }
        }
    }

    Ok(validation)
}

/// No blocking validation and, when integrity ran, it passed.
pub fn can_proceed(validations: &[ComponentValidation], integrity_passed: Option<bool>) -> bool {
    !validations.iter().any(|v| v.status.is_blocking()) && integrity_passed.unwrap_or(true)
}

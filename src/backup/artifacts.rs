//! Artifact naming, layout and checksum rules.
//!
//! Both the backup orchestrator and the integrity verifier go through this
//! module, so a checksum recomputed later always covers exactly the artifact
//! set that was hashed at creation time.

use super::types::Component;
use crate::backends::{CollectionSnapshot, ComponentSnapshot};
use crate::error::{BackupError, ErrorCode};
use crate::storage::{artifact_path, file_name, StorageError, StorageProvider};
use bytes::Bytes;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;
use tracing::warn;

const MANIFEST_SUFFIX: &str = "_collections.json";
const COLLECTION_EXTENSION: &str = "snapshot";

lazy_static! {
    static ref BACKUP_ID_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9.-]{0,127}$").unwrap();
}

/// `backup-{utc timestamp}-{8 hex}`, sortable by creation time.
pub fn generate_backup_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("backup-{}-{}", Utc::now().format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

/// Ids become artifact name prefixes, so separators, `_` and traversal are refused.
pub fn validate_backup_id(backup_id: &str) -> Result<(), BackupError> {
    if BACKUP_ID_PATTERN.is_match(backup_id) && !backup_id.contains("..") {
        Ok(())
    } else {
        Err(BackupError::new(
            ErrorCode::InvalidBackupId,
            format!("Invalid backup id '{}'", backup_id),
        ))
    }
}

/// `{backupId}_{component}.{ext}`
pub fn single_artifact_name(backup_id: &str, component: Component) -> String {
    format!("{}_{}.{}", backup_id, component, component.artifact_extension())
}

/// `{backupId}_{component}_collections.json`
pub fn manifest_name(backup_id: &str, component: Component) -> String {
    format!("{}_{}{}", backup_id, component, MANIFEST_SUFFIX)
}

/// `{backupId}_{component}_{collection}.snapshot`
pub fn collection_artifact_name(backup_id: &str, component: Component, collection: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        backup_id,
        component,
        sanitize_unit_name(collection),
        COLLECTION_EXTENSION
    )
}

/// `{backupId}_bundle.tar.gz`; never part of the checksum.
pub fn bundle_name(backup_id: &str) -> String {
    format!("{}_bundle.tar.gz", backup_id)
}

/// Fallback used when two collection names sanitize to the same artifact:
/// the sanitized name plus the first 8 hex digits of sha256 of the raw name.
pub fn disambiguated_artifact_name(backup_id: &str, component: Component, collection: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(collection.as_bytes()));
    format!(
        "{}_{}_{}-{}.{}",
        backup_id,
        component,
        sanitize_unit_name(collection),
        &digest[..8],
        COLLECTION_EXTENSION
    )
}

fn sanitize_unit_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '-' })
        .collect()
}

/// Whether `path` is an artifact of `backup_id` stored under `destination`.
pub fn belongs_to(path: &str, destination: Option<&str>, backup_id: &str) -> bool {
    let name = file_name(path);
    if !name.starts_with(&format!("{}_", backup_id)) {
        return false;
    }
    artifact_path(destination, name) == path
}

/// sha256 over artifact contents concatenated in sorted-path order.
pub fn compute_checksum<'a, I>(artifacts: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut sorted: Vec<(&str, &[u8])> = artifacts.into_iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let mut hasher = Sha256::new();
    for (_, data) in sorted {
        hasher.update(data);
    }
    format!("{:x}", hasher.finalize())
}

/// Manifest written for multi-part components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionManifest {
    pub backup_id: String,
    pub component: Component,
    pub collections: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub artifact: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactLayout {
    Single,
    Collections(CollectionManifest),
}

/// Where a component's artifacts live and which of them are missing.
#[derive(Debug, Clone)]
pub struct ComponentArtifacts {
    pub component: Component,
    pub layout: ArtifactLayout,
    /// Every expected artifact path (manifest included).
    pub paths: Vec<String>,
    pub missing: Vec<String>,
}

impl ComponentArtifacts {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Manifest {path} is not readable: {source}")]
    InvalidManifest {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Persist one component snapshot. Returns the written `(path, bytes)` pairs.
/// On failure the already-written artifacts of this component are removed.
pub async fn write_snapshot(
    provider: &dyn StorageProvider,
    destination: Option<&str>,
    backup_id: &str,
    component: Component,
    snapshot: ComponentSnapshot,
) -> Result<Vec<(String, Bytes)>, StorageError> {
    let mut pending: Vec<(String, Bytes)> = Vec::new();

    match snapshot {
        ComponentSnapshot::Single(data) => {
            pending.push((
                artifact_path(destination, &single_artifact_name(backup_id, component)),
                data,
            ));
        }
        ComponentSnapshot::Collections(collections) => {
            let mut entries = Vec::with_capacity(collections.len());
            let mut taken = HashSet::with_capacity(collections.len());
            for collection in collections {
                let mut artifact = collection_artifact_name(backup_id, component, &collection.name);
                if taken.contains(&artifact) {
                    artifact = disambiguated_artifact_name(backup_id, component, &collection.name);
                }
                if !taken.insert(artifact.clone()) {
                    return Err(StorageError::Backend(format!(
                        "Collection '{}' maps to an artifact name already in use: {}",
                        collection.name, artifact
                    )));
                }
                entries.push(ManifestEntry {
                    name: collection.name,
                    artifact: artifact.clone(),
                    size: collection.data.len() as u64,
                });
                pending.push((artifact_path(destination, &artifact), collection.data));
            }

            let manifest = CollectionManifest {
                backup_id: backup_id.to_string(),
                component,
                collections: entries,
            };
            let manifest_bytes = serde_json::to_vec_pretty(&manifest)
                .map_err(|e| StorageError::Backend(format!("Failed to encode manifest: {}", e)))?;
            pending.push((
                artifact_path(destination, &manifest_name(backup_id, component)),
                Bytes::from(manifest_bytes),
            ));
        }
    }

    let mut written: Vec<(String, Bytes)> = Vec::with_capacity(pending.len());
    for (path, data) in pending {
        if let Err(e) = provider.write_file(&path, &data).await {
            for (done, _) in &written {
                if let Err(cleanup) = provider.remove_file(done).await {
                    warn!(backup_id = %backup_id, path = %done, error = %cleanup, "Failed to remove partial artifact");
                }
            }
            return Err(e);
        }
        written.push((path, data));
    }

    Ok(written)
}

/// Work out a component's layout and check artifact presence. Never touches a
/// live backend.
pub async fn inspect_component(
    provider: &dyn StorageProvider,
    destination: Option<&str>,
    backup_id: &str,
    component: Component,
) -> Result<ComponentArtifacts, ArtifactError> {
    let manifest_path = artifact_path(destination, &manifest_name(backup_id, component));

    if provider.exists(&manifest_path).await? {
        let raw = provider.read_file(&manifest_path).await?;
        let manifest: CollectionManifest =
            serde_json::from_slice(&raw).map_err(|source| ArtifactError::InvalidManifest {
                path: manifest_path.clone(),
                source,
            })?;

        let mut paths = vec![manifest_path];
        let mut missing = Vec::new();
        for entry in &manifest.collections {
            let path = artifact_path(destination, &entry.artifact);
            if !provider.exists(&path).await? {
                missing.push(path.clone());
            }
            paths.push(path);
        }

        return Ok(ComponentArtifacts {
            component,
            layout: ArtifactLayout::Collections(manifest),
            paths,
            missing,
        });
    }

    let single_path = artifact_path(destination, &single_artifact_name(backup_id, component));
    let missing = if provider.exists(&single_path).await? {
        Vec::new()
    } else {
        vec![single_path.clone()]
    };

    Ok(ComponentArtifacts {
        component,
        layout: ArtifactLayout::Single,
        paths: vec![single_path],
        missing,
    })
}

/// Read a component's artifacts back into a snapshot for import.
pub async fn load_snapshot(
    provider: &dyn StorageProvider,
    destination: Option<&str>,
    artifacts: &ComponentArtifacts,
) -> Result<ComponentSnapshot, StorageError> {
    match &artifacts.layout {
        ArtifactLayout::Single => {
            let path = artifacts
                .paths
                .first()
                .ok_or_else(|| StorageError::NotFound(artifacts.component.to_string()))?;
            Ok(ComponentSnapshot::Single(Bytes::from(provider.read_file(path).await?)))
        }
        ArtifactLayout::Collections(manifest) => {
            let mut collections = Vec::with_capacity(manifest.collections.len());
            for entry in &manifest.collections {
                let data = provider
                    .read_file(&artifact_path(destination, &entry.artifact))
                    .await?;
                collections.push(CollectionSnapshot {
                    name: entry.name.clone(),
                    data: Bytes::from(data),
                });
            }
            Ok(ComponentSnapshot::Collections(collections))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorageProvider;

    #[test]
    fn test_naming_convention() {
        assert_eq!(single_artifact_name("b1", Component::Postgres), "b1_postgres.sql");
        assert_eq!(manifest_name("b1", Component::Qdrant), "b1_qdrant_collections.json");
        assert_eq!(
            collection_artifact_name("b1", Component::Qdrant, "docs/v2"),
            "b1_qdrant_docs-v2.snapshot"
        );
        assert_eq!(bundle_name("b1"), "b1_bundle.tar.gz");
    }

    #[test]
    fn test_backup_id_generation_and_validation() {
        let id = generate_backup_id();
        assert!(id.starts_with("backup-"));
        assert!(validate_backup_id(&id).is_ok());
        assert_ne!(id, generate_backup_id());

        for bad in ["", "../etc", "a/b", "b_1", "-lead", "a..b"] {
            let err = validate_backup_id(bad).unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidBackupId);
        }
    }

    #[test]
    fn test_belongs_to_respects_prefix_and_destination() {
        assert!(belongs_to("b1_config.json", None, "b1"));
        assert!(!belongs_to("b10_config.json", None, "b1"));
        assert!(belongs_to("nightly/b1_config.json", Some("nightly"), "b1"));
        assert!(!belongs_to("weekly/b1_config.json", Some("nightly"), "b1"));
        assert!(!belongs_to("nightly/b1_config.json", None, "b1"));
    }

    #[test]
    fn test_checksum_is_order_independent() {
        let a = compute_checksum(vec![("a", b"one".as_slice()), ("b", b"two".as_slice())]);
        let b = compute_checksum(vec![("b", b"two".as_slice()), ("a", b"one".as_slice())]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, compute_checksum(vec![("a", b"two".as_slice()), ("b", b"one".as_slice())]));
    }

    #[tokio::test]
    async fn test_collections_roundtrip_through_manifest() {
        let provider = MemoryStorageProvider::new();
        let snapshot = ComponentSnapshot::Collections(vec![
            CollectionSnapshot { name: "docs".into(), data: Bytes::from_static(b"vectors-1") },
            CollectionSnapshot { name: "faq".into(), data: Bytes::from_static(b"vectors-2") },
        ]);

        let written = write_snapshot(&provider, None, "b1", Component::Qdrant, snapshot.clone())
            .await
            .unwrap();
        assert_eq!(written.len(), 3);

        let inspected = inspect_component(&provider, None, "b1", Component::Qdrant).await.unwrap();
        assert!(inspected.is_complete());
        assert_eq!(inspected.paths.len(), 3);

        let loaded = load_snapshot(&provider, None, &inspected).await.unwrap();
        assert_eq!(loaded, snapshot);

        provider.remove_file("b1_qdrant_faq.snapshot").await.unwrap();
        let inspected = inspect_component(&provider, None, "b1", Component::Qdrant).await.unwrap();
        assert_eq!(inspected.missing, vec!["b1_qdrant_faq.snapshot".to_string()]);
    }

    #[tokio::test]
    async fn test_colliding_collection_names_get_distinct_artifacts() {
        let provider = MemoryStorageProvider::new();
        let snapshot = ComponentSnapshot::Collections(vec![
            CollectionSnapshot { name: "docs/v2".into(), data: Bytes::from_static(b"AAAA") },
            CollectionSnapshot { name: "docs v2".into(), data: Bytes::from_static(b"BBBB") },
        ]);

        let written = write_snapshot(&provider, None, "b1", Component::Qdrant, snapshot.clone())
            .await
            .unwrap();
        let mut paths: Vec<&str> = written.iter().map(|(path, _)| path.as_str()).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 3);
        assert!(paths.contains(&"b1_qdrant_docs-v2.snapshot"));
        assert!(paths.contains(&disambiguated_artifact_name("b1", Component::Qdrant, "docs v2").as_str()));

        let inspected = inspect_component(&provider, None, "b1", Component::Qdrant).await.unwrap();
        assert!(inspected.is_complete());
        let loaded = load_snapshot(&provider, None, &inspected).await.unwrap();
        assert_eq!(loaded, snapshot);

        let stored: Vec<(String, Vec<u8>)> = {
            let mut out = Vec::new();
            for path in &inspected.paths {
                out.push((path.clone(), provider.read_file(path).await.unwrap()));
            }
            out
        };
        let expected = compute_checksum(written.iter().map(|(p, d)| (p.as_str(), &d[..])));
        let actual = compute_checksum(stored.iter().map(|(p, d)| (p.as_str(), d.as_slice())));
        assert_eq!(expected, actual);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_reported() {
        let provider = MemoryStorageProvider::new();
        provider.write_file("b1_qdrant_collections.json", b"not json").await.unwrap();
        let err = inspect_component(&provider, None, "b1", Component::Qdrant).await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidManifest { .. }));
    }
}

use std::collections::HashSet;
use std::io::{Cursor, Read};

use thiserror::Error;
use zip::ZipArchive;

use crate::manifest::{self, H5pMeta, ScormManifest};
use crate::storage::{sanitize_relative_path, ContentStore};

/// Well-known metadata file names captured in-pass during extraction.
const SCORM_MANIFEST_NAME: &str = "imsmanifest.xml";
const H5P_JSON_NAME: &str = "h5p.json";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("the uploaded file is not a valid ZIP archive: {0}")]
    InvalidArchive(String),
    #[error("the uploaded file is corrupted (CRC error in '{0}')")]
    CorruptArchive(String),
    #[error("storage error during extraction")]
    Storage(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    Scorm,
    H5p,
}

impl PackageKind {
    fn dir_prefix(self) -> &'static str {
        match self {
            PackageKind::Scorm => "package",
            PackageKind::H5p => "h5p",
        }
    }
}

/// Result of a successful extraction pass.
#[derive(Debug, Default)]
pub struct Extracted {
    /// Full storage paths of every file written.
    pub file_paths: HashSet<String>,
    pub scorm_manifest: Option<ScormManifest>,
    pub h5p_meta: Option<H5pMeta>,
}

/// Deterministic extraction directory name: derived from the stable record
/// id and the archive basename, never from archive content, so re-extraction
/// is idempotent and storage paths stay debuggable.
pub fn extraction_dir_name(kind: PackageKind, id: i64, archive_name: &str) -> String {
    let basename = archive_name.rsplit('/').next().unwrap_or(archive_name);
    let stem = basename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename);
    format!("{}_{}_{}", kind.dir_prefix(), id, stem)
}

/// CRC-check every member before anything is persisted, so a corrupted
/// upload surfaces as a validation error instead of a half-extracted tree.
pub fn validate_archive(bytes: &[u8]) -> Result<(), ExtractError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::InvalidArchive(e.to_string()))?;
    for i in 0..archive.len() {
        let mut member = archive
            .by_index(i)
            .map_err(|e| ExtractError::InvalidArchive(e.to_string()))?;
        let name = member.name().to_string();
        let mut sink = Vec::new();
        if member.read_to_end(&mut sink).is_err() {
            return Err(ExtractError::CorruptArchive(name));
        }
    }
    Ok(())
}

/// Extract an archive into `{content_prefix}/{dir_name}/...` through the
/// storage abstraction.
///
/// Members whose normalized name is empty, collapses to `.`, is absolute, or
/// escapes upward are skipped with a warning; extraction continues. Existing
/// paths are deleted before writing so replacement re-extraction does not
/// accumulate renamed copies on backends without overwrite semantics.
///
/// Concurrent re-extraction of the same package is not synchronized; callers
/// own that race. No ceiling is enforced on extracted bytes or entry count
/// (open hardening item).
pub async fn extract_package(
    store: &dyn ContentStore,
    content_prefix: &str,
    dir_name: &str,
    bytes: &[u8],
    kind: PackageKind,
) -> Result<Extracted, ExtractError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::InvalidArchive(e.to_string()))?;
    let content_prefix = content_prefix.trim_end_matches('/');

    let mut out = Extracted::default();
    let mut scorm_manifest_raw: Option<Vec<u8>> = None;
    let mut h5p_json_raw: Option<Vec<u8>> = None;
    let mut has_library_files = false;

    for i in 0..archive.len() {
        let mut member = archive
            .by_index(i)
            .map_err(|e| ExtractError::InvalidArchive(e.to_string()))?;
        if member.is_dir() {
            continue;
        }
        let raw_name = member.name().to_string();

        let Some(normalized) = sanitize_relative_path(&raw_name) else {
            tracing::warn!(member = %raw_name, "skipping suspicious ZIP member");
            continue;
        };

        let mut data = Vec::new();
        if member.read_to_end(&mut data).is_err() {
            return Err(ExtractError::CorruptArchive(raw_name));
        }

        // Capture well-known metadata in the same pass to avoid a second
        // storage round trip.
        match (kind, raw_name.as_str()) {
            (PackageKind::Scorm, SCORM_MANIFEST_NAME) => {
                scorm_manifest_raw = Some(data.clone());
            }
            (PackageKind::H5p, H5P_JSON_NAME) => {
                h5p_json_raw = Some(data.clone());
            }
            _ => {}
        }

        // Library directories (e.g. H5P.InteractiveVideo-1.27/) live outside
        // content/; a package with none cannot be played standalone.
        if kind == PackageKind::H5p
            && normalized.contains('/')
            && !normalized.starts_with("content/")
        {
            has_library_files = true;
        }

        let storage_path = format!("{content_prefix}/{dir_name}/{normalized}");
        store.delete(&storage_path).await?;
        store.save(&storage_path, &data).await?;
        out.file_paths.insert(storage_path);
    }

    if kind == PackageKind::H5p && !has_library_files {
        tracing::warn!(
            dir = %dir_name,
            "H5P package contains no library files; standalone playback needs \
             bundled library JS (an editor export, not a 'Reuse' export)"
        );
    }

    if let Some(raw) = scorm_manifest_raw {
        match String::from_utf8(raw).map_err(|_| manifest::ManifestError::Xml) {
            Ok(xml) => match manifest::parse_scorm_manifest(&xml) {
                Ok(parsed) => out.scorm_manifest = Some(parsed),
                Err(e) => tracing::warn!(error = %e, "error parsing manifest"),
            },
            Err(e) => tracing::warn!(error = %e, "error parsing manifest"),
        }
    }
    if let Some(raw) = h5p_json_raw {
        match manifest::parse_h5p_json(&raw) {
            Ok(meta) => out.h5p_meta = Some(meta),
            Err(e) => tracing::warn!(error = %e, "error parsing h5p.json"),
        }
    }

    Ok(out)
}

/// Recursively delete an extracted tree under the content prefix.
///
/// Failures are logged and swallowed: cleanup must never fail the
/// user-visible operation that triggered it. A suspicious extracted_path is
/// refused outright.
pub async fn delete_extracted_tree(store: &dyn ContentStore, content_prefix: &str, extracted_path: &str) {
    let Some(normalized) = sanitize_relative_path(extracted_path) else {
        tracing::warn!(path = %extracted_path, "refusing to delete suspicious extracted path");
        return;
    };
    let prefix = format!("{}/{}", content_prefix.trim_end_matches('/'), normalized);
    let files = match store.list_files(&prefix).await {
        Ok(files) => files,
        Err(e) => {
            tracing::warn!(prefix = %prefix, error = %e, "failed to list extracted content for deletion");
            return;
        }
    };
    for file in files {
        if let Err(e) = store.delete(&file).await {
            tracing::warn!(path = %file, error = %e, "failed to delete extracted file");
        }
    }
}

/// After a same-path replacement re-extraction, delete files that existed in
/// the old extraction but are absent from the new one.
pub async fn cleanup_stale_files(
    store: &dyn ContentStore,
    old_files: &HashSet<String>,
    new_files: &HashSet<String>,
) {
    for stale in old_files.difference(new_files) {
        if let Err(e) = store.delete(stale).await {
            tracing::warn!(path = %stale, error = %e, "failed to delete stale extracted file after replacement");
        }
    }
}

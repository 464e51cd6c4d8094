//! Per-provider directory store for raw source files.
//!
//! Layout: `<sources_dir>/<provider>/<filesystem_safe_name>.<ext>`.
//! Writes land in a hidden temp file in the same directory and are renamed
//! into place, so readers only ever observe complete files.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use super::{Provider, SourceError, SourceFile, SourceFormat, content_hash};
use crate::identifier::PublicationIdentifier;

/// Store for downloaded source files.
#[derive(Debug, Clone)]
pub struct SourceStore {
    root: PathBuf,
}

impl SourceStore {
    /// Creates a store rooted at `root` (typically `<cache_root>/sources`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn provider_dir(&self, provider: &Provider) -> PathBuf {
        self.root.join(provider.dir_name())
    }

    /// Path a file for `id` from `provider` in `format` is stored at.
    #[must_use]
    pub fn path_for(
        &self,
        id: &PublicationIdentifier,
        provider: &Provider,
        format: SourceFormat,
    ) -> PathBuf {
        self.provider_dir(provider).join(format!(
            "{}.{}",
            id.filesystem_safe_name,
            format.extension()
        ))
    }

    /// Atomically writes `bytes` for `id` and returns the resulting [`SourceFile`].
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] if the directory cannot be created or the
    /// write/rename fails. A failed write leaves no partial file behind.
    #[instrument(skip(self, bytes), fields(id = %id.canonical_key, provider = %provider, format = %format, size = bytes.len()))]
    pub async fn persist(
        &self,
        id: &PublicationIdentifier,
        provider: &Provider,
        format: SourceFormat,
        bytes: &[u8],
    ) -> Result<SourceFile, SourceError> {
        let dir = self.provider_dir(provider);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| SourceError::io(&dir, e))?;

        let final_path = self.path_for(id, provider, format);
        write_atomic(&final_path, bytes).await?;

        let modified_at = modified_time(&final_path).await?;
        debug!(path = %final_path.display(), "source file persisted");

        Ok(SourceFile {
            path: final_path,
            identifier: id.canonical_key.clone(),
            provider: provider.clone(),
            format,
            content_hash: content_hash(bytes),
            size_bytes: bytes.len() as u64,
            downloaded_at: Utc::now(),
            modified_at,
        })
    }

    /// Builds a [`SourceFile`] for an existing file by hashing its contents.
    ///
    /// `downloaded_at` is taken from the file's modification time.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] if the file cannot be read.
    pub async fn describe(
        &self,
        path: &Path,
        identifier: &str,
        provider: Provider,
        format: SourceFormat,
    ) -> Result<SourceFile, SourceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SourceError::io(path, e))?;
        let modified_at = modified_time(path).await?;
        Ok(SourceFile {
            path: path.to_path_buf(),
            identifier: identifier.to_string(),
            provider,
            format,
            content_hash: content_hash(&bytes),
            size_bytes: bytes.len() as u64,
            downloaded_at: modified_at,
            modified_at,
        })
    }

    /// Lists provider directories currently present, as providers.
    ///
    /// A missing store root yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] when the root exists but cannot be listed.
    pub async fn existing_providers(&self) -> Result<Vec<Provider>, SourceError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SourceError::io(&self.root, e)),
        };

        let mut providers = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SourceError::io(&self.root, e))?
        {
            let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
            if is_dir {
                if let Some(name) = entry.file_name().to_str() {
                    providers.push(Provider::from_name(name));
                }
            }
        }
        providers.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(providers)
    }
}

/// Writes `bytes` to a unique temp file beside `path` and renames it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SourceError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("source");
    let tmp_path = path.with_file_name(format!(".{file_name}.{:016x}.tmp", rand::random::<u64>()));

    if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(SourceError::io(&tmp_path, e));
    }
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(SourceError::io(path, e));
    }
    Ok(())
}

async fn modified_time(path: &Path) -> Result<DateTime<Utc>, SourceError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| SourceError::io(path, e))?;
    let modified = metadata.modified().map_err(|e| SourceError::io(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identifier::{IdentifierSet, PrecedencePolicy, resolve};

    fn doi_id() -> PublicationIdentifier {
        resolve(
            &IdentifierSet::default().with_doi("10.1000/abc.def"),
            &PrecedencePolicy::default(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_persist_writes_into_provider_dir() {
        let temp = tempfile::tempdir().unwrap();
        let store = SourceStore::new(temp.path().join("sources"));
        let id = doi_id();

        let file = store
            .persist(&id, &Provider::Pmc, SourceFormat::Xml, b"<article/>")
            .await
            .unwrap();

        assert_eq!(file.path, store.path_for(&id, &Provider::Pmc, SourceFormat::Xml));
        assert!(file.path.starts_with(temp.path().join("sources").join("pmc")));
        assert_eq!(file.size_bytes, 10);
        assert_eq!(file.content_hash, content_hash(b"<article/>"));
        assert_eq!(std::fs::read(&file.path).unwrap(), b"<article/>");
    }

    #[tokio::test]
    async fn test_persist_leaves_no_temp_files() {
        let temp = tempfile::tempdir().unwrap();
        let store = SourceStore::new(temp.path());
        let id = doi_id();

        store
            .persist(&id, &Provider::Arxiv, SourceFormat::Pdf, b"%PDF-1.4")
            .await
            .unwrap();
        store
            .persist(&id, &Provider::Arxiv, SourceFormat::Pdf, b"%PDF-1.5")
            .await
            .unwrap();

        let entries: Vec<_> = std::fs::read_dir(temp.path().join("arxiv"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn test_describe_matches_persist_hash() {
        let temp = tempfile::tempdir().unwrap();
        let store = SourceStore::new(temp.path());
        let id = doi_id();
        let written = store
            .persist(&id, &Provider::Unpaywall, SourceFormat::Pdf, b"%PDF-1.4 body")
            .await
            .unwrap();

        let described = store
            .describe(&written.path, &id.canonical_key, Provider::Unpaywall, SourceFormat::Pdf)
            .await
            .unwrap();
        assert_eq!(described.content_hash, written.content_hash);
        assert_eq!(described.modified_at, written.modified_at);
    }

    #[tokio::test]
    async fn test_existing_providers_missing_root() {
        let temp = tempfile::tempdir().unwrap();
        let store = SourceStore::new(temp.path().join("nope"));
        assert!(store.existing_providers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_existing_providers_lists_dirs() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("pmc")).unwrap();
        std::fs::create_dir_all(temp.path().join("oa_api")).unwrap();
        std::fs::write(temp.path().join("stray.txt"), b"x").unwrap();
        let store = SourceStore::new(temp.path());

        let providers = store.existing_providers().await.unwrap();
        assert_eq!(
            providers,
            vec![Provider::Other("oa_api".to_string()), Provider::Pmc]
        );
    }
}

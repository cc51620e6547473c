//! Per-user file storage under a root directory.
//!
//! Layout: `<root>/<user_id>/<file_name>`, plus the reserved
//! [`FILE_LIST_NAME`] manifest in each user directory.

use crate::error::StoreError;
use crate::protocol::{CHUNK_SIZE, FILE_LIST_NAME};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Reject names that would escape the user directory or shadow the manifest.
pub fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name == FILE_LIST_NAME
        || name.contains(['/', '\\', '\0', char::REPLACEMENT_CHARACTER]);
    if invalid {
        Err(StoreError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root directory if it does not exist yet.
    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn user_dir(&self, user_id: u32) -> PathBuf {
        self.root.join(user_id.to_string())
    }

    pub fn manifest_path(&self, user_id: u32) -> PathBuf {
        self.user_dir(user_id).join(FILE_LIST_NAME)
    }

    pub fn file_path(&self, user_id: u32, name: &str) -> Result<PathBuf, StoreError> {
        validate_name(name)?;
        Ok(self.user_dir(user_id).join(name))
    }

    pub async fn ensure_user_dir(&self, user_id: u32) -> Result<(), StoreError> {
        fs::create_dir_all(self.user_dir(user_id)).await?;
        Ok(())
    }

    /// Stream exactly `total_size` bytes from `source` into the named file,
    /// creating or overwriting it.
    ///
    /// The source is always consumed up to `total_size` bytes (or its end),
    /// even when the file cannot be written, so the caller can still answer
    /// on the same connection. On any failure the file is removed.
    pub async fn write_payload<R>(
        &self,
        user_id: u32,
        name: &str,
        total_size: u32,
        source: &mut R,
    ) -> Result<u64, StoreError>
    where
        R: AsyncRead + Unpin,
    {
        let expected = u64::from(total_size);

        let path = match self.file_path(user_id, name) {
            Ok(path) => path,
            Err(e) => {
                discard(source, expected).await;
                return Err(e);
            }
        };

        let mut file = match File::create(&path).await {
            Ok(file) => file,
            Err(e) => {
                discard(source, expected).await;
                return Err(e.into());
            }
        };

        let mut buf = [0u8; CHUNK_SIZE];
        let mut received: u64 = 0;
        let mut write_err: Option<io::Error> = None;

        while received < expected {
            let want = (expected - received).min(CHUNK_SIZE as u64) as usize;
            let n = match source.read(&mut buf[..want]).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "payload read failed");
                    break;
                }
            };
            received += n as u64;
            if write_err.is_none() {
                if let Err(e) = file.write_all(&buf[..n]).await {
                    write_err = Some(e);
                }
            }
        }

        let outcome = match write_err {
            Some(e) => Err(StoreError::Io(e)),
            None if received < expected => Err(StoreError::Incomplete { expected, received }),
            None => file.flush().await.map_err(StoreError::Io),
        };
        drop(file);

        if let Err(e) = outcome {
            if let Err(rm) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %rm, "failed to remove partial file");
            }
            return Err(e);
        }

        Ok(received)
    }

    /// Open a stored file for streaming. The size must fit the 4-byte
    /// payload field.
    pub async fn read_payload(&self, user_id: u32, name: &str) -> Result<(u32, File), StoreError> {
        let path = self.file_path(user_id, name)?;
        open_sized(&path).await
    }

    /// Open the manifest written by [`FileStore::generate_manifest`].
    pub async fn read_manifest(&self, user_id: u32) -> Result<(u32, File), StoreError> {
        open_sized(&self.manifest_path(user_id)).await
    }

    pub async fn contains(&self, user_id: u32, name: &str) -> Result<bool, StoreError> {
        let path = self.file_path(user_id, name)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a stored file. `Ok(false)` when there was nothing to remove.
    pub async fn delete_file(&self, user_id: u32, name: &str) -> Result<bool, StoreError> {
        let path = self.file_path(user_id, name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Regular files directly under the user directory, manifest excluded,
    /// sorted by name.
    pub async fn list_files(&self, user_id: u32) -> Result<Vec<String>, StoreError> {
        let mut names = Vec::new();
        let mut dir = match fs::read_dir(self.user_dir(user_id)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name != FILE_LIST_NAME {
                names.push(name);
            }
        }

        names.sort();
        Ok(names)
    }

    /// Write the file list, one name per line, over any previous manifest.
    pub async fn generate_manifest(&self, user_id: u32) -> Result<PathBuf, StoreError> {
        let names = self.list_files(user_id).await?;
        let mut contents = String::new();
        for name in &names {
            contents.push_str(name);
            contents.push('\n');
        }

        let path = self.manifest_path(user_id);
        fs::write(&path, contents).await?;
        debug!(user_id, files = names.len(), "manifest written");
        Ok(path)
    }

    /// True when the user directory is missing or holds nothing but the
    /// manifest.
    pub async fn user_has_no_files(&self, user_id: u32) -> Result<bool, StoreError> {
        let mut dir = match fs::read_dir(self.user_dir(user_id)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            if entry.file_name() != FILE_LIST_NAME {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// Size comes from the open handle.
async fn open_sized(path: &Path) -> Result<(u32, File), StoreError> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    let size = u32::try_from(len).map_err(|_| StoreError::TooLarge(len))?;
    Ok((size, file))
}

// Read and drop up to `remaining` bytes.
async fn discard<R: AsyncRead + Unpin>(source: &mut R, remaining: u64) {
    let mut limited = source.take(remaining);
    if let Err(e) = tokio::io::copy(&mut limited, &mut tokio::io::sink()).await {
        debug!(error = %e, "failed to drain payload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("notes.txt").is_ok());
        assert!(validate_name("..hidden").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "nul\0", FILE_LIST_NAME, "bad\u{fffd}"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_write_and_read_payload() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        store.ensure_user_dir(42).await.unwrap();

        let data = vec![7u8; CHUNK_SIZE * 3 + 5];
        let written = store
            .write_payload(42, "blob.bin", data.len() as u32, &mut data.as_slice())
            .await
            .unwrap();
        assert_eq!(written as usize, data.len());

        let (size, mut file) = store.read_payload(42, "blob.bin").await.unwrap();
        assert_eq!(size as usize, data.len());
        let mut back = Vec::new();
        file.read_to_end(&mut back).await.unwrap();
        assert_eq!(back, data);
    }

    #[tokio::test]
    async fn test_short_payload_leaves_no_file() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        store.ensure_user_dir(1).await.unwrap();

        let err = store
            .write_payload(1, "cut.txt", 10, &mut &b"abc"[..])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Incomplete {
                expected: 10,
                received: 3
            }
        ));
        assert!(!store.user_dir(1).join("cut.txt").exists());
    }

    #[tokio::test]
    async fn test_invalid_name_drains_payload() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        store.ensure_user_dir(1).await.unwrap();

        let mut source: &[u8] = b"abcdeXYZ";
        let err = store
            .write_payload(1, "../escape", 5, &mut source)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidName(_)));
        assert_eq!(source, b"XYZ");
    }

    #[tokio::test]
    async fn test_delete_file() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        store.ensure_user_dir(5).await.unwrap();
        std::fs::write(store.user_dir(5).join("a.txt"), "a").unwrap();

        assert!(store.delete_file(5, "a.txt").await.unwrap());
        assert!(!store.delete_file(5, "a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_and_manifest() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());
        store.ensure_user_dir(9).await.unwrap();
        let dir = store.user_dir(9);
        std::fs::write(dir.join("b.txt"), "b").unwrap();
        std::fs::write(dir.join("a.txt"), "a").unwrap();
        std::fs::create_dir(dir.join("subdir")).unwrap();

        let path = store.generate_manifest(9).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a.txt\nb.txt\n");
        let (size, mut manifest) = store.read_manifest(9).await.unwrap();
        assert_eq!(size, 12);
        let mut listed = String::new();
        manifest.read_to_string(&mut listed).await.unwrap();
        assert_eq!(listed, "a.txt\nb.txt\n");

        // A second listing must not pick up the manifest itself.
        assert_eq!(store.list_files(9).await.unwrap(), ["a.txt", "b.txt"]);
        store.generate_manifest(9).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a.txt\nb.txt\n");
    }

    #[tokio::test]
    async fn test_user_has_no_files() {
        let tmp = tempdir().unwrap();
        let store = FileStore::new(tmp.path());

        assert!(store.user_has_no_files(3).await.unwrap());
        store.ensure_user_dir(3).await.unwrap();
        assert!(store.user_has_no_files(3).await.unwrap());

        std::fs::write(store.manifest_path(3), "").unwrap();
        assert!(store.user_has_no_files(3).await.unwrap());

        std::fs::write(store.user_dir(3).join("x"), "x").unwrap();
        assert!(!store.user_has_no_files(3).await.unwrap());
    }
}

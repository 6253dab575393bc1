use anyhow::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Owns the on-disk layout for dataset uploads, trained model artifacts and
/// export archives.
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Trained adapter artifact directory for a job.
    pub fn model_dir(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("models").join(job_id)
    }

    /// Export artifact directory for a job.
    pub fn export_dir(&self, job_id: &str) -> PathBuf {
        self.data_dir.join("exports").join(job_id)
    }

    pub async fn save_upload(&self, filename: &str, content: &[u8]) -> Result<PathBuf> {
        let dir_path = self.uploads_dir();
        fs::create_dir_all(&dir_path).await?;

        let file_path = dir_path.join(filename);
        fs::write(&file_path, content).await?;

        Ok(file_path)
    }

    pub async fn delete_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await?;
        Ok(())
    }

    /// Remove a directory tree, reporting how many files and bytes it held.
    /// A missing directory counts as zero.
    pub async fn remove_dir_reporting(&self, path: &Path) -> Result<(u64, u64)> {
        if !path.exists() {
            return Ok((0, 0));
        }

        let (files, bytes) = dir_stats(path).await?;
        fs::remove_dir_all(path).await?;

        Ok((files, bytes))
    }

    /// Build the stored filename for an upload: opaque id plus the original
    /// extension, so concurrent uploads never collide.
    pub fn stored_filename(dataset_id: &str, original_filename: &str) -> String {
        let extension = Path::new(original_filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        if extension.is_empty() {
            dataset_id.to_string()
        } else {
            format!("{}.{}", dataset_id, extension)
        }
    }
}

async fn dir_stats(root: &Path) -> Result<(u64, u64)> {
    let mut files = 0u64;
    let mut bytes = 0u64;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
            } else {
                files += 1;
                bytes += entry.metadata().await?.len();
            }
        }
    }

    Ok((files, bytes))
}

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Handle to a loaded fine-tuned model. Loading is currently a directory
/// check plus metadata read; a real inference backend would hold weights
/// here.
#[derive(Debug)]
pub struct ModelHandle {
    pub path: PathBuf,
    pub loaded_at: DateTime<Utc>,
}

impl ModelHandle {
    /// Simulated text generation against the loaded adapter.
    pub fn generate(&self, prompt: &str, max_new_tokens: u32) -> String {
        let continuation = format!(
            " [generated by adapter at {} ({} tokens max)]",
            self.path.display(),
            max_new_tokens
        );
        format!("{prompt}{continuation}")
    }
}

/// Size-bounded cache of loaded models keyed by artifact path. Least
/// recently used handles are evicted when capacity is reached.
pub struct ModelCache {
    inner: Mutex<LruCache<String, Arc<ModelHandle>>>,
}

impl ModelCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1");
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get_or_load(&self, path: &str) -> Result<Arc<ModelHandle>> {
        let mut cache = self.inner.lock().expect("model cache lock poisoned");

        if let Some(handle) = cache.get(path) {
            return Ok(handle.clone());
        }

        let dir = Path::new(path);
        if !dir.is_dir() {
            bail!("Model artifact directory {} does not exist", path);
        }

        let handle = Arc::new(ModelHandle {
            path: dir.to_path_buf(),
            loaded_at: Utc::now(),
        });
        cache.put(path.to_string(), handle.clone());

        tracing::info!("Loaded model from {}", path);
        Ok(handle)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("model cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

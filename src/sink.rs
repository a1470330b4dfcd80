use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An accepted, non-duplicate page as handed downstream for indexing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedPage {
    pub url: String,
    pub terms: HashMap<String, u32>,
    pub word_count: usize,
    pub crawled_at: chrono::DateTime<chrono::Utc>,
}

/// Downstream consumer of accepted pages. Tokenization beyond the extracted
/// term weights and all index persistence happen behind this boundary.
pub trait PageSink: Send + Sync {
    fn accept(&self, page: &AcceptedPage) -> Result<(), SinkError>;

    fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Appends one JSON object per accepted page.
pub struct JsonlPageSink {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl JsonlPageSink {
    /// Open `path` for appending, or truncate it when `fresh`.
    pub fn open<P: AsRef<Path>>(path: P, fresh: bool) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!fresh)
            .truncate(fresh)
            .open(&path)?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageSink for JsonlPageSink {
    fn accept(&self, page: &AcceptedPage) -> Result<(), SinkError> {
        let line = serde_json::to_vec(page)?;
        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), SinkError> {
        self.writer.lock().flush()?;
        Ok(())
    }
}

/// Keeps accepted pages in memory.
#[derive(Default)]
pub struct MemoryPageSink {
    pages: Mutex<Vec<AcceptedPage>>,
}

impl MemoryPageSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn urls(&self) -> Vec<String> {
        self.pages.lock().iter().map(|p| p.url.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

impl PageSink for MemoryPageSink {
    fn accept(&self, page: &AcceptedPage) -> Result<(), SinkError> {
        self.pages.lock().push(page.clone());
        Ok(())
    }
}

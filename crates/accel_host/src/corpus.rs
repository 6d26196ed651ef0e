//! Benchmark inputs loaded from disk.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// One named input.
pub struct CorpusFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Inputs processed together, laid side by side in one output region.
pub struct Corpus {
    files: Vec<CorpusFile>,
}

impl Corpus {
    /// Reads every file in `paths`. Directories contribute their regular
    /// files in name order.
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let mut files = Vec::new();
        for path in paths {
            if path.is_dir() {
                let mut entries = fs::read_dir(path)
                    .with_context(|| format!("Failed to list {}", path.display()))?
                    .map(|entry| entry.map(|e| e.path()))
                    .collect::<std::io::Result<Vec<_>>>()
                    .with_context(|| format!("Failed to list {}", path.display()))?;
                entries.sort();
                for entry in entries.iter().filter(|p| p.is_file()) {
                    files.push(load_file(entry)?);
                }
            } else {
                files.push(load_file(path)?);
            }
        }
        if files.is_empty() {
            bail!("no input files");
        }
        Ok(Self { files })
    }

    #[cfg(test)]
    pub fn from_files(files: Vec<CorpusFile>) -> Self {
        Self { files }
    }

    pub fn files(&self) -> &[CorpusFile] {
        &self.files
    }

    pub fn lens(&self) -> impl Iterator<Item = usize> + '_ {
        self.files.iter().map(|f| f.data.len())
    }

    pub fn max_len(&self) -> usize {
        self.lens().max().unwrap_or(0)
    }
}

fn load_file(path: &Path) -> Result<CorpusFile> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    debug!(%name, len = data.len(), "loaded input");
    Ok(CorpusFile { name, data })
}

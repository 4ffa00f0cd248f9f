use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::SystemTime;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Name of the metadata artifact inside the index root. Segment enumeration
/// only considers integer-named directories, so this file is invisible to
/// queries.
const METADATA_FILE: &str = "metadata.bin";

/// Size and modification time of one corpus file at index time.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct FileMeta {
    pub size: u64,
    pub mtime: SystemTime,
}

/// Per-file metadata captured while a corpus is indexed. Nothing reads it
/// back during construction or queries; it exists so a future incremental
/// mode can tell which files changed since the index was built.
#[derive(Serialize, Deserialize, Default)]
pub struct CorpusMetadata {
    /// Maps each indexed pathname to its size and mtime at index time.
    pub files: HashMap<String, FileMeta>,
}

impl CorpusMetadata {
    /// Records the current size and mtime of `path`.
    pub fn record(&mut self, path: &Path) -> anyhow::Result<()> {
        let stat = fs::metadata(path).with_context(|| format!("stat corpus file {path:?}"))?;
        let mtime = stat
            .modified()
            .with_context(|| format!("mtime of corpus file {path:?}"))?;
        self.files.insert(
            path.to_string_lossy().into_owned(),
            FileMeta {
                size: stat.len(),
                mtime,
            },
        );
        Ok(())
    }

    /// Whether `path` still has the size and mtime recorded at index time.
    /// Missing files and files never recorded both count as changed.
    pub fn is_unchanged(&self, path: &Path) -> bool {
        let recorded = match self.files.get(path.to_string_lossy().as_ref()) {
            Some(meta) => *meta,
            None => return false,
        };
        let stat = match fs::metadata(path) {
            Ok(stat) => stat,
            Err(_) => return false,
        };
        match stat.modified() {
            Ok(mtime) => {
                recorded
                    == FileMeta {
                        size: stat.len(),
                        mtime,
                    }
            }
            Err(_) => false,
        }
    }
}

/// Persists the metadata artifact at the index root.
pub fn write_metadata(index_root: &Path, metadata: &CorpusMetadata) -> anyhow::Result<()> {
    let path = index_root.join(METADATA_FILE);
    let mut writer =
        BufWriter::new(File::create(&path).with_context(|| format!("create {path:?}"))?);
    bincode2::serialize_into(&mut writer, metadata)
        .with_context(|| format!("serialize metadata into {path:?}"))
}

/// Loads the metadata artifact from an index root.
pub fn read_metadata(index_root: &Path) -> anyhow::Result<CorpusMetadata> {
    let path = index_root.join(METADATA_FILE);
    let mut reader = BufReader::new(File::open(&path).with_context(|| format!("open {path:?}"))?);
    bincode2::deserialize_from(&mut reader).with_context(|| format!("deserialize {path:?}"))
}

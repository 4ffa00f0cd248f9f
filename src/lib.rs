pub mod lexer;
pub mod metadata;
pub mod query;
pub mod segment;
pub mod sorter;

use anyhow::Context;
use indicatif::ProgressBar;

use std::fs::{self, OpenOptions};
use std::io::{stderr, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use lexer::terms_in_file;
use metadata::{write_metadata, CorpusMetadata};
use segment::{merge_segments, segment_dirs, write_segment, Posting};
use sorter::{RunBuffer, MAX_RUN_POSTINGS};

pub struct Config {
    pub index_path: PathBuf,  /* target index directory, must not exist yet */
    pub corpus_path: PathBuf, /* directory tree to index */
    pub max_run_postings: usize, /* in-memory bound of the external sort */
    pub sender: mpsc::Sender<String>, /* non-fatal progress and warning messages */
}

impl Config {
    pub fn new(index_path: PathBuf, corpus_path: PathBuf, sender: mpsc::Sender<String>) -> Self {
        Self {
            index_path,
            corpus_path,
            max_run_postings: MAX_RUN_POSTINGS,
            sender,
        }
    }
}

/// Where channel messages end up: stderr, or appended to a log file.
#[derive(Clone)]
pub enum ErrorHandler {
    Stderr,
    File(PathBuf),
}

/// Drains the message channel until every sender is dropped, writing each
/// message per the `ErrorHandler`. Run on its own thread; join it after
/// dropping the last sender so nothing queued is lost.
pub fn handle_messages(
    receiver: &mpsc::Receiver<String>,
    error_handler: &ErrorHandler,
) -> anyhow::Result<()> {
    while let Ok(message) = receiver.recv() {
        match error_handler {
            ErrorHandler::Stderr => {
                let mut stderr = stderr().lock();
                let _ = writeln!(stderr, "{message}");
            }
            ErrorHandler::File(f) => {
                let mut file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(f)
                    .context("opening log file")?;

                let _ = writeln!(file, "{message}");
            }
        }
    }
    Ok(())
}

/// Builds a fresh index over every file under `cfg.corpus_path`.
///
/// Tokenized postings stream into a bounded in-memory run buffer; each full
/// run is sorted and written out as one segment named by its zero-based
/// ordinal, and after the final partial run all segments are merged into a
/// single one. Any unreadable corpus file aborts the build, leaving a
/// partial index for the operator to delete.
pub fn build_index(cfg: &Config) -> anyhow::Result<()> {
    fs::create_dir(&cfg.index_path)
        .with_context(|| format!("create index dir {:?}", cfg.index_path))?;

    let files = read_files_recursively(&cfg.corpus_path)?;
    let bar = ProgressBar::new(files.len() as u64);

    let mut corpus_meta = CorpusMetadata::default();
    let mut run = RunBuffer::new(cfg.max_run_postings);
    let mut next_run = 0u64;

    for file in &files {
        bar.inc(1);
        let doc_id = file.to_string_lossy().into_owned();
        let terms = terms_in_file(file)?;
        corpus_meta.record(file)?;
        for term in terms {
            run.push(Posting {
                term,
                path: doc_id.clone(),
            });
            if run.is_full() {
                flush_run(cfg, &mut run, &mut next_run)?;
            }
        }
    }
    if !run.is_empty() {
        flush_run(cfg, &mut run, &mut next_run)?;
    }
    bar.finish();

    write_metadata(&cfg.index_path, &corpus_meta).context("write corpus metadata")?;

    let segments = segment_dirs(&cfg.index_path)?;
    merge_segments(&cfg.index_path, &segments).context("merge run segments")?;

    println!("Indexed {} files in {} run(s)", files.len(), next_run);
    Ok(())
}

fn flush_run(cfg: &Config, run: &mut RunBuffer, next_run: &mut u64) -> anyhow::Result<()> {
    let dir = cfg.index_path.join(next_run.to_string());
    write_segment(&dir, run.drain_sorted().into_iter().map(Ok))
        .with_context(|| format!("write run segment {dir:?}"))?;
    let _ = cfg.sender.send(format!("flushed run segment {dir:?}"));
    *next_run += 1;
    Ok(())
}

fn read_files_recursively(files_dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    if files_dir.is_dir() {
        for entry in fs::read_dir(files_dir)
            .with_context(|| format!("read corpus dir {files_dir:?}"))?
        {
            let entry = entry.with_context(|| format!("read corpus dir {files_dir:?}"))?;
            let path = entry.path();

            if path.is_dir() {
                let mut subdir_files = read_files_recursively(&path)?;
                files.append(&mut subdir_files);
            } else {
                files.push(path);
            }
        }
    } else {
        files.push(files_dir.to_path_buf());
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn traversal_reaches_nested_files() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a/b")).unwrap();
        fs::write(tmp.path().join("top.txt"), "x").unwrap();
        fs::write(tmp.path().join("a/mid.txt"), "x").unwrap();
        fs::write(tmp.path().join("a/b/deep.txt"), "x").unwrap();

        let mut files = read_files_recursively(tmp.path()).unwrap();
        files.sort();
        assert_eq!(
            files,
            vec![
                tmp.path().join("a/b/deep.txt"),
                tmp.path().join("a/mid.txt"),
                tmp.path().join("top.txt"),
            ]
        );
    }

    #[test]
    fn existing_index_dir_fails_the_build() {
        let tmp = TempDir::new().unwrap();
        let (sender, _receiver) = mpsc::channel();
        let cfg = Config::new(tmp.path().to_path_buf(), tmp.path().join("corpus"), sender);

        assert!(build_index(&cfg).is_err());
    }
}

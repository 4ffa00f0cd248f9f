use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

/// Number of postings per chunk file, except the final chunk of a segment.
pub const CHUNK_SIZE: usize = 4096;

/// Suffix of chunk filenames; chunks are gzip streams of posting lines.
const CHUNK_SUFFIX: &str = ".gz";

/// Name of the per-segment skip file.
const SKIP_FILE: &str = "skip";

/// One posting: a term paired with the path of a document containing it.
/// The derived ordering is lexicographic on `(term, path)`, which is the
/// total order every segment is sorted by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posting {
    pub term: String,
    pub path: String,
}

/// One skip-file entry: the first term of a chunk and the chunk's filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipEntry {
    pub term: String,
    pub chunk: String,
}

type ChunkLines = Lines<BufReader<GzDecoder<BufReader<File>>>>;

fn parse_posting(line: &str) -> anyhow::Result<Posting> {
    let mut fields = line.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(term), Some(path), None) => Ok(Posting {
            term: term.to_string(),
            path: path.to_string(),
        }),
        _ => bail!("malformed posting line {line:?}"),
    }
}

fn open_chunk(segment: &Path, name: &str) -> anyhow::Result<BufReader<GzDecoder<BufReader<File>>>> {
    let path = segment.join(name);
    let file = File::open(&path).with_context(|| format!("open chunk {path:?}"))?;
    Ok(BufReader::new(GzDecoder::new(BufReader::new(file))))
}

/// Writes one sorted posting stream as a fresh segment directory: numbered
/// gzip chunk files of `CHUNK_SIZE` postings each (the last one shorter),
/// followed by the skip file. The target directory must not exist yet. The
/// stream is consumed exactly once; a failure part-way leaves a partial
/// segment for the operator to delete.
///
/// # Arguments
/// * `dir` - The segment directory to create.
/// * `postings` - Postings in ascending `(term, path)` order.
pub fn write_segment<I>(dir: &Path, postings: I) -> anyhow::Result<()>
where
    I: Iterator<Item = anyhow::Result<Posting>>,
{
    fs::create_dir(dir).with_context(|| format!("create segment dir {dir:?}"))?;

    let mut entries = Vec::new();
    let mut index = 0usize;
    let mut chunk: Vec<Posting> = Vec::with_capacity(CHUNK_SIZE);
    for posting in postings {
        chunk.push(posting?);
        if chunk.len() == CHUNK_SIZE {
            entries.push(write_chunk(dir, index, &chunk)?);
            index += 1;
            chunk.clear();
        }
    }
    if !chunk.is_empty() {
        entries.push(write_chunk(dir, index, &chunk)?);
    }

    // Entries are produced in chunk order. The stable sort keeps that order
    // for consecutive chunks sharing a head term; sorting by filename as a
    // tiebreak would put "10.gz" before "2.gz".
    entries.sort_by(|a, b| a.term.cmp(&b.term));
    write_skip_file(dir, &entries)
}

fn write_chunk(dir: &Path, index: usize, postings: &[Posting]) -> anyhow::Result<SkipEntry> {
    let name = format!("{index}{CHUNK_SUFFIX}");
    let path = dir.join(&name);
    let file = File::create(&path).with_context(|| format!("create chunk {path:?}"))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    for posting in postings {
        writeln!(encoder, "{} {}", posting.term, posting.path)
            .with_context(|| format!("write chunk {path:?}"))?;
    }
    encoder
        .finish()
        .and_then(|mut writer| writer.flush())
        .with_context(|| format!("finish chunk {path:?}"))?;

    Ok(SkipEntry {
        term: postings[0].term.clone(),
        chunk: name,
    })
}

fn write_skip_file(dir: &Path, entries: &[SkipEntry]) -> anyhow::Result<()> {
    let path = dir.join(SKIP_FILE);
    let mut writer =
        BufWriter::new(File::create(&path).with_context(|| format!("create skip file {path:?}"))?);
    for entry in entries {
        writeln!(writer, "{} {}", entry.term, entry.chunk)
            .with_context(|| format!("write skip file {path:?}"))?;
    }
    writer
        .flush()
        .with_context(|| format!("flush skip file {path:?}"))
}

/// Reads a segment's skip file into memory, stably sorted by head term. The
/// file is O(chunks) in size, far smaller than the chunks themselves. A
/// segment without a skip file is unusable and yields an error.
pub fn skip_entries(segment: &Path) -> anyhow::Result<Vec<SkipEntry>> {
    let path = segment.join(SKIP_FILE);
    let contents =
        fs::read_to_string(&path).with_context(|| format!("read skip file {path:?}"))?;

    let mut entries = Vec::new();
    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(term), Some(chunk), None) => entries.push(SkipEntry {
                term: term.to_string(),
                chunk: chunk.to_string(),
            }),
            _ => bail!("malformed skip entry {line:?} in {path:?}"),
        }
    }
    entries.sort_by(|a, b| a.term.cmp(&b.term));
    Ok(entries)
}

/// Streams every posting of a segment in `(term, path)` order by reading its
/// chunks in skip-file order. At most one chunk file is open at a time.
pub struct SegmentReader {
    segment: PathBuf,
    chunks: std::vec::IntoIter<SkipEntry>,
    current: Option<ChunkLines>,
}

impl SegmentReader {
    pub fn open(segment: &Path) -> anyhow::Result<Self> {
        let entries = skip_entries(segment)?;
        Ok(Self {
            segment: segment.to_path_buf(),
            chunks: entries.into_iter(),
            current: None,
        })
    }
}

impl Iterator for SegmentReader {
    type Item = anyhow::Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(lines) = self.current.as_mut() {
                match lines.next() {
                    Some(Ok(line)) => return Some(parse_posting(&line)),
                    Some(Err(err)) => return Some(Err(err.into())),
                    // Chunk exhausted; dropping it closes the file handle.
                    None => self.current = None,
                }
            } else {
                let entry = self.chunks.next()?;
                match open_chunk(&self.segment, &entry.chunk) {
                    Ok(reader) => self.current = Some(reader.lines()),
                    Err(err) => return Some(Err(err)),
                }
            }
        }
    }
}

/// k-way merge of segment readers, ordered by `(term, path)` with source
/// index as the tiebreak. Duplicate postings from different sources are
/// preserved; the query layer collapses them via set semantics.
pub struct MergedPostings {
    heap: BinaryHeap<Reverse<(Posting, usize)>>,
    readers: Vec<SegmentReader>,
}

impl MergedPostings {
    pub fn new(readers: Vec<SegmentReader>) -> anyhow::Result<Self> {
        let mut merge = Self {
            heap: BinaryHeap::new(),
            readers,
        };
        for source in 0..merge.readers.len() {
            merge.advance(source)?;
        }
        Ok(merge)
    }

    fn advance(&mut self, source: usize) -> anyhow::Result<()> {
        if let Some(posting) = self.readers[source].next().transpose()? {
            self.heap.push(Reverse((posting, source)));
        }
        Ok(())
    }
}

impl Iterator for MergedPostings {
    type Item = anyhow::Result<Posting>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse((posting, source)) = self.heap.pop()?;
        if let Err(err) = self.advance(source) {
            return Some(Err(err));
        }
        Some(Ok(posting))
    }
}

/// Merges a set of segments into one new segment under the smallest free
/// integer name in the index root, then deletes the sources. Fewer than two
/// segments is a no-op. If removal fails after the new segment is complete,
/// old and new coexist and queries still return correct (deduplicated)
/// results.
pub fn merge_segments(index_root: &Path, segments: &[PathBuf]) -> anyhow::Result<()> {
    if segments.len() < 2 {
        return Ok(());
    }

    let mut readers = Vec::with_capacity(segments.len());
    for segment in segments {
        readers.push(SegmentReader::open(segment)?);
    }
    let merged = MergedPostings::new(readers)?;

    let target = index_root.join(next_segment_id(index_root).to_string());
    write_segment(&target, merged)?;

    for segment in segments {
        fs::remove_dir_all(segment)
            .with_context(|| format!("remove merged segment {segment:?}"))?;
    }
    Ok(())
}

/// Yields every path in a segment whose term equals `term`.
///
/// The skip file narrows the search: postings for `term` begin in the last
/// chunk whose head term precedes it and may continue through chunks whose
/// head term equals it (a chunk boundary can fall inside the term's run of
/// postings). If `term` precedes every head, only the first chunk is
/// scanned. Within a chunk the scan stops at the first posting sorting
/// after `term`, so lookup cost stays bounded by the selected chunks.
pub fn term_docs(segment: &Path, term: &str) -> anyhow::Result<Vec<String>> {
    let entries = skip_entries(segment)?;
    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let below = entries.partition_point(|e| e.term.as_str() < term);
    let not_above = entries.partition_point(|e| e.term.as_str() <= term);
    let selected = if not_above == 0 {
        0..1
    } else {
        below.saturating_sub(1)..not_above
    };

    let mut docs = Vec::new();
    'chunks: for entry in &entries[selected] {
        // The reader is scoped to this iteration, so breaking out below
        // still closes the chunk's file handle.
        let reader = open_chunk(segment, &entry.chunk)?;
        for line in reader.lines() {
            let line = line.with_context(|| format!("read chunk {:?}", entry.chunk))?;
            let posting = parse_posting(&line)?;
            if posting.term == term {
                docs.push(posting.path);
            } else if posting.term.as_str() > term {
                // Every later posting sorts after `term`, here and in all
                // following chunks.
                break 'chunks;
            }
        }
    }
    Ok(docs)
}

/// Lists the segment directories of an index root in ascending id order.
/// Only integer-named subdirectories count; anything else at the root (such
/// as the metadata artifact) is ignored.
pub fn segment_dirs(index_root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let listing =
        fs::read_dir(index_root).with_context(|| format!("list index root {index_root:?}"))?;

    let mut segments = Vec::new();
    for entry in listing {
        let entry = entry.with_context(|| format!("list index root {index_root:?}"))?;
        if let Ok(id) = entry.file_name().to_string_lossy().parse::<u64>() {
            if entry.path().is_dir() {
                segments.push((id, entry.path()));
            }
        }
    }
    segments.sort_by_key(|&(id, _)| id);
    Ok(segments.into_iter().map(|(_, path)| path).collect())
}

/// Smallest non-negative integer not yet used as a segment name.
pub fn next_segment_id(index_root: &Path) -> u64 {
    let mut id = 0;
    while index_root.join(id.to_string()).exists() {
        id += 1;
    }
    id
}

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::mpsc;

use anyhow::Context;

use crate::segment::{segment_dirs, term_docs};

/// Evaluates a query: the set of paths that contain every one of `terms`.
/// Each term's path set is the union of its postings across all segments;
/// the per-term sets are then intersected. An empty term list yields the
/// empty set.
///
/// # Arguments
/// * `index_root` - The index directory to query.
/// * `terms` - The query terms; a document must contain all of them.
///
/// # Returns
/// The matching pathnames, in no particular order.
pub fn search(index_root: &Path, terms: &[String]) -> anyhow::Result<HashSet<String>> {
    let segments = segment_dirs(index_root)?;

    let mut result: Option<HashSet<String>> = None;
    for term in terms {
        let mut docs = HashSet::new();
        for segment in &segments {
            docs.extend(term_docs(segment, term)?);
        }
        result = Some(match result {
            None => docs,
            Some(matched) => matched.intersection(&docs).cloned().collect(),
        });
        // Once one term has no matches the intersection stays empty.
        if result.as_ref().is_some_and(|matched| matched.is_empty()) {
            break;
        }
    }
    Ok(result.unwrap_or_default())
}

/// Rescans every matching file and prints `PATH:LINENO:LINE` to `out` for
/// each line containing any of the terms as a substring, with 1-based line
/// numbers. A file that cannot be read (it may have changed or disappeared
/// since indexing) is reported through `sender` and skipped; the remaining
/// matches still print.
pub fn grep<W: Write>(
    index_root: &Path,
    terms: &[String],
    out: &mut W,
    sender: &mpsc::Sender<String>,
) -> anyhow::Result<()> {
    for path in search(index_root, terms)? {
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(err) => {
                let _ = sender.send(format!("skipped {path}: {err}"));
                continue;
            }
        };
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    let _ = sender.send(format!("skipped {path}: {err}"));
                    break;
                }
            };
            if terms.iter().any(|term| line.contains(term.as_str())) {
                writeln!(out, "{path}:{}:{line}", number + 1).context("write match")?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::{write_segment, Posting};
    use tempfile::TempDir;

    fn posting(term: &str, path: &str) -> Posting {
        Posting {
            term: term.to_string(),
            path: path.to_string(),
        }
    }

    fn write_test_segment(dir: &Path, postings: Vec<Posting>) {
        write_segment(dir, postings.into_iter().map(Ok)).unwrap();
    }

    fn terms(words: &[&str]) -> Vec<String> {
        words.iter().map(|w| w.to_string()).collect()
    }

    fn matched(index_root: &Path, words: &[&str]) -> Vec<String> {
        let mut paths: Vec<String> = search(index_root, &terms(words))
            .unwrap()
            .into_iter()
            .collect();
        paths.sort();
        paths
    }

    #[test]
    fn unions_across_segments_and_intersects_across_terms() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write_test_segment(
            &root.join("0"),
            vec![posting("apple", "x"), posting("pear", "x")],
        );
        write_test_segment(
            &root.join("1"),
            vec![posting("apple", "y"), posting("banana", "y")],
        );

        assert_eq!(matched(root, &["apple"]), vec!["x", "y"]);
        assert_eq!(matched(root, &["apple", "pear"]), vec!["x"]);
        assert_eq!(matched(root, &["apple", "banana"]), vec!["y"]);
        assert!(matched(root, &["apple", "banana", "pear"]).is_empty());
        assert!(matched(root, &["cherry"]).is_empty());
    }

    #[test]
    fn duplicate_postings_collapse_to_one_match() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        // The same posting in two segments, as after an interrupted merge.
        write_test_segment(&root.join("0"), vec![posting("apple", "x")]);
        write_test_segment(&root.join("1"), vec![posting("apple", "x")]);

        assert_eq!(matched(root, &["apple"]), vec!["x"]);
    }

    #[test]
    fn empty_index_matches_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(matched(tmp.path(), &["anything"]).is_empty());
    }

    #[test]
    fn empty_term_list_matches_nothing() {
        let tmp = TempDir::new().unwrap();
        write_test_segment(&tmp.path().join("0"), vec![posting("apple", "x")]);
        assert!(matched(tmp.path(), &[]).is_empty());
    }
}

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::Context;

/// A lexer over raw file bytes. A token is a maximal run of ASCII letters,
/// digits and underscores; every other byte is a separator. No case folding
/// or other normalization is applied, so `Hello` and `hello` are distinct
/// terms.
pub struct Lexer<'a> {
    /// The remaining input bytes.
    pub input: &'a [u8],
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input }
    }

    /// Drops separator bytes from the front of the input.
    fn trim_left(&mut self) {
        while !self.input.is_empty() && !is_word_byte(self.input[0]) {
            self.input = &self.input[1..];
        }
    }

    /// Chops `n` bytes from the beginning of the input and returns them
    /// as a slice.
    fn chop(&mut self, n: usize) -> &'a [u8] {
        let token = &self.input[0..n];
        self.input = &self.input[n..];
        token
    }

    /// Chops bytes from the input while a given predicate remains true.
    fn chop_while<P>(&mut self, predicate: P) -> &'a [u8]
    where
        P: Fn(u8) -> bool,
    {
        let mut n = 0;
        while n < self.input.len() && predicate(self.input[n]) {
            n += 1;
        }

        self.chop(n)
    }

    /// Extracts the next term from the input, or `None` once the input is
    /// exhausted.
    fn next_token(&mut self) -> Option<String> {
        self.trim_left();

        if self.input.is_empty() {
            return None;
        }

        let word = self.chop_while(is_word_byte);
        // Word bytes are all ASCII, so no replacement ever happens here.
        Some(String::from_utf8_lossy(word).into_owned())
    }
}

impl Iterator for Lexer<'_> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_token()
    }
}

/// Reads one corpus file and returns the set of distinct terms it contains.
/// Empty files yield an empty set. An unreadable file is an error; the
/// caller treats that as fatal to the build.
///
/// # Arguments
/// * `path` - The path of the file to tokenize.
///
/// # Returns
/// The distinct terms of the file, in no particular order.
pub fn terms_in_file(path: &Path) -> anyhow::Result<HashSet<String>> {
    let bytes = fs::read(path).with_context(|| format!("read corpus file {path:?}"))?;
    let mut terms = HashSet::new();
    for term in Lexer::new(&bytes) {
        terms.insert(term);
    }
    Ok(terms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn tokens(input: &str) -> Vec<String> {
        Lexer::new(input.as_bytes()).collect()
    }

    #[test]
    fn splits_on_non_word_bytes() {
        assert_eq!(tokens("foo bar-baz, qux!"), vec!["foo", "bar", "baz", "qux"]);
    }

    #[test]
    fn keeps_digits_and_underscores() {
        assert_eq!(tokens("snake_case x2 3rd"), vec!["snake_case", "x2", "3rd"]);
    }

    #[test]
    fn preserves_case() {
        assert_eq!(tokens("Hello hello HELLO"), vec!["Hello", "hello", "HELLO"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(tokens("").is_empty());
        assert!(tokens(" \t\n--\n").is_empty());
    }

    #[test]
    fn tokenizes_arbitrary_bytes() {
        let input = [0xff, b'a', b'b', 0x00, b'c', 0xfe];
        let got: Vec<String> = Lexer::new(&input).collect();
        assert_eq!(got, vec!["ab", "c"]);
    }

    #[test]
    fn file_terms_are_distinct() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "apple pear\napple banana apple\n").unwrap();

        let terms = terms_in_file(file.path()).unwrap();
        let mut sorted: Vec<_> = terms.into_iter().collect();
        sorted.sort();
        assert_eq!(sorted, vec!["apple", "banana", "pear"]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(terms_in_file(Path::new("/no/such/file")).is_err());
    }
}

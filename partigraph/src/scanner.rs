//! This module helps us efficiently read from sequences of text files
//! containing words separated by a common delimiter, line-by-line,
//! and in parallel.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use bstr::ByteSlice;
use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};

use crate::error::Result;

const BUFSIZE: usize = 64 * 1024;

/// Words of one line, split on a single delimiter byte. Repeated
/// delimiters produce empty words; a trailing delimiter does not.
#[derive(Clone)]
pub struct DelimIter<'a> {
    rest: &'a [u8],
    delim: u8,
}

impl<'a> DelimIter<'a> {
    pub fn new(line: &'a [u8], delim: u8) -> Self {
        Self { rest: line, delim }
    }
}

impl<'a> Iterator for DelimIter<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.rest.is_empty() {
            return None;
        }
        let line = self.rest;
        match line.find_byte(self.delim) {
            Some(at) => {
                self.rest = &line[at + 1..];
                Some(&line[..at])
            }
            None => {
                self.rest = &[];
                Some(line)
            }
        }
    }
}

/// A `Scanner` provides efficient line-level access to underlying files of
/// words, where words are delimited with a specified delimiter.
///
/// Outside of that, you're on your own. This means lines that start
/// with the delimiter or have repeat delimiters will have empty words
/// being iterated over.
pub struct Scanner {
    paths: Vec<PathBuf>,
    delimiter: u8,
}

impl Scanner {
    pub fn new(paths: Vec<PathBuf>, delimiter: u8) -> Self {
        Self { paths, delimiter }
    }

    /// Fold over the lines in the associated files to this scanner
    /// and combine the results.
    ///
    /// Every file is folded over once, in parallel, and a parallel iterator
    /// over the per-file results is returned. The first I/O or fold error in
    /// a file ends that file's fold.
    ///
    /// The `id` function is passed the index of the file getting folded over.
    pub(crate) fn fold<'a, U, Id, Fold>(
        &'a self,
        id: Id,
        fold: Fold,
    ) -> impl ParallelIterator<Item = Result<U>> + 'a
    where
        U: Send + 'a,
        Id: Fn(usize) -> U + Sync + Send + 'a,
        Fold: Fn(U, DelimIter<'_>) -> Result<U> + Sync + Send + 'a,
    {
        let delim = self.delimiter;
        self.paths.par_iter().enumerate().map(move |(i, path)| -> Result<U> {
            let file = File::open(path)?;
            let reader = BufReader::with_capacity(BUFSIZE, file);
            let mut acc = id(i);
            for line in reader.split(b'\n') {
                let line = line?;
                if line.is_empty() {
                    continue;
                }
                acc = fold(acc, DelimIter::new(&line, delim))?;
            }
            Ok(acc)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn delim_iter_keeps_empty_words() {
        let words: Vec<&[u8]> = DelimIter::new(b"1  2 ", b' ').collect();
        assert_eq!(words, vec![&b"1"[..], &b""[..], &b"2"[..]]);
    }

    #[test]
    fn delim_iter_edges() {
        assert_eq!(DelimIter::new(b"", b' ').count(), 0);
        let words: Vec<&[u8]> = DelimIter::new(b" 7", b' ').collect();
        assert_eq!(words, vec![&b""[..], &b"7"[..]]);
        let words: Vec<&[u8]> = DelimIter::new(b"42", b' ').collect();
        assert_eq!(words, vec![&b"42"[..]]);
    }

    #[test]
    fn fold_visits_each_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (i, body) in ["a b\nc\n", "d\n\ne f g\n"].iter().enumerate() {
            let path = dir.path().join(format!("part{}", i));
            File::create(&path).unwrap().write_all(body.as_bytes()).unwrap();
            paths.push(path);
        }
        let scanner = Scanner::new(paths, b' ');
        let mut counts: Vec<(usize, usize)> = scanner
            .fold(|i| (i, 0), |(i, n), words| Ok((i, n + words.count())))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        counts.sort_unstable();
        assert_eq!(counts, vec![(0, 3), (1, 4)]);
    }

    #[test]
    fn missing_file_is_an_error() {
        let scanner = Scanner::new(vec![PathBuf::from("/nonexistent/partigraph")], b' ');
        let result: Result<Vec<()>> = scanner.fold(|_| (), |acc, _| Ok(acc)).collect();
        assert!(result.is_err());
    }
}

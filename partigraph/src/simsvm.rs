//! Helper functions for dealing with text data files in
//! a "SIMple SVMlight" (simsvm) format, i.e.,
//! <target> <feature> <feature>...
//! where target and features should be contiguous non-negative integers.
//!
//! For graphs, the target is a source node id and the features are the ids
//! of its out-neighbors.

use crate::error::{GraphError, Result};
use crate::scanner::DelimIter;

/// Given a [`DelimIter`] pointing to the front of a line in a
/// simsvm file, this wrapper is a convenient iterator over
/// just the features in that line.
#[derive(Clone)]
pub struct SimSvmLineIter<'a> {
    target: u32,
    iter: DelimIter<'a>,
}

pub fn parse(mut iter: DelimIter<'_>) -> Result<SimSvmLineIter<'_>> {
    let target = iter
        .next()
        .ok_or_else(|| GraphError::Parse("missing target".to_string()))?;
    let target = parse_word(target)?;
    Ok(SimSvmLineIter { target, iter })
}

fn parse_word(word: &[u8]) -> Result<u32> {
    let string = std::str::from_utf8(word)?;
    string
        .parse()
        .map_err(|e| GraphError::Parse(format!("{:?}: {}", string, e)))
}

impl<'a> Iterator for SimSvmLineIter<'a> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Result<u32>> {
        self.iter.next().map(parse_word)
    }
}

impl<'a> SimSvmLineIter<'a> {
    pub fn target(&self) -> u32 {
        self.target
    }
}

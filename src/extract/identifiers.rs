use std::iter::Peekable;

use regex::{Matches, Regex};

use crate::config::ExtractionConfig;

/// A part identifier found in page text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate<'t> {
    pub text: &'t str,
    pub start: usize,
    pub end: usize,
    /// Index of the pattern rule that produced the hit.
    pub rule: usize,
}

pub struct IdentifierMatcher {
    rules: Vec<Regex>,
    acceptance: Vec<Regex>,
    min_len: usize,
    max_len: usize,
}

impl IdentifierMatcher {
    pub fn new(cfg: &ExtractionConfig) -> Result<Self, regex::Error> {
        let compile = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| Regex::new(p))
                .collect::<Result<Vec<_>, _>>()
        };
        Ok(IdentifierMatcher {
            rules: compile(&cfg.identifier_patterns)?,
            acceptance: compile(&cfg.acceptance_patterns)?,
            min_len: cfg.min_identifier_len,
            max_len: cfg.max_identifier_len,
        })
    }

    /// Every accepted hit of every rule, ordered by position; hits at the
    /// same offset come out in rule order. Overlapping hits from different
    /// rules are all reported.
    pub fn candidates<'m, 't>(&'m self, text: &'t str) -> Candidates<'m, 't> {
        Candidates {
            matcher: self,
            streams: self
                .rules
                .iter()
                .map(|re| re.find_iter(text).peekable())
                .collect(),
        }
    }

    pub fn accepts(&self, candidate: &str) -> bool {
        let len = candidate.chars().count();
        len >= self.min_len
            && len <= self.max_len
            && self.acceptance.iter().any(|re| re.is_match(candidate))
    }
}

/// Lazy k-way merge over the per-rule match streams.
pub struct Candidates<'m, 't> {
    matcher: &'m IdentifierMatcher,
    streams: Vec<Peekable<Matches<'m, 't>>>,
}

impl<'m, 't> Iterator for Candidates<'m, 't> {
    type Item = Candidate<'t>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rule = self
                .streams
                .iter_mut()
                .enumerate()
                .filter_map(|(i, s)| s.peek().map(|m| (m.start(), i)))
                .min()?
                .1;
            let m = self.streams[rule].next()?;
            let text = m.as_str().trim();
            if self.matcher.accepts(text) {
                return Some(Candidate {
                    text,
                    start: m.start(),
                    end: m.end(),
                    rule,
                });
            }
        }
    }
}

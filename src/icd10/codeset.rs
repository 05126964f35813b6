use crate::icd10::IcdCode;

use aho_corasick::AhoCorasick;
use qu::ick_use::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_set, BTreeSet},
    fmt, iter, ops,
    sync::Arc,
};

/// A set of codes.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSet {
    codes: Arc<BTreeSet<IcdCode>>,
}

impl CodeSet {
    fn new(codes: BTreeSet<IcdCode>) -> Self {
        Self {
            codes: Arc::new(codes),
        }
    }

    /// Build a codeset from a list of codes or inclusive ranges (`"O00-O07"`).
    pub fn parse<'a>(items: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let mut codes = BTreeSet::new();
        for item in items {
            match item.split_once('-') {
                Some((from, to)) => {
                    let from = IcdCode::from_str(from.trim())?;
                    let to = IcdCode::from_str(to.trim())?;
                    codes.extend(IcdCode::range(from, to)?);
                }
                None => {
                    codes.insert(
                        IcdCode::from_str(item.trim())
                            .with_context(|| format!("parsing code \"{}\"", item))?,
                    );
                }
            }
        }
        Ok(Self::new(codes))
    }

    pub fn contains(&self, code: IcdCode) -> bool {
        self.codes.contains(&code)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn iter(&self) -> iter::Copied<btree_set::Iter<'_, IcdCode>> {
        self.codes.iter().copied()
    }

    /// Freeze the set for repeated lookups.
    pub fn into_matcher(self) -> CodeSetMatcher {
        CodeSetMatcher::new(self)
    }
}

impl FromIterator<IcdCode> for CodeSet {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = IcdCode>,
    {
        Self::new(iter.into_iter().collect())
    }
}

impl From<BTreeSet<IcdCode>> for CodeSet {
    fn from(f: BTreeSet<IcdCode>) -> Self {
        Self::new(f)
    }
}

/// Codes in the left set that are not in the right one.
impl ops::Sub<&CodeSet> for &CodeSet {
    type Output = CodeSet;
    fn sub(self, rhs: &CodeSet) -> Self::Output {
        CodeSet::from_iter(self.codes.difference(&rhs.codes).copied())
    }
}

impl fmt::Display for CodeSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        let mut codes = self.codes.iter();
        if let Some(code) = codes.next() {
            write!(f, "{}", code)?;
        }
        for code in codes {
            write!(f, ", {}", code)?;
        }
        write!(f, "}}")
    }
}

/// A `CodeSet` with an automaton built over it.
#[derive(Debug, Clone)]
pub struct CodeSetMatcher {
    code_set: CodeSet,
    matcher: AhoCorasick,
}

impl CodeSetMatcher {
    fn new(code_set: CodeSet) -> Self {
        let matcher = AhoCorasick::new(code_set.iter());
        Self { code_set, matcher }
    }

    /// Codes and patterns are all 3 bytes long, so a match anywhere is a match of the whole code.
    pub fn contains(&self, code: IcdCode) -> bool {
        !self.code_set.is_empty() && self.matcher.is_match(code)
    }
}

impl ops::Deref for CodeSetMatcher {
    type Target = CodeSet;

    fn deref(&self) -> &Self::Target {
        &self.code_set
    }
}

impl PartialEq for CodeSetMatcher {
    fn eq(&self, other: &Self) -> bool {
        self.code_set == other.code_set
    }
}

/// A regular expression that must match a whole code.
#[derive(Debug, Clone)]
pub struct CodePattern {
    source: String,
    regex: Regex,
}

impl CodePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&format!("^(?:{})$", pattern))
            .with_context(|| format!("invalid code pattern \"{}\"", pattern))?;
        Ok(Self {
            source: pattern.to_owned(),
            regex,
        })
    }

    pub fn from_regex(regex: &Regex) -> Result<Self> {
        Self::new(regex.as_str())
    }

    /// The pattern as written, without anchors.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, code: IcdCode) -> bool {
        self.regex.is_match(code.as_str())
    }
}

impl PartialEq for CodePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for CodePattern {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.source)
    }
}

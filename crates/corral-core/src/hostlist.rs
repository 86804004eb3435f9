//! Compressed host-range expressions.
//!
//! The scheduler describes sets of nodes with expressions like
//! `n[1-4,7]`, `rack1-n[01-16]gpu`, or `login0,n[1-2]`. A [`Hostlist`] is
//! the expanded, ordered form of one of those expressions. Expansion order
//! is significant: credential projection addresses nodes by their index in
//! the job's hostlist.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Upper bound on the number of names one expression may expand to.
///
/// A hostile range such as `n[0-4000000000]` must fail before allocation.
pub const MAX_EXPANSION: usize = 65_536;

/// Errors raised while parsing a host-range expression.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HostlistError {
    /// A `[` without a matching `]`, or a stray `]`.
    #[error("unbalanced brackets in host expression: {0}")]
    Unbalanced(String),

    /// A second bracket group in a single component.
    #[error("multiple bracket groups in host expression: {0}")]
    MultipleGroups(String),

    /// A range whose start exceeds its end.
    #[error("reversed host range: {start}-{end}")]
    Reversed {
        /// Low bound as written.
        start: u64,
        /// High bound as written.
        end: u64,
    },

    /// A range bound that is not a decimal number.
    #[error("invalid range bound: {0:?}")]
    InvalidBound(String),

    /// An empty item inside a bracket group (e.g. `n[1,,3]`).
    #[error("empty item in host range: {0}")]
    EmptyItem(String),

    /// The expression expands past [`MAX_EXPANSION`] names.
    #[error("host expression expands to more than {MAX_EXPANSION} names")]
    TooLarge,
}

/// An expanded, ordered list of node names.
#[derive(Debug, Clone, Default)]
pub struct Hostlist {
    names: Vec<String>,
    /// First index of each name; duplicates keep their first position.
    index: HashMap<String, usize>,
}

impl Hostlist {
    /// Parses a compressed expression into its expanded node list.
    ///
    /// Components are separated by commas at bracket depth zero. Each
    /// component may carry one bracketed range group; bounds with leading
    /// zeros are zero-padded to the width of the low bound. An empty
    /// expression yields an empty list.
    ///
    /// # Errors
    ///
    /// Returns a [`HostlistError`] on malformed bracket groups, reversed
    /// or non-numeric ranges, or an expansion past [`MAX_EXPANSION`].
    pub fn parse(expr: &str) -> Result<Self, HostlistError> {
        let mut list = Self::default();

        for component in split_components(expr)? {
            if component.is_empty() {
                continue;
            }
            expand_component(&component, &mut list)?;
        }

        Ok(list)
    }

    /// Index of the first occurrence of `name`, if present.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Number of expanded names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` when the list holds no names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates over the expanded names in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Name at `index`, if in range.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    fn push(&mut self, name: String) -> Result<(), HostlistError> {
        if self.names.len() >= MAX_EXPANSION {
            return Err(HostlistError::TooLarge);
        }
        self.index.entry(name.clone()).or_insert(self.names.len());
        self.names.push(name);
        Ok(())
    }
}

impl fmt::Display for Hostlist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names.join(","))
    }
}

impl<'a> IntoIterator for &'a Hostlist {
    type Item = &'a str;
    type IntoIter = std::iter::Map<std::slice::Iter<'a, String>, fn(&'a String) -> &'a str>;

    fn into_iter(self) -> Self::IntoIter {
        self.names.iter().map(String::as_str)
    }
}

/// Splits on commas outside bracket groups, validating bracket balance.
fn split_components(expr: &str) -> Result<Vec<String>, HostlistError> {
    let mut components = Vec::new();
    let mut current = String::new();
    let mut depth = 0u32;

    for ch in expr.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                if depth == 0 {
                    return Err(HostlistError::Unbalanced(expr.to_string()));
                }
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                components.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if depth != 0 {
        return Err(HostlistError::Unbalanced(expr.to_string()));
    }
    components.push(current);
    Ok(components)
}

/// Expands one comma-free component (`prefix[items]suffix` or a bare name).
fn expand_component(component: &str, out: &mut Hostlist) -> Result<(), HostlistError> {
    let Some(open) = component.find('[') else {
        return out.push(component.to_string());
    };

    // split_components guarantees balance, so ']' exists past 'open'.
    let close = component[open..]
        .find(']')
        .map(|i| i + open)
        .ok_or_else(|| HostlistError::Unbalanced(component.to_string()))?;

    let prefix = &component[..open];
    let items = &component[open + 1..close];
    let suffix = &component[close + 1..];

    if suffix.contains('[') {
        return Err(HostlistError::MultipleGroups(component.to_string()));
    }

    for item in items.split(',') {
        if item.is_empty() {
            return Err(HostlistError::EmptyItem(component.to_string()));
        }
        let (lo_str, hi_str) = match item.split_once('-') {
            Some((lo, hi)) => (lo, hi),
            None => (item, item),
        };
        let lo = parse_bound(lo_str)?;
        let hi = parse_bound(hi_str)?;
        if lo > hi {
            return Err(HostlistError::Reversed { start: lo, end: hi });
        }

        let width = if lo_str.len() > 1 && lo_str.starts_with('0') {
            lo_str.len()
        } else {
            0
        };

        for n in lo..=hi {
            out.push(format!("{prefix}{n:0width$}{suffix}"))?;
        }
    }

    Ok(())
}

fn parse_bound(s: &str) -> Result<u64, HostlistError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HostlistError::InvalidBound(s.to_string()));
    }
    s.parse()
        .map_err(|_| HostlistError::InvalidBound(s.to_string()))
}

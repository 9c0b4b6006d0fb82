//! Address space enumeration.
//!
//! [`Targets`] is either a per-octet [`AddressRange`] or an explicit list of
//! addresses. Both report their total count up front and hand out a fresh,
//! restartable iterator on every call to [`Targets::iter`].

mod error;
mod range;

pub use error::TargetError;
pub use range::{AddressIter, AddressRange, OctetSpan};

use std::net::Ipv4Addr;

#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    Range(AddressRange),
    List(Vec<Ipv4Addr>),
}

impl Targets {
    pub fn count(&self) -> u64 {
        match self {
            Self::Range(range) => range.count(),
            Self::List(list) => list.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Self::Range(range) if range.is_unbounded())
    }

    pub fn iter(&self) -> TargetIter<'_> {
        match self {
            Self::Range(range) => TargetIter::Range(range.iter()),
            Self::List(list) => TargetIter::List(list.iter()),
        }
    }

    /// Parses an address list: one IPv4 address per line, `#` starts a
    /// comment, blank lines are skipped.
    pub fn parse_list(text: &str) -> Result<Self, TargetError> {
        let mut out = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let addr = line
                .parse::<Ipv4Addr>()
                .map_err(|_| TargetError::InvalidListEntry {
                    line: idx + 1,
                    value: line.to_string(),
                })?;
            out.push(addr);
        }
        if out.is_empty() {
            return Err(TargetError::EmptyList);
        }
        Ok(Self::List(out))
    }
}

impl From<AddressRange> for Targets {
    fn from(range: AddressRange) -> Self {
        Self::Range(range)
    }
}

pub enum TargetIter<'a> {
    Range(AddressIter),
    List(std::slice::Iter<'a, Ipv4Addr>),
}

impl Iterator for TargetIter<'_> {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Range(iter) => iter.next(),
            Self::List(iter) => iter.next().copied(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Self::Range(iter) => iter.size_hint(),
            Self::List(iter) => iter.size_hint(),
        }
    }
}

#[cfg(test)]
mod tests;

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use super::error::TargetError;

/// Inclusive span of values for a single octet.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OctetSpan {
    pub lo: u8,
    pub hi: u8,
}

impl OctetSpan {
    /// Span used for an octet whose bounds were not supplied.
    pub const FULL: OctetSpan = OctetSpan { lo: 1, hi: 255 };

    pub fn new(lo: u8, hi: u8) -> Self {
        Self { lo, hi }
    }

    pub fn single(value: u8) -> Self {
        Self {
            lo: value,
            hi: value,
        }
    }

    pub fn len(&self) -> u64 {
        if self.lo > self.hi {
            0
        } else {
            u64::from(self.hi - self.lo) + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lo > self.hi
    }
}

impl fmt::Display for OctetSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == self.hi {
            write!(f, "{}", self.lo)
        } else {
            write!(f, "{}-{}", self.lo, self.hi)
        }
    }
}

/// Cartesian product of four octet spans.
///
/// Enumeration order is ascending with the fourth octet varying fastest, so
/// `10.0.0.1-10.0.1.2` walks `10.0.0.1`, `10.0.0.2`, `10.0.1.1`, `10.0.1.2`.
#[cfg_attr(feature = "with-serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRange {
    octets: [OctetSpan; 4],
}

impl AddressRange {
    /// Builds the per-octet spans between `start` and `end`. Each octet of
    /// `start` must be lower than or equal to the same octet of `end`.
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self, TargetError> {
        let (s, e) = (start.octets(), end.octets());
        let mut octets = [OctetSpan::FULL; 4];
        for (position, span) in octets.iter_mut().enumerate() {
            *span = OctetSpan::new(s[position], e[position]);
        }
        Self::from_spans(octets)
    }

    pub fn from_spans(octets: [OctetSpan; 4]) -> Result<Self, TargetError> {
        for (position, span) in octets.iter().enumerate() {
            if span.is_empty() {
                return Err(TargetError::DescendingSpan {
                    position: position + 1,
                    lo: span.lo,
                    hi: span.hi,
                });
            }
        }
        Ok(Self { octets })
    }

    pub fn single(addr: Ipv4Addr) -> Self {
        let o = addr.octets();
        Self {
            octets: [
                OctetSpan::single(o[0]),
                OctetSpan::single(o[1]),
                OctetSpan::single(o[2]),
                OctetSpan::single(o[3]),
            ],
        }
    }

    /// Range with no bound supplied for any octet: `1-255` four times,
    /// i.e. 255^4 addresses.
    pub fn unbounded() -> Self {
        Self {
            octets: [OctetSpan::FULL; 4],
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.octets.iter().all(|span| *span == OctetSpan::FULL)
    }

    pub fn spans(&self) -> &[OctetSpan; 4] {
        &self.octets
    }

    pub fn count(&self) -> u64 {
        self.octets.iter().map(OctetSpan::len).product()
    }

    /// Address at scan position `index`, or `None` past the end.
    pub fn nth_address(&self, index: u64) -> Option<Ipv4Addr> {
        if index >= self.count() {
            return None;
        }
        let mut rest = index;
        let mut out = [0u8; 4];
        for position in (0..4).rev() {
            let span = self.octets[position];
            let len = span.len();
            // rest % len < 256 because len <= 256
            out[position] = span.lo + (rest % len) as u8;
            rest /= len;
        }
        Some(Ipv4Addr::from(out))
    }

    pub fn iter(&self) -> AddressIter {
        AddressIter {
            range: *self,
            next: 0,
            count: self.count(),
        }
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = &self.octets;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FromStr for AddressRange {
    type Err = TargetError;

    /// Accepts `a.b.c.d`, `a.b.c.d-e.f.g.h`, or a per-octet pattern such as
    /// `10.0.*.1-20` where `*` (or an empty octet) stands for `1-255`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        if input.is_empty() {
            return Err(TargetError::Empty);
        }

        if let Some((left, right)) = input.split_once('-') {
            if let (Ok(start), Ok(end)) = (
                left.trim().parse::<Ipv4Addr>(),
                right.trim().parse::<Ipv4Addr>(),
            ) {
                return Self::new(start, end);
            }
        }

        let parts: Vec<&str> = input.split('.').collect();
        if parts.len() != 4 {
            return Err(TargetError::OctetCount {
                input: input.to_string(),
            });
        }
        let mut octets = [OctetSpan::FULL; 4];
        for (slot, part) in octets.iter_mut().zip(parts) {
            *slot = parse_octet_span(input, part.trim())?;
        }
        Self::from_spans(octets)
    }
}

fn parse_octet_span(input: &str, part: &str) -> Result<OctetSpan, TargetError> {
    if part.is_empty() || part == "*" {
        return Ok(OctetSpan::FULL);
    }
    let parse = |value: &str| {
        value
            .trim()
            .parse::<u8>()
            .map_err(|_| TargetError::invalid_octet(input, part))
    };
    match part.split_once('-') {
        Some((lo, hi)) => Ok(OctetSpan::new(parse(lo)?, parse(hi)?)),
        None => Ok(OctetSpan::single(parse(part)?)),
    }
}

/// Lazy iterator over an [`AddressRange`]. A fresh iterator always starts
/// at the first address.
#[derive(Debug, Clone)]
pub struct AddressIter {
    range: AddressRange,
    next: u64,
    count: u64,
}

impl Iterator for AddressIter {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let addr = self.range.nth_address(self.next)?;
        self.next += 1;
        Some(addr)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count.saturating_sub(self.next);
        match usize::try_from(remaining) {
            Ok(n) => (n, Some(n)),
            Err(_) => (usize::MAX, None),
        }
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        self.next = self.next.saturating_add(n as u64);
        self.next()
    }
}

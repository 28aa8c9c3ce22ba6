//! Next-hop group key.

use super::nexthop::{NextHopKey, ParseNextHopKeyError};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// The declared next-hop set of a route.
///
/// Kept ordered so that iteration (and therefore round-robin bucket
/// assignment at materialisation) is deterministic for a given set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NextHopGroupKey {
    next_hops: BTreeSet<NextHopKey>,
}

impl NextHopGroupKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_next_hops(next_hops: impl IntoIterator<Item = NextHopKey>) -> Self {
        Self {
            next_hops: next_hops.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.next_hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }

    pub fn contains(&self, next_hop: &NextHopKey) -> bool {
        self.next_hops.contains(next_hop)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NextHopKey> {
        self.next_hops.iter()
    }
}

impl fmt::Display for NextHopGroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for nh in &self.next_hops {
            if !first {
                write!(f, ",")?;
            }
            write!(f, "{}", nh)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for NextHopGroupKey {
    type Err = ParseNextHopKeyError;

    /// Parses a comma-separated list of next-hop keys.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut next_hops = BTreeSet::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            next_hops.insert(part.parse()?);
        }
        Ok(Self { next_hops })
    }
}

impl FromIterator<NextHopKey> for NextHopGroupKey {
    fn from_iter<I: IntoIterator<Item = NextHopKey>>(iter: I) -> Self {
        Self::from_next_hops(iter)
    }
}

//! The pluggable consensus-facing header policy: extra header validity rules and the
//! canonical-chain comparator.

use std::fmt::Display;

use crate::types::header::Header;

/// Consensus-specific header rules. The engine performs the structural checks (linkage, height,
/// hash integrity) itself; a `HeaderPolicy` adds whatever its consensus requires on top, and
/// decides which of two verified tips the canonical chain should follow.
pub trait HeaderPolicy: Send + 'static {
    /// Check `header` against consensus rules, given its already-stored `parent`.
    fn validate_header(&self, header: &Header, parent: &Header) -> Result<(), PolicyViolation>;

    /// Whether `candidate` should displace `incumbent` as the canonical tip.
    ///
    /// Must induce a deterministic total preference: all nodes running the same policy over the
    /// same set of verified blocks must converge on the same tip. A strict comparison (ties
    /// favor the incumbent) keeps the tip stable under equal-weight forks.
    fn better(&self, candidate: &Header, incumbent: &Header) -> bool;
}

/// The default policy: no extra header rules, and the higher block wins.
pub struct HeightPolicy;

impl HeaderPolicy for HeightPolicy {
    fn validate_header(&self, _header: &Header, _parent: &Header) -> Result<(), PolicyViolation> {
        Ok(())
    }

    fn better(&self, candidate: &Header, incumbent: &Header) -> bool {
        candidate.height > incumbent.height
    }
}

/// A header that breaks a [`HeaderPolicy`] rule.
#[derive(Debug)]
pub struct PolicyViolation {
    pub what: String,
}

impl Display for PolicyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "header policy violation: {}", self.what)
    }
}

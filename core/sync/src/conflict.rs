//! Conflict resolution between tier copies.
//!
//! Last-writer-wins on `updated_at`. Tier priority (T4 > T3 > T2 > T1)
//! only decides between copies with identical timestamps. There is no
//! field-level merge: the winner is taken whole.

use std::cmp::Ordering;

use prefsync_common::{PreferenceDocument, TierId};

/// A document read from one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub tier: TierId,
    pub document: PreferenceDocument,
}

impl Candidate {
    pub fn new(tier: TierId, document: PreferenceDocument) -> Self {
        Self { tier, document }
    }

    /// Ranking key: newest first, then tier priority.
    fn rank(&self) -> (chrono::DateTime<chrono::Utc>, TierId) {
        (self.document.updated_at, self.tier)
    }
}

/// Compare two candidates; `Greater` means `a` wins.
pub fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    a.rank().cmp(&b.rank())
}

/// Pick the winner of two candidates.
pub fn resolve_pair<'a>(a: &'a Candidate, b: &'a Candidate) -> &'a Candidate {
    match compare(a, b) {
        Ordering::Less => b,
        _ => a,
    }
}

/// Pick the winner among all candidates, `None` if there are none.
pub fn resolve(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().max_by(|a, b| compare(a, b))
}

/// Whether `incoming` should replace `held`.
///
/// Strictly newer only; an equal timestamp keeps what we have.
pub fn is_newer(incoming: &PreferenceDocument, held: &PreferenceDocument) -> bool {
    incoming.updated_at > held.updated_at
}

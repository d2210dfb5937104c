//! Fingerprint ledger: at-most-once gate for discovered entities.
//!
//! One ledger per run. Entries are only ever added; a run is bounded in
//! wall-clock time so the set is never evicted.

use dashmap::DashSet;

use crate::model::Fingerprint;

#[derive(Debug, Default)]
pub struct Ledger {
    seen: DashSet<Fingerprint>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `fingerprint` as seen.
    ///
    /// Returns `true` only for the call that moved it from absent to
    /// present. The insert happens under the shard lock, so concurrent
    /// callers with the same fingerprint see exactly one `true`.
    pub fn check_and_mark(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.insert(fingerprint.clone())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Number of distinct fingerprints seen so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

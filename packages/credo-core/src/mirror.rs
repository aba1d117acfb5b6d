//! Off-chain mirror store: the fast, non-authoritative cache of ledger
//! state used for UI reads. Updates are insert-or-merge by key, never
//! unconditional overwrite, so concurrent partial updates from retries
//! merge instead of clobbering each other.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::state::Enrollment;
use crate::streak::StreakRecord;

/// Mirror copy of an enrollment, plus the reconciliation bookkeeping the
/// background pass reads. `pending_ledger_sync` means the mirror may be
/// ahead of the ledger for this record; it is never allowed to be behind.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct EnrollmentDoc {
    pub enrollment: Enrollment,
    pub pending_ledger_sync: bool,
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl EnrollmentDoc {
    pub fn new(enrollment: Enrollment, pending_ledger_sync: bool) -> Self {
        Self {
            enrollment,
            pending_ledger_sync,
            last_reconciled_at: None,
        }
    }

    /// Merge an incoming copy over an existing one. Bits union, finalize
    /// and credential fields are first-write-wins (monotonic), and the
    /// pending flag survives whenever the union holds bits the incoming
    /// copy did not claim as synced.
    pub fn merge(existing: Self, incoming: Self) -> Self {
        let bitmap = existing
            .enrollment
            .bitmap
            .union(&incoming.enrollment.bitmap);
        let pending = if bitmap == incoming.enrollment.bitmap {
            incoming.pending_ledger_sync
        } else {
            true
        };
        Self {
            enrollment: Enrollment {
                bitmap,
                finalized_at: existing
                    .enrollment
                    .finalized_at
                    .or(incoming.enrollment.finalized_at),
                credential_asset: existing
                    .enrollment
                    .credential_asset
                    .or(incoming.enrollment.credential_asset),
                ..incoming.enrollment
            },
            pending_ledger_sync: pending,
            last_reconciled_at: existing.last_reconciled_at.max(incoming.last_reconciled_at),
        }
    }
}

/// Mirror copy of an award, kept for fast UI reads and the advisory
/// already-awarded pre-check.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct ReceiptDoc {
    pub achievement_id: String,
    pub learner: Pubkey,
    pub asset: Pubkey,
}

pub trait MirrorStore: Send + Sync {
    fn enrollment(&self, learner: &Pubkey, course_id: &str) -> Option<EnrollmentDoc>;
    /// Insert-or-merge on `(learner, course_id)`.
    fn upsert_enrollment(&self, doc: EnrollmentDoc) -> EnrollmentDoc;
    /// Records flagged `pending_ledger_sync`, stalest first.
    fn pending_enrollments(&self, limit: usize) -> Vec<EnrollmentDoc>;

    fn receipt(&self, learner: &Pubkey, achievement_id: &str) -> Option<ReceiptDoc>;
    fn upsert_receipt(&self, doc: ReceiptDoc);

    fn streak(&self, user: &Pubkey) -> Option<StreakRecord>;
    fn upsert_streak(&self, record: StreakRecord);
}

/// Process-local mirror used by tests and as the default cache backend.
#[derive(Default)]
pub struct InMemoryMirror {
    enrollments: RwLock<HashMap<(Pubkey, String), EnrollmentDoc>>,
    receipts: RwLock<HashMap<(Pubkey, String), ReceiptDoc>>,
    streaks: RwLock<HashMap<Pubkey, StreakRecord>>,
}

impl MirrorStore for InMemoryMirror {
    fn enrollment(&self, learner: &Pubkey, course_id: &str) -> Option<EnrollmentDoc> {
        self.enrollments
            .read()
            .unwrap()
            .get(&(*learner, course_id.to_string()))
            .cloned()
    }

    fn upsert_enrollment(&self, doc: EnrollmentDoc) -> EnrollmentDoc {
        let key = (doc.enrollment.learner, doc.enrollment.course_id.clone());
        let mut enrollments = self.enrollments.write().unwrap();
        let merged = match enrollments.remove(&key) {
            Some(existing) => EnrollmentDoc::merge(existing, doc),
            None => doc,
        };
        enrollments.insert(key, merged.clone());
        merged
    }

    fn pending_enrollments(&self, limit: usize) -> Vec<EnrollmentDoc> {
        self.enrollments
            .read()
            .unwrap()
            .values()
            .filter(|doc| doc.pending_ledger_sync)
            .cloned()
            .sorted_by_key(|doc| doc.last_reconciled_at)
            .take(limit)
            .collect()
    }

    fn receipt(&self, learner: &Pubkey, achievement_id: &str) -> Option<ReceiptDoc> {
        self.receipts
            .read()
            .unwrap()
            .get(&(*learner, achievement_id.to_string()))
            .cloned()
    }

    fn upsert_receipt(&self, doc: ReceiptDoc) {
        self.receipts
            .write()
            .unwrap()
            .entry((doc.learner, doc.achievement_id.clone()))
            .or_insert(doc);
    }

    fn streak(&self, user: &Pubkey) -> Option<StreakRecord> {
        self.streaks.read().unwrap().get(user).cloned()
    }

    fn upsert_streak(&self, record: StreakRecord) {
        self.streaks.write().unwrap().insert(record.user, record);
    }
}

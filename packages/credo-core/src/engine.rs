//! The reconciliation engine: receives learner actions, mutates the
//! mirror optimistically, drives ledger transactions through the
//! orchestrator, and converges the two copies on partial failure.
//!
//! Failure-tolerance contract: the mirror may run ahead of the ledger
//! for a bounded window (flagged `pending_ledger_sync`), never behind it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use credo_std::MAX_LESSONS;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use tracing::{debug, info, warn};

use crate::error::{AwardOutcome, CoreError, LedgerStatus};
use crate::ledger::{LedgerClient, LedgerRpc, SubmitOutcome};
use crate::mirror::{EnrollmentDoc, MirrorStore, ReceiptDoc};
use crate::orchestrator::{AwardBuild, TransactionOrchestrator, WalletSigner};
use crate::state::{AchievementReceipt, Enrollment, EnrollmentState, ProgramConfig};
use crate::streak::{self, Clock, StreakUpdate};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CourseMeta {
    pub course_id: String,
    pub lesson_count: u16,
    pub prerequisite: Option<String>,
}

/// Course/lesson content catalog, consumed read-only for prerequisite
/// checks and the finalize threshold.
pub trait ContentStore: Send + Sync {
    fn course(&self, course_id: &str) -> Option<CourseMeta>;
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Progress {
    pub completed_indices: Vec<usize>,
    pub percent_complete: u8,
    pub state: EnrollmentState,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CompletionResult {
    pub doc: EnrollmentDoc,
    pub ledger_status: LedgerStatus,
}

pub struct ReconciliationEngine<R, C, M, K> {
    ledger: LedgerClient<R>,
    content: C,
    mirror: M,
    backend: Keypair,
    clock: K,
    locks: Mutex<HashMap<(Pubkey, String), Arc<Mutex<()>>>>,
}

impl<R, C, M, K> ReconciliationEngine<R, C, M, K>
where
    R: LedgerRpc,
    C: ContentStore,
    M: MirrorStore,
    K: Clock,
{
    pub fn new(ledger: LedgerClient<R>, content: C, mirror: M, backend: Keypair, clock: K) -> Self {
        Self {
            ledger,
            content,
            mirror,
            backend,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn mirror(&self) -> &M {
        &self.mirror
    }

    pub fn ledger(&self) -> &LedgerClient<R> {
        &self.ledger
    }

    fn orchestrator(&self) -> TransactionOrchestrator<'_, R> {
        TransactionOrchestrator::new(&self.ledger, &self.backend)
    }

    /// Single-writer discipline per (learner, scope): concurrent actions
    /// on the same enrollment, award, or streak serialize here; distinct
    /// learners never contend.
    fn entry_lock(&self, learner: &Pubkey, scope: String) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .unwrap()
                .entry((*learner, scope))
                .or_default(),
        )
    }

    fn ensure_not_paused(&self) -> Result<(), CoreError> {
        match self.ledger.fetch::<ProgramConfig>(&ProgramConfig::pda().0)? {
            Some(config) if config.paused => Err(CoreError::ProgramPaused),
            _ => Ok(()),
        }
    }

    fn course(&self, course_id: &str) -> Result<CourseMeta, CoreError> {
        let course = self
            .content
            .course(course_id)
            .ok_or_else(|| CoreError::CourseNotFound(course_id.to_string()))?;
        if usize::from(course.lesson_count) > MAX_LESSONS {
            return Err(CoreError::CourseTooLarge {
                course_id: course_id.to_string(),
                lesson_count: u32::from(course.lesson_count),
            });
        }
        Ok(course)
    }

    /// Loads the enrollment view, mirror first, falling back to the
    /// authoritative copy on a cold cache.
    fn load_doc(&self, learner: &Pubkey, course_id: &str) -> Result<Option<EnrollmentDoc>, CoreError> {
        if let Some(doc) = self.mirror.enrollment(learner, course_id) {
            return Ok(Some(doc));
        }
        let (pda, _) = Enrollment::pda(learner, course_id);
        Ok(self
            .ledger
            .fetch::<Enrollment>(&pda)?
            .map(|enrollment| self.mirror.upsert_enrollment(EnrollmentDoc::new(enrollment, false))))
    }

    /// Folds the authoritative copy into the mirror doc: bits union (the
    /// mirror is never behind the ledger), monotonic fields adopt the
    /// chain's values, and the pending flag clears only when the chain
    /// covers every mirror bit.
    fn absorb_chain(doc: &mut EnrollmentDoc, chain: &Enrollment) {
        doc.enrollment.bitmap = doc.enrollment.bitmap.union(&chain.bitmap);
        doc.enrollment.finalized_at = doc.enrollment.finalized_at.or(chain.finalized_at);
        doc.enrollment.credential_asset =
            doc.enrollment.credential_asset.or(chain.credential_asset);
        doc.pending_ledger_sync = !chain.bitmap.covers(&doc.enrollment.bitmap);
    }

    fn fetch_enrollment(&self, learner: &Pubkey, course_id: &str) -> Result<Option<Enrollment>, CoreError> {
        let (pda, _) = Enrollment::pda(learner, course_id);
        self.ledger.fetch(&pda)
    }

    // ---- public operations -------------------------------------------

    /// Enrolls the learner, enforcing any declared prerequisite before
    /// touching the ledger. Idempotent: an existing record is returned
    /// as-is, unless it is mirror-only with no ledger counterpart, in
    /// which case the enroll write is re-derived so a failed first
    /// attempt cannot strand the learner.
    pub fn enroll(
        &self,
        wallet: &dyn WalletSigner,
        learner: Pubkey,
        course_id: &str,
    ) -> Result<EnrollmentDoc, CoreError> {
        let course = self.course(course_id)?;
        self.ensure_not_paused()?;
        let lock = self.entry_lock(&learner, format!("course:{course_id}"));
        let _guard = lock.lock().unwrap();

        if let Some(existing) = self.load_doc(&learner, course_id)? {
            if !existing.pending_ledger_sync
                || self.fetch_enrollment(&learner, course_id)?.is_some()
            {
                return Ok(existing);
            }
            // Mirror-only record from an earlier failed submission;
            // fall through and submit the enroll transaction again.
        }

        if let Some(prerequisite) = &course.prerequisite {
            let finalized = self
                .load_doc(&learner, prerequisite)?
                .map(|doc| doc.enrollment.state() >= EnrollmentState::Finalized)
                .unwrap_or(false);
            if !finalized {
                return Err(CoreError::PrerequisiteNotMet {
                    learner,
                    prerequisite: prerequisite.clone(),
                });
            }
        }

        // Optimistic mirror record first; the ledger write may lag.
        let mut doc = self.mirror.upsert_enrollment(EnrollmentDoc::new(
            Enrollment::new(learner, course_id.to_string(), course.lesson_count),
            true,
        ));

        let tx = self
            .orchestrator()
            .build_enroll(&learner, course_id, course.lesson_count);
        let tx = wallet.sign_transaction(tx)?;
        match self.ledger.submit_and_confirm(&tx) {
            Ok(SubmitOutcome::Confirmed(_)) => {
                if let Some(chain) = self.fetch_enrollment(&learner, course_id)? {
                    Self::absorb_chain(&mut doc, &chain);
                }
                info!(%learner, course_id, "enrollment confirmed");
            }
            Ok(SubmitOutcome::Unknown(signature)) => {
                // Terminal re-check: the transaction may have landed
                // after we stopped waiting.
                match self.fetch_enrollment(&learner, course_id)? {
                    Some(chain) => Self::absorb_chain(&mut doc, &chain),
                    None => warn!(%learner, course_id, %signature, "enrollment unconfirmed, mirror ahead"),
                }
            }
            Err(CoreError::RejectedByLedger(reason)) => {
                warn!(%learner, course_id, %reason, "enroll rejected, keeping mirror-only record");
            }
            Err(err) => return Err(err),
        }

        doc.last_reconciled_at = Some(self.clock.now());
        Ok(self.mirror.upsert_enrollment(doc))
    }

    /// Records one lesson completion. The mirror bitmap is mutated
    /// optimistically and flagged pending before the ledger write; on
    /// 100% completion the finalize and credential-mint steps run
    /// sequentially, each independently idempotent, so re-invoking the
    /// whole flow after a crash is safe.
    pub fn complete_lesson(
        &self,
        wallet: &dyn WalletSigner,
        learner: Pubkey,
        course_id: &str,
        lesson_index: u16,
    ) -> Result<CompletionResult, CoreError> {
        let course = self.course(course_id)?;
        if lesson_index >= course.lesson_count {
            return Err(CoreError::LessonOutOfRange {
                index: usize::from(lesson_index),
                lesson_total: course.lesson_count,
            });
        }
        self.ensure_not_paused()?;
        let lock = self.entry_lock(&learner, format!("course:{course_id}"));
        let _guard = lock.lock().unwrap();

        let mut doc = self
            .load_doc(&learner, course_id)?
            .ok_or_else(|| CoreError::NotEnrolled {
                learner,
                course_id: course_id.to_string(),
            })?;

        let index = usize::from(lesson_index);
        let already_synced = doc.enrollment.bitmap.is_set(index) && !doc.pending_ledger_sync;

        let ledger_status = if already_synced {
            LedgerStatus::Confirmed
        } else {
            doc.enrollment.bitmap.set(index);
            doc.pending_ledger_sync = true;
            doc = self.mirror.upsert_enrollment(doc);

            let tx = self
                .orchestrator()
                .build_complete_lesson(&learner, course_id, lesson_index);
            match self.ledger.submit_and_confirm(&tx) {
                Ok(SubmitOutcome::Confirmed(_)) => {
                    if let Some(chain) = self.fetch_enrollment(&learner, course_id)? {
                        Self::absorb_chain(&mut doc, &chain);
                    }
                    LedgerStatus::Confirmed
                }
                Ok(SubmitOutcome::Unknown(signature)) => {
                    // The outcome is unknown, not failed: one terminal
                    // re-check decides what we report. Never resubmit
                    // blindly from here.
                    match self.fetch_enrollment(&learner, course_id)? {
                        Some(chain) if chain.bitmap.is_set(index) => {
                            Self::absorb_chain(&mut doc, &chain);
                            debug!(%signature, "completion landed after deadline");
                            LedgerStatus::Confirmed
                        }
                        _ => {
                            warn!(%learner, course_id, lesson_index, %signature, "completion pending ledger sync");
                            LedgerStatus::Pending
                        }
                    }
                }
                Err(CoreError::RejectedByLedger(reason)) => {
                    warn!(%learner, course_id, lesson_index, %reason, "completion rejected, mirror stays ahead");
                    LedgerStatus::Failed(reason)
                }
                Err(err) => return Err(err),
            }
        };

        if ledger_status == LedgerStatus::Confirmed && doc.enrollment.is_complete() {
            self.finalize_and_mint(wallet, &mut doc)?;
        }

        doc.last_reconciled_at = Some(self.clock.now());
        let doc = self.mirror.upsert_enrollment(doc);
        Ok(CompletionResult { doc, ledger_status })
    }

    /// Drives finalize, then credential mint. Each step re-reads the
    /// authoritative copy and skips work already done, so this is safe to
    /// re-enter at any point.
    fn finalize_and_mint(
        &self,
        wallet: &dyn WalletSigner,
        doc: &mut EnrollmentDoc,
    ) -> Result<(), CoreError> {
        let learner = doc.enrollment.learner;
        let course_id = doc.enrollment.course_id.clone();

        if doc.enrollment.finalized_at.is_none() {
            let tx = self.orchestrator().build_finalize(&learner, &course_id);
            match self.ledger.submit_and_confirm(&tx) {
                Ok(_) => {}
                Err(CoreError::RejectedByLedger(reason)) => {
                    warn!(%learner, course_id, %reason, "finalize rejected, will resume later");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
            match self.fetch_enrollment(&learner, &course_id)? {
                Some(chain) if chain.finalized_at.is_some() => {
                    Self::absorb_chain(doc, &chain);
                    info!(%learner, course_id, "course finalized");
                }
                _ => return Ok(()),
            }
        }

        if doc.enrollment.credential_asset.is_none() {
            let (tx, asset) = self.orchestrator().build_mint_credential(&learner, &course_id);
            let tx = wallet.sign_transaction(tx)?;
            match self.ledger.submit_and_confirm(&tx) {
                Ok(_) => {}
                Err(CoreError::RejectedByLedger(reason)) => {
                    warn!(%learner, course_id, %reason, "credential mint rejected, will resume later");
                    return Ok(());
                }
                Err(err) => return Err(err),
            }
            // Whether confirmed or timed out, the chain decides which
            // asset (if any) is now recorded.
            if let Some(chain) = self.fetch_enrollment(&learner, &course_id)? {
                Self::absorb_chain(doc, &chain);
            }
            if doc.enrollment.credential_asset.is_some() {
                info!(%learner, course_id, %asset, "credential issued");
            }
        }

        Ok(())
    }

    pub fn progress(&self, learner: Pubkey, course_id: &str) -> Result<Progress, CoreError> {
        let doc = self
            .load_doc(&learner, course_id)?
            .ok_or_else(|| CoreError::NotEnrolled {
                learner,
                course_id: course_id.to_string(),
            })?;
        Ok(Progress {
            completed_indices: doc.enrollment.bitmap.indices(),
            percent_complete: doc.enrollment.percent_complete(),
            state: doc.enrollment.state(),
        })
    }

    /// Streak accounting: at most one streak mutation per user per
    /// calendar day; same-day calls merge counters without a bonus.
    pub fn record_daily_activity(&self, user: Pubkey, xp: u64) -> StreakUpdate {
        let lock = self.entry_lock(&user, "streak".to_string());
        let _guard = lock.lock().unwrap();

        let today = self.clock.now().date_naive();
        let update = streak::record_activity(self.mirror.streak(&user), user, today, xp);
        self.mirror.upsert_streak(update.record.clone());
        debug!(%user, outcome = ?update.outcome, bonus = update.bonus_xp, "daily activity recorded");
        update
    }

    /// Bounded-supply, once-per-learner achievement issuance. The
    /// pre-build checks are advisory; the ledger program is the
    /// authoritative enforcement point, so a rejection triggers one
    /// re-check-and-rebuild cycle to classify what actually happened.
    pub fn award_achievement(
        &self,
        wallet: &dyn WalletSigner,
        learner: Pubkey,
        achievement_id: &str,
    ) -> Result<AwardOutcome, CoreError> {
        self.ensure_not_paused()?;
        let lock = self.entry_lock(&learner, format!("achievement:{achievement_id}"));
        let _guard = lock.lock().unwrap();

        if self.mirror.receipt(&learner, achievement_id).is_some() {
            return Ok(AwardOutcome::AlreadyAwarded);
        }

        for attempt in 0..2 {
            match self
                .orchestrator()
                .build_award_achievement(&learner, achievement_id)?
            {
                AwardBuild::AlreadyAwarded => {
                    self.mirror_receipt_from_chain(&learner, achievement_id)?;
                    return Ok(AwardOutcome::AlreadyAwarded);
                }
                AwardBuild::SupplyExhausted => return Ok(AwardOutcome::SupplyExhausted),
                AwardBuild::Transaction { tx, asset } => {
                    let tx = wallet.sign_transaction(tx)?;
                    match self.ledger.submit_and_confirm(&tx) {
                        Ok(SubmitOutcome::Confirmed(_)) => {
                            self.mirror.upsert_receipt(ReceiptDoc {
                                achievement_id: achievement_id.to_string(),
                                learner,
                                asset,
                            });
                            info!(%learner, achievement_id, %asset, "achievement issued");
                            return Ok(AwardOutcome::Issued { asset });
                        }
                        Ok(SubmitOutcome::Unknown(signature)) => {
                            // Terminal re-check before reporting.
                            let (pda, _) = AchievementReceipt::pda(achievement_id, &learner);
                            return match self.ledger.fetch::<AchievementReceipt>(&pda)? {
                                Some(receipt) => {
                                    self.mirror.upsert_receipt(ReceiptDoc {
                                        achievement_id: receipt.achievement_id,
                                        learner,
                                        asset: receipt.asset,
                                    });
                                    Ok(AwardOutcome::Issued {
                                        asset: receipt.asset,
                                    })
                                }
                                None => {
                                    warn!(%learner, achievement_id, %signature, "award outcome unresolved");
                                    Ok(AwardOutcome::Pending)
                                }
                            };
                        }
                        Err(CoreError::RejectedByLedger(reason)) if attempt == 0 => {
                            // Permanent for that exact transaction only.
                            // Looping re-runs the pre-checks (a racing
                            // award turns into AlreadyAwarded here) and
                            // rebuilds with fresh parameters.
                            warn!(%learner, achievement_id, %reason, "award rejected, re-checking and rebuilding");
                        }
                        Err(CoreError::RejectedByLedger(reason)) => {
                            // The rebuilt transaction was refused too.
                            // Nothing was issued; a later call starts
                            // over from the pre-checks.
                            warn!(%learner, achievement_id, %reason, "rebuilt award rejected, deferring");
                            return Ok(AwardOutcome::Pending);
                        }
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        unreachable!("award loop always returns within two attempts")
    }

    fn mirror_receipt_from_chain(
        &self,
        learner: &Pubkey,
        achievement_id: &str,
    ) -> Result<(), CoreError> {
        let (pda, _) = AchievementReceipt::pda(achievement_id, learner);
        if let Some(receipt) = self.ledger.fetch::<AchievementReceipt>(&pda)? {
            self.mirror.upsert_receipt(ReceiptDoc {
                achievement_id: receipt.achievement_id,
                learner: receipt.learner,
                asset: receipt.asset,
            });
        }
        Ok(())
    }

    /// Background reconciliation pass: walks pending mirror records,
    /// stalest first, and re-derives the missing ledger writes. A
    /// repeated "set bit already on-chain" submission is a no-op in the
    /// program, so re-derivation is idempotent. Credential minting needs
    /// the learner's wallet and resumes on their next action instead.
    /// Returns how many records converged.
    pub fn reconcile_pending(&self, limit: usize) -> Result<usize, CoreError> {
        let mut converged = 0;

        for stale in self.mirror.pending_enrollments(limit) {
            let learner = stale.enrollment.learner;
            let course_id = stale.enrollment.course_id.clone();
            let lock = self.entry_lock(&learner, format!("course:{course_id}"));
            let _guard = lock.lock().unwrap();

            // Re-read under the lock; a learner action may have synced it.
            let Some(mut doc) = self.mirror.enrollment(&learner, &course_id) else {
                continue;
            };
            if !doc.pending_ledger_sync {
                continue;
            }

            let chain = match self.fetch_enrollment(&learner, &course_id) {
                Ok(chain) => chain,
                Err(err) => {
                    // Corruption is operator-facing, not retryable here.
                    warn!(%learner, course_id, %err, "skipping record during reconciliation");
                    continue;
                }
            };

            let Some(chain) = chain else {
                // No authoritative record to converge with; enrolling
                // requires the learner's wallet, so this stays pending.
                debug!(%learner, course_id, "mirror-only record awaits learner enroll");
                continue;
            };

            let mut synced = true;
            for index in doc.enrollment.bitmap.indices() {
                if chain.bitmap.is_set(index) {
                    continue;
                }
                let tx = self.orchestrator().build_complete_lesson(
                    &learner,
                    &course_id,
                    index as u16,
                );
                match self.ledger.submit_and_confirm(&tx) {
                    Ok(SubmitOutcome::Confirmed(_)) => {}
                    outcome => {
                        debug!(%learner, course_id, index, ?outcome, "bit resync did not confirm");
                        synced = false;
                        break;
                    }
                }
            }

            if let Ok(Some(chain)) = self.fetch_enrollment(&learner, &course_id) {
                if synced && chain.is_complete() && chain.finalized_at.is_none() {
                    let tx = self.orchestrator().build_finalize(&learner, &course_id);
                    if let Err(err) = self.ledger.submit_and_confirm(&tx) {
                        warn!(%learner, course_id, %err, "finalize resync failed");
                    }
                }
            }
            if let Ok(Some(chain)) = self.fetch_enrollment(&learner, &course_id) {
                Self::absorb_chain(&mut doc, &chain);
            }

            if !doc.pending_ledger_sync {
                converged += 1;
                info!(%learner, course_id, "mirror record converged with ledger");
            }
            doc.last_reconciled_at = Some(self.clock.now());
            self.mirror.upsert_enrollment(doc);
        }

        Ok(converged)
    }
}

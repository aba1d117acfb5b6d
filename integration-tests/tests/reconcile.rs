use credo_core::error::{CoreError, LedgerStatus};
use credo_core::mirror::MirrorStore;
use credo_core::state::{Enrollment, EnrollmentState};
use solana_sdk::signer::Signer;

pub mod common;

use common::{Context, Fault};

#[test]
fn hidden_confirmation_resolves_without_resubmitting() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();
    ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();

    ctx.ledger.set_fault(Fault::HideConfirmation);
    let before = ctx.ledger.submissions();
    let result = ctx
        .complete_lesson(&ctx.learner, learner, "rust-101", 0)
        .unwrap();

    // The write landed; the terminal re-check reads it off the ledger
    // instead of submitting again.
    assert_eq!(result.ledger_status, LedgerStatus::Confirmed);
    assert!(!result.doc.pending_ledger_sync);
    assert_eq!(ctx.ledger.submissions(), before + 1);
}

#[test]
fn rejected_completion_converges_on_the_next_pass() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();
    ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();

    ctx.ledger.set_fault(Fault::RejectNext("node overloaded".into()));
    let result = ctx
        .complete_lesson(&ctx.learner, learner, "rust-101", 1)
        .unwrap();
    assert!(matches!(result.ledger_status, LedgerStatus::Failed(_)));
    assert!(result.doc.pending_ledger_sync);
    assert!(!ctx
        .chain_enrollment(&learner, "rust-101")
        .unwrap()
        .bitmap
        .is_set(1));

    assert_eq!(ctx.reconcile_pending(10).unwrap(), 1);

    let chain = ctx.chain_enrollment(&learner, "rust-101").unwrap();
    assert!(chain.bitmap.is_set(1));
    let doc = ctx.mirror().enrollment(&learner, "rust-101").unwrap();
    assert!(!doc.pending_ledger_sync);
}

#[test]
fn dropped_submission_converges_on_the_next_pass() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();
    ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();

    ctx.ledger.set_fault(Fault::DropNext);
    let result = ctx
        .complete_lesson(&ctx.learner, learner, "rust-101", 0)
        .unwrap();
    assert_eq!(result.ledger_status, LedgerStatus::Pending);

    assert_eq!(ctx.reconcile_pending(10).unwrap(), 1);
    assert!(ctx
        .chain_enrollment(&learner, "rust-101")
        .unwrap()
        .bitmap
        .is_set(0));
}

#[test]
fn reconcile_finalizes_and_learner_action_mints() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();
    ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();
    for index in [0, 1] {
        ctx.complete_lesson(&ctx.learner, learner, "rust-101", index)
            .unwrap();
    }

    // The final lesson write is rejected: the mirror shows 100%, the
    // ledger does not.
    ctx.ledger.set_fault(Fault::RejectNext("node overloaded".into()));
    let result = ctx
        .complete_lesson(&ctx.learner, learner, "rust-101", 2)
        .unwrap();
    assert!(matches!(result.ledger_status, LedgerStatus::Failed(_)));
    assert_eq!(result.doc.enrollment.state(), EnrollmentState::PartiallyComplete);

    // Background pass replays the bit and finalizes; minting waits for
    // the learner's wallet.
    assert_eq!(ctx.reconcile_pending(10).unwrap(), 1);
    let chain = ctx.chain_enrollment(&learner, "rust-101").unwrap();
    assert!(chain.finalized_at.is_some());
    assert!(chain.credential_asset.is_none());

    let result = ctx
        .complete_lesson(&ctx.learner, learner, "rust-101", 2)
        .unwrap();
    assert_eq!(
        result.doc.enrollment.state(),
        EnrollmentState::CredentialIssued
    );
}

#[test]
fn mirror_only_record_stays_pending() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();

    ctx.ledger
        .set_fault(Fault::RejectNext("insufficient fee".into()));
    ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();

    // Enrolling needs the learner's signature, so the pass cannot
    // converge this record on its own.
    assert_eq!(ctx.reconcile_pending(10).unwrap(), 0);
    let doc = ctx.mirror().enrollment(&learner, "rust-101").unwrap();
    assert!(doc.pending_ledger_sync);
    assert!(ctx.chain_enrollment(&learner, "rust-101").is_none());
}

#[test]
fn stranded_enrollment_recovers_end_to_end() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();

    ctx.ledger
        .set_fault(Fault::RejectNext("insufficient fee".into()));
    ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();

    // Lesson writes fail on-chain while the enrollment account is
    // missing; the mirror keeps running ahead.
    let result = ctx
        .complete_lesson(&ctx.learner, learner, "rust-101", 0)
        .unwrap();
    assert!(matches!(result.ledger_status, LedgerStatus::Failed(_)));

    // Retrying enroll re-derives the ledger record; the background pass
    // then replays the mirror-only completion bit.
    let doc = ctx.enroll(&ctx.learner, learner, "rust-101").unwrap();
    assert!(doc.pending_ledger_sync);
    assert_eq!(ctx.reconcile_pending(10).unwrap(), 1);

    let chain = ctx.chain_enrollment(&learner, "rust-101").unwrap();
    assert!(chain.bitmap.is_set(0));
    let doc = ctx.mirror().enrollment(&learner, "rust-101").unwrap();
    assert!(!doc.pending_ledger_sync);
}

#[test]
fn reconcile_honors_the_batch_limit() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();
    for course_id in ["rust-101", "intro"] {
        ctx.enroll(&ctx.learner, learner, course_id).unwrap();
        ctx.ledger.set_fault(Fault::DropNext);
        ctx.complete_lesson(&ctx.learner, learner, course_id, 0)
            .unwrap();
    }

    assert_eq!(ctx.reconcile_pending(1).unwrap(), 1);
    assert_eq!(ctx.reconcile_pending(10).unwrap(), 1);
}

#[test]
fn malformed_ledger_account_surfaces_as_an_error() {
    let ctx = Context::default();
    let learner = ctx.learner.pubkey();

    let (pda, _) = Enrollment::pda(&learner, "rust-101");
    ctx.ledger.set_account(pda, vec![0xde, 0xad, 0xbe, 0xef]);

    let err = ctx.progress(learner, "rust-101").unwrap_err();
    assert!(matches!(err, CoreError::MalformedAccount { .. }));
}

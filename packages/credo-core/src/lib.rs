//! Progress & credential reconciliation core.
//!
//! Tracks lesson completion per enrollment, drives the enrollment
//! lifecycle through finalization and credential issuance, accounts for
//! daily-activity streaks, and keeps the authoritative on-chain copy and
//! the off-chain mirror store convergent. The mirror is allowed to run
//! ahead of the ledger for a bounded window, never behind it.

pub mod codec;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod mirror;
pub mod orchestrator;
pub mod state;
pub mod streak;

pub use engine::{CompletionResult, ContentStore, CourseMeta, Progress, ReconciliationEngine};
pub use error::{AwardOutcome, CoreError, LedgerStatus};
pub use ledger::{LedgerClient, LedgerRpc, SignatureStatus, SubmitOutcome};
pub use mirror::{EnrollmentDoc, InMemoryMirror, MirrorStore, ReceiptDoc};
pub use orchestrator::{TransactionOrchestrator, WalletSigner};
pub use state::EnrollmentState;
pub use streak::{Clock, StreakOutcome, StreakUpdate, SystemClock};

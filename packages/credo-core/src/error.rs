use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("course {0} not found")]
    CourseNotFound(String),

    #[error("learner {learner} is not enrolled in {course_id}")]
    NotEnrolled { learner: Pubkey, course_id: String },

    #[error("lesson index {index} out of range for course with {lesson_total} lessons")]
    LessonOutOfRange { index: usize, lesson_total: u16 },

    #[error("course {course_id} declares {lesson_count} lessons, above the bitmap ceiling")]
    CourseTooLarge { course_id: String, lesson_count: u32 },

    #[error("prerequisite course {prerequisite} not finalized by learner {learner}")]
    PrerequisiteNotMet {
        learner: Pubkey,
        prerequisite: String,
    },

    /// Data corruption on a ledger account. Surfaced to operators and
    /// never retried.
    #[error("malformed account {address}: {source}")]
    MalformedAccount {
        address: Pubkey,
        #[source]
        source: CodecError,
    },

    /// The ledger refused the transaction. Permanent for that exact
    /// transaction; a retry must rebuild with fresh parameters.
    #[error("transaction rejected by ledger: {0}")]
    RejectedByLedger(String),

    #[error("achievement type {0} not found")]
    AchievementNotFound(String),

    #[error("program is paused")]
    ProgramPaused,

    #[error("wallet refused to sign: {0}")]
    Wallet(String),
}

/// What the UI layer observes about a ledger-backed action. Ledger
/// failures never bubble out of the engine as errors; they collapse into
/// this three-way status.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum LedgerStatus {
    Confirmed,
    Pending,
    Failed(String),
}

/// Outcome of an achievement-award request. `AlreadyAwarded` and
/// `SupplyExhausted` are normal results, not errors; `Pending` reports a
/// submission that neither confirmed nor issued a receipt, which a later
/// call re-checks and retries.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum AwardOutcome {
    Issued { asset: Pubkey },
    AlreadyAwarded,
    SupplyExhausted,
    Pending,
}

use credo_std::{LessonBitmap, MAX_LESSONS};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// On-chain credentials program this client builds transactions for.
pub const CREDENTIALS_PROGRAM_ID: Pubkey = Pubkey::new_from_array([
    0x63, 0x72, 0x65, 0x64, 0x6f, 0x2d, 0x70, 0x72, 0x6f, 0x67, 0x72, 0x61, 0x6d, 0x2d, 0x76, 0x31,
    0x2d, 0x63, 0x72, 0x65, 0x64, 0x65, 0x6e, 0x74, 0x69, 0x61, 0x6c, 0x73, 0x2d, 0x69, 0x64, 0x00,
]);

pub const ENROLLMENT_SEED: &[u8] = b"enrollment";
pub const ACHIEVEMENT_TYPE_SEED: &[u8] = b"achievement_type";
pub const RECEIPT_SEED: &[u8] = b"receipt";
pub const CONFIG_SEED: &[u8] = b"config";

pub const MAX_ID_LEN: usize = 64;

/// Enrollment lifecycle, derived from record fields. `NotEnrolled` is the
/// absence of a record. The machine is monotonic: no transition clears
/// completion bits, un-finalizes, or revokes a credential.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum EnrollmentState {
    Enrolled,
    PartiallyComplete,
    Finalized,
    CredentialIssued,
}

/// One learner's record for one course. Two physical copies exist: the
/// ledger copy (authoritative) and the mirror copy (cache); the ledger
/// copy is the tiebreaker on conflict.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct Enrollment {
    pub learner: Pubkey,
    pub course_id: String,
    pub lesson_total: u16,
    pub bitmap: LessonBitmap,
    pub finalized_at: Option<i64>,
    pub credential_asset: Option<Pubkey>,
}

impl Enrollment {
    pub fn new(learner: Pubkey, course_id: String, lesson_total: u16) -> Self {
        debug_assert!(lesson_total as usize <= MAX_LESSONS);
        Self {
            learner,
            course_id,
            lesson_total,
            bitmap: LessonBitmap::new(),
            finalized_at: None,
            credential_asset: None,
        }
    }

    pub fn pda(learner: &Pubkey, course_id: &str) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[ENROLLMENT_SEED, learner.as_ref(), course_id.as_bytes()],
            &CREDENTIALS_PROGRAM_ID,
        )
    }

    pub fn state(&self) -> EnrollmentState {
        if self.credential_asset.is_some() {
            EnrollmentState::CredentialIssued
        } else if self.finalized_at.is_some() {
            EnrollmentState::Finalized
        } else if self.bitmap.count() > 0 {
            EnrollmentState::PartiallyComplete
        } else {
            EnrollmentState::Enrolled
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bitmap.count() >= u32::from(self.lesson_total)
    }

    pub fn percent_complete(&self) -> u8 {
        if self.lesson_total == 0 {
            return 100;
        }
        (self.bitmap.count() * 100 / u32::from(self.lesson_total)) as u8
    }
}

/// Bounded-supply achievement definition. `current_supply` only ever
/// increases and never exceeds `max_supply`; the on-chain program is the
/// authoritative enforcement point for that bound.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct AchievementType {
    pub achievement_id: String,
    pub authority: Pubkey,
    pub max_supply: u64,
    pub current_supply: u64,
}

impl AchievementType {
    pub fn pda(achievement_id: &str) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[ACHIEVEMENT_TYPE_SEED, achievement_id.as_bytes()],
            &CREDENTIALS_PROGRAM_ID,
        )
    }

    pub fn supply_exhausted(&self) -> bool {
        self.current_supply >= self.max_supply
    }
}

/// Proof-of-award marker. Its existence at the derived address is the
/// fact being checked; one receipt per (achievement, learner) pair.
#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct AchievementReceipt {
    pub achievement_id: String,
    pub learner: Pubkey,
    pub asset: Pubkey,
}

impl AchievementReceipt {
    pub fn pda(achievement_id: &str, learner: &Pubkey) -> (Pubkey, u8) {
        Pubkey::find_program_address(
            &[RECEIPT_SEED, achievement_id.as_bytes(), learner.as_ref()],
            &CREDENTIALS_PROGRAM_ID,
        )
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Debug)]
pub struct ProgramConfig {
    pub authority: Pubkey,
    pub paused: bool,
}

impl ProgramConfig {
    pub fn pda() -> (Pubkey, u8) {
        Pubkey::find_program_address(&[CONFIG_SEED], &CREDENTIALS_PROGRAM_ID)
    }
}

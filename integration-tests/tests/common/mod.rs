//! Shared harness: an in-memory ledger that enforces the credentials
//! program's rules (the authoritative enforcement point), plus a test
//! context wiring it to the engine with a manual clock.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use borsh::BorshDeserialize;
use chrono::{DateTime, TimeZone, Utc};
use credo_core::codec::AccountCodec;
use credo_core::engine::{ContentStore, CourseMeta, ReconciliationEngine};
use credo_core::ledger::{LedgerClient, LedgerRpc, SignatureStatus};
use credo_core::mirror::InMemoryMirror;
use credo_core::orchestrator::{
    AwardAchievementArgs, CompleteLessonArgs, EnrollArgs, AWARD_ACHIEVEMENT_DISCRIMINATOR,
    COMPLETE_LESSON_DISCRIMINATOR, ENROLL_DISCRIMINATOR, FINALIZE_COURSE_DISCRIMINATOR,
    MINT_CREDENTIAL_DISCRIMINATOR,
};
use credo_core::state::{
    AchievementReceipt, AchievementType, Enrollment, ProgramConfig, CREDENTIALS_PROGRAM_ID,
};
use credo_core::streak::Clock;
use derive_more::{Deref, DerefMut};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::signer::Signer;
use solana_sdk::transaction::Transaction;

pub enum Fault {
    /// Refuse the next submission outright.
    RejectNext(String),
    /// Apply the next transaction but never report its confirmation.
    HideConfirmation,
    /// Accept the next submission and silently discard it.
    DropNext,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<Pubkey, Vec<u8>>,
    confirmed: HashSet<Signature>,
    hidden: HashSet<Signature>,
    faults: VecDeque<Fault>,
    submissions: usize,
    now_ts: i64,
}

#[derive(Default)]
pub struct FakeLedger {
    inner: Mutex<Inner>,
}

impl FakeLedger {
    pub fn new() -> Arc<Self> {
        let ledger = Self::default();
        ledger.inner.lock().unwrap().now_ts = 1_767_225_600;
        Arc::new(ledger)
    }

    pub fn set_account(&self, address: Pubkey, data: Vec<u8>) {
        self.inner.lock().unwrap().accounts.insert(address, data);
    }

    /// Queues a one-shot fault; each submission consumes at most one.
    pub fn set_fault(&self, fault: Fault) {
        self.inner.lock().unwrap().faults.push_back(fault);
    }

    pub fn submissions(&self) -> usize {
        self.inner.lock().unwrap().submissions
    }

    pub fn has_account(&self, address: &Pubkey) -> bool {
        self.inner.lock().unwrap().accounts.contains_key(address)
    }

    pub fn account<T: AccountCodec>(&self, address: &Pubkey) -> Option<T> {
        let inner = self.inner.lock().unwrap();
        let bytes = inner.accounts.get(address)?;
        Some(T::decode(bytes).expect("test account decodes"))
    }

    fn process(inner: &mut Inner, tx: &Transaction) -> Result<(), String> {
        tx.verify()
            .map_err(|err| format!("signature verification failed: {err}"))?;

        let keys = &tx.message.account_keys;
        for ix in &tx.message.instructions {
            if keys[ix.program_id_index as usize] != CREDENTIALS_PROGRAM_ID {
                continue;
            }
            let accounts: Vec<Pubkey> = ix.accounts.iter().map(|&i| keys[i as usize]).collect();
            if ix.data.len() < 8 {
                return Err("instruction data too short".into());
            }
            let (discriminator, body) = ix.data.split_at(8);
            match <[u8; 8]>::try_from(discriminator).unwrap() {
                ENROLL_DISCRIMINATOR => {
                    let args = EnrollArgs::try_from_slice(body).map_err(|e| e.to_string())?;
                    let enrollment = accounts[0];
                    let learner = accounts[2];
                    if inner.accounts.contains_key(&enrollment) {
                        continue;
                    }
                    let record = Enrollment::new(learner, args.course_id, args.lesson_total);
                    inner.accounts.insert(enrollment, record.encode());
                }
                COMPLETE_LESSON_DISCRIMINATOR => {
                    let args =
                        CompleteLessonArgs::try_from_slice(body).map_err(|e| e.to_string())?;
                    let bytes = inner
                        .accounts
                        .get(&accounts[0])
                        .ok_or("enrollment account missing")?;
                    let mut record = Enrollment::decode(bytes).map_err(|e| e.to_string())?;
                    if args.lesson_index >= record.lesson_total {
                        return Err("lesson index out of range".into());
                    }
                    // Setting an already-set bit is a no-op on re-application.
                    record.bitmap.set(usize::from(args.lesson_index));
                    inner.accounts.insert(accounts[0], record.encode());
                }
                FINALIZE_COURSE_DISCRIMINATOR => {
                    let bytes = inner
                        .accounts
                        .get(&accounts[0])
                        .ok_or("enrollment account missing")?;
                    let mut record = Enrollment::decode(bytes).map_err(|e| e.to_string())?;
                    if !record.is_complete() {
                        return Err("course not complete".into());
                    }
                    if record.finalized_at.is_none() {
                        record.finalized_at = Some(inner.now_ts);
                        inner.accounts.insert(accounts[0], record.encode());
                    }
                }
                MINT_CREDENTIAL_DISCRIMINATOR => {
                    let bytes = inner
                        .accounts
                        .get(&accounts[0])
                        .ok_or("enrollment account missing")?;
                    let mut record = Enrollment::decode(bytes).map_err(|e| e.to_string())?;
                    if record.finalized_at.is_none() {
                        return Err("course not finalized".into());
                    }
                    if record.credential_asset.is_none() {
                        let asset = accounts[2];
                        record.credential_asset = Some(asset);
                        inner.accounts.insert(accounts[0], record.encode());
                        inner.accounts.insert(asset, vec![1]);
                    }
                }
                AWARD_ACHIEVEMENT_DISCRIMINATOR => {
                    let args =
                        AwardAchievementArgs::try_from_slice(body).map_err(|e| e.to_string())?;
                    let bytes = inner
                        .accounts
                        .get(&accounts[0])
                        .ok_or("achievement type missing")?;
                    let mut kind = AchievementType::decode(bytes).map_err(|e| e.to_string())?;
                    if inner.accounts.contains_key(&accounts[1]) {
                        return Err("receipt already exists".into());
                    }
                    if kind.supply_exhausted() {
                        return Err("supply exhausted".into());
                    }
                    kind.current_supply += 1;
                    let receipt = AchievementReceipt {
                        achievement_id: args.achievement_id,
                        learner: accounts[5],
                        asset: accounts[3],
                    };
                    inner.accounts.insert(accounts[0], kind.encode());
                    inner.accounts.insert(accounts[1], receipt.encode());
                }
                _ => return Err("unknown instruction".into()),
            }
        }
        Ok(())
    }
}

impl LedgerRpc for FakeLedger {
    fn get_account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().accounts.get(address).cloned()
    }

    fn latest_blockhash(&self) -> Hash {
        Hash::new_unique()
    }

    fn send_transaction(&self, tx: &Transaction) -> Result<Signature, String> {
        let mut inner = self.inner.lock().unwrap();
        inner.submissions += 1;
        let signature = tx.signatures[0];

        match inner.faults.pop_front() {
            Some(Fault::RejectNext(reason)) => return Err(reason),
            Some(Fault::DropNext) => return Ok(signature),
            Some(Fault::HideConfirmation) => {
                Self::process(&mut inner, tx)?;
                inner.hidden.insert(signature);
                return Ok(signature);
            }
            None => {}
        }

        Self::process(&mut inner, tx)?;
        inner.now_ts += 1;
        inner.confirmed.insert(signature);
        Ok(signature)
    }

    fn signature_status(&self, signature: &Signature) -> SignatureStatus {
        let inner = self.inner.lock().unwrap();
        if inner.hidden.contains(signature) || !inner.confirmed.contains(signature) {
            SignatureStatus::Unknown
        } else {
            SignatureStatus::Confirmed
        }
    }
}

#[derive(Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    pub fn starting_at(at: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(at)))
    }

    pub fn advance_days(&self, days: i64) {
        let mut now = self.0.lock().unwrap();
        *now += chrono::Duration::days(days);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub struct Catalog(HashMap<String, CourseMeta>);

impl ContentStore for Catalog {
    fn course(&self, course_id: &str) -> Option<CourseMeta> {
        self.0.get(course_id).cloned()
    }
}

impl Default for Catalog {
    fn default() -> Self {
        let courses = [
            CourseMeta {
                course_id: "rust-101".into(),
                lesson_count: 3,
                prerequisite: None,
            },
            CourseMeta {
                course_id: "rust-201".into(),
                lesson_count: 2,
                prerequisite: Some("rust-101".into()),
            },
            CourseMeta {
                course_id: "intro".into(),
                lesson_count: 1,
                prerequisite: None,
            },
        ];
        Self(
            courses
                .into_iter()
                .map(|course| (course.course_id.clone(), course))
                .collect(),
        )
    }
}

pub type Engine = ReconciliationEngine<Arc<FakeLedger>, Catalog, InMemoryMirror, ManualClock>;

#[derive(Deref, DerefMut)]
pub struct Context {
    #[deref]
    #[deref_mut]
    pub engine: Engine,
    pub ledger: Arc<FakeLedger>,
    pub clock: ManualClock,
    pub learner: Keypair,
    pub rival: Keypair,
}

impl Default for Context {
    fn default() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("credo_core=debug")
            .with_test_writer()
            .try_init();

        let ledger = FakeLedger::new();
        let clock = ManualClock::starting_at(Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap());
        let client =
            LedgerClient::new(Arc::clone(&ledger)).with_confirmation(3, Duration::from_millis(1));
        let engine = ReconciliationEngine::new(
            client,
            Catalog::default(),
            InMemoryMirror::default(),
            Keypair::new(),
            clock.clone(),
        );

        Self {
            engine,
            ledger,
            clock,
            learner: Keypair::new(),
            rival: Keypair::new(),
        }
    }
}

impl Context {
    pub fn seed_achievement(&self, achievement_id: &str, max_supply: u64) {
        let kind = AchievementType {
            achievement_id: achievement_id.to_string(),
            authority: Pubkey::new_unique(),
            max_supply,
            current_supply: 0,
        };
        self.ledger
            .set_account(AchievementType::pda(achievement_id).0, kind.encode());
    }

    pub fn set_paused(&self, paused: bool) {
        let config = ProgramConfig {
            authority: Pubkey::new_unique(),
            paused,
        };
        self.ledger
            .set_account(ProgramConfig::pda().0, config.encode());
    }

    pub fn chain_enrollment(&self, learner: &Pubkey, course_id: &str) -> Option<Enrollment> {
        self.ledger.account(&Enrollment::pda(learner, course_id).0)
    }

    pub fn chain_receipt(
        &self,
        learner: &Pubkey,
        achievement_id: &str,
    ) -> Option<AchievementReceipt> {
        self.ledger
            .account(&AchievementReceipt::pda(achievement_id, learner).0)
    }

    pub fn chain_achievement(&self, achievement_id: &str) -> AchievementType {
        self.ledger
            .account(&AchievementType::pda(achievement_id).0)
            .expect("achievement type seeded")
    }

    /// Enrolls and completes every lesson of `course_id` for `learner`.
    pub fn complete_course(&self, learner: &Keypair, course_id: &str) {
        self.engine
            .enroll(learner, learner.pubkey(), course_id)
            .unwrap();
        let total = self
            .chain_enrollment(&learner.pubkey(), course_id)
            .unwrap()
            .lesson_total;
        for index in 0..total {
            self.engine
                .complete_lesson(learner, learner.pubkey(), course_id, index)
                .unwrap();
        }
    }
}

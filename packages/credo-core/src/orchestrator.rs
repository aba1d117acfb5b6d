//! Builds the credentials program's transactions and drives co-signing.
//!
//! Each transaction kind carries a fixed signer set. The backend
//! custodial key and any freshly generated asset keypair sign here; the
//! learner's wallet always signs last, outside this module, through
//! [`WalletSigner`]; this core never holds the learner's private key.

use borsh::{BorshDeserialize, BorshSerialize};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use solana_sdk::system_program;
use solana_sdk::transaction::Transaction;
use tracing::debug;

use crate::error::CoreError;
use crate::ledger::{LedgerClient, LedgerRpc};
use crate::state::{
    AchievementReceipt, AchievementType, Enrollment, ProgramConfig, CREDENTIALS_PROGRAM_ID,
};

pub const ENROLL_DISCRIMINATOR: [u8; 8] = [88, 21, 200, 54, 105, 17, 240, 92];
pub const COMPLETE_LESSON_DISCRIMINATOR: [u8; 8] = [19, 177, 60, 143, 231, 86, 4, 128];
pub const FINALIZE_COURSE_DISCRIMINATOR: [u8; 8] = [240, 55, 130, 9, 188, 73, 162, 27];
pub const MINT_CREDENTIAL_DISCRIMINATOR: [u8; 8] = [47, 142, 208, 33, 96, 151, 78, 215];
pub const AWARD_ACHIEVEMENT_DISCRIMINATOR: [u8; 8] = [133, 28, 84, 246, 109, 52, 171, 6];

#[derive(BorshSerialize, BorshDeserialize, Clone, PartialEq, Eq, Debug)]
pub struct EnrollArgs {
    pub course_id: String,
    pub lesson_total: u16,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub struct CompleteLessonArgs {
    pub lesson_index: u16,
}

#[derive(BorshSerialize, BorshDeserialize, Clone, PartialEq, Eq, Debug)]
pub struct AwardAchievementArgs {
    pub achievement_id: String,
}

/// Final signature provider: the learner's wallet. Blanket-implemented
/// for any local [`Signer`], which is what tests use; the real wallet
/// adapter lives at the application boundary.
pub trait WalletSigner {
    fn sign_transaction(&self, tx: Transaction) -> Result<Transaction, CoreError>;
}

impl<S: Signer> WalletSigner for S {
    fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, CoreError> {
        let blockhash = tx.message.recent_blockhash;
        let signers: Vec<&dyn Signer> = vec![self];
        tx.try_partial_sign(&signers, blockhash)
            .map_err(|err| CoreError::Wallet(err.to_string()))?;
        Ok(tx)
    }
}

/// Result of the award pre-build checks. The checks are advisory; the
/// ledger program enforces supply and uniqueness authoritatively. They
/// still stop doomed transactions from wasting fees and round-trips.
pub enum AwardBuild {
    Transaction { tx: Transaction, asset: Pubkey },
    AlreadyAwarded,
    SupplyExhausted,
}

pub struct TransactionOrchestrator<'a, R> {
    ledger: &'a LedgerClient<R>,
    backend: &'a Keypair,
}

impl<'a, R: LedgerRpc> TransactionOrchestrator<'a, R> {
    pub fn new(ledger: &'a LedgerClient<R>, backend: &'a Keypair) -> Self {
        Self { ledger, backend }
    }

    fn instruction(
        discriminator: &[u8; 8],
        args: &impl BorshSerialize,
        accounts: Vec<AccountMeta>,
    ) -> Instruction {
        let mut data = discriminator.to_vec();
        borsh::to_writer(&mut data, args).expect("borsh serialization into Vec cannot fail");
        Instruction {
            program_id: CREDENTIALS_PROGRAM_ID,
            accounts,
            data,
        }
    }

    /// Enroll: the learner's wallet is the sole signer and fee payer.
    /// Returned unsigned; the caller's wallet supplies the signature.
    pub fn build_enroll(&self, learner: &Pubkey, course_id: &str, lesson_total: u16) -> Transaction {
        let (enrollment, _) = Enrollment::pda(learner, course_id);
        let ix = Self::instruction(
            &ENROLL_DISCRIMINATOR,
            &EnrollArgs {
                course_id: course_id.to_string(),
                lesson_total,
            },
            vec![
                AccountMeta::new(enrollment, false),
                AccountMeta::new_readonly(ProgramConfig::pda().0, false),
                AccountMeta::new(*learner, true),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
        );
        debug!(%learner, course_id, "built enroll transaction");
        Transaction::new_unsigned(Message::new_with_blockhash(
            &[ix],
            Some(learner),
            &self.ledger.latest_blockhash(),
        ))
    }

    /// Complete-lesson: server-authorized, so the backend custodial key
    /// signs and pays. Returned fully signed, ready for submission.
    pub fn build_complete_lesson(
        &self,
        learner: &Pubkey,
        course_id: &str,
        lesson_index: u16,
    ) -> Transaction {
        let (enrollment, _) = Enrollment::pda(learner, course_id);
        let ix = Self::instruction(
            &COMPLETE_LESSON_DISCRIMINATOR,
            &CompleteLessonArgs { lesson_index },
            vec![
                AccountMeta::new(enrollment, false),
                AccountMeta::new_readonly(ProgramConfig::pda().0, false),
                AccountMeta::new(self.backend.pubkey(), true),
            ],
        );
        debug!(%learner, course_id, lesson_index, "built complete-lesson transaction");
        self.backend_signed(ix)
    }

    /// Finalize: backend-signed and backend-paid, so the background
    /// reconciliation pass can drive it without the learner's wallet.
    pub fn build_finalize(&self, learner: &Pubkey, course_id: &str) -> Transaction {
        let (enrollment, _) = Enrollment::pda(learner, course_id);
        let ix = Self::instruction(
            &FINALIZE_COURSE_DISCRIMINATOR,
            &(),
            vec![
                AccountMeta::new(enrollment, false),
                AccountMeta::new_readonly(ProgramConfig::pda().0, false),
                AccountMeta::new(self.backend.pubkey(), true),
            ],
        );
        debug!(%learner, course_id, "built finalize transaction");
        self.backend_signed(ix)
    }

    /// Mint-credential: backend authority and a fresh asset keypair
    /// co-sign; the learner's wallet is the fee payer and final signer.
    /// Returns the partially signed transaction and the asset identity.
    pub fn build_mint_credential(
        &self,
        learner: &Pubkey,
        course_id: &str,
    ) -> (Transaction, Pubkey) {
        let (enrollment, _) = Enrollment::pda(learner, course_id);
        let asset = Keypair::new();
        let ix = Self::instruction(
            &MINT_CREDENTIAL_DISCRIMINATOR,
            &(),
            vec![
                AccountMeta::new(enrollment, false),
                AccountMeta::new_readonly(ProgramConfig::pda().0, false),
                AccountMeta::new(asset.pubkey(), true),
                AccountMeta::new_readonly(self.backend.pubkey(), true),
                AccountMeta::new(*learner, true),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
        );
        debug!(%learner, course_id, asset = %asset.pubkey(), "built mint-credential transaction");
        (self.co_signed(ix, learner, &asset), asset.pubkey())
    }

    /// Award-achievement. Checks receipt existence and supply headroom
    /// before constructing anything; either failing returns a terminal
    /// outcome without a transaction.
    pub fn build_award_achievement(
        &self,
        learner: &Pubkey,
        achievement_id: &str,
    ) -> Result<AwardBuild, CoreError> {
        let (kind_pda, _) = AchievementType::pda(achievement_id);
        let kind: AchievementType = self
            .ledger
            .fetch(&kind_pda)?
            .ok_or_else(|| CoreError::AchievementNotFound(achievement_id.to_string()))?;

        let (receipt, _) = AchievementReceipt::pda(achievement_id, learner);
        if self.ledger.account_exists(&receipt) {
            return Ok(AwardBuild::AlreadyAwarded);
        }
        if kind.supply_exhausted() {
            return Ok(AwardBuild::SupplyExhausted);
        }

        let asset = Keypair::new();
        let ix = Self::instruction(
            &AWARD_ACHIEVEMENT_DISCRIMINATOR,
            &AwardAchievementArgs {
                achievement_id: achievement_id.to_string(),
            },
            vec![
                AccountMeta::new(kind_pda, false),
                AccountMeta::new(receipt, false),
                AccountMeta::new_readonly(ProgramConfig::pda().0, false),
                AccountMeta::new(asset.pubkey(), true),
                AccountMeta::new_readonly(self.backend.pubkey(), true),
                AccountMeta::new(*learner, true),
                AccountMeta::new_readonly(system_program::ID, false),
            ],
        );
        debug!(%learner, achievement_id, asset = %asset.pubkey(), "built award transaction");
        Ok(AwardBuild::Transaction {
            tx: self.co_signed(ix, learner, &asset),
            asset: asset.pubkey(),
        })
    }

    fn backend_signed(&self, ix: Instruction) -> Transaction {
        let blockhash = self.ledger.latest_blockhash();
        let message = Message::new_with_blockhash(&[ix], Some(&self.backend.pubkey()), &blockhash);
        Transaction::new(&[self.backend], message, blockhash)
    }

    fn co_signed(&self, ix: Instruction, fee_payer: &Pubkey, asset: &Keypair) -> Transaction {
        let blockhash = self.ledger.latest_blockhash();
        let message = Message::new_with_blockhash(&[ix], Some(fee_payer), &blockhash);
        let mut tx = Transaction::new_unsigned(message);
        tx.partial_sign(&[self.backend, asset], blockhash);
        tx
    }
}

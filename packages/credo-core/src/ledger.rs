//! Read/submit/confirm access to the ledger, behind a narrow RPC seam.

use std::time::Duration;

use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use tracing::{debug, error, warn};

use crate::codec::AccountCodec;
use crate::error::CoreError;

const DEFAULT_CONFIRM_ATTEMPTS: u32 = 5;
const DEFAULT_CONFIRM_BACKOFF: Duration = Duration::from_millis(400);

/// Confirmation state of a previously submitted transaction as the
/// network reports it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SignatureStatus {
    Confirmed,
    Failed(String),
    /// Not (yet) observed. Means "unknown", never "did not happen".
    Unknown,
}

/// Raw ledger access. Production backs this with an RPC endpoint; tests
/// inject an in-memory ledger that enforces the program's rules.
pub trait LedgerRpc {
    fn get_account(&self, address: &Pubkey) -> Option<Vec<u8>>;
    fn latest_blockhash(&self) -> Hash;
    /// Hand the transaction to the network. `Err` is a rejection at the
    /// submission boundary (stale blockhash, fee, signature check);
    /// `Ok` only means "accepted for processing".
    fn send_transaction(&self, tx: &Transaction) -> Result<Signature, String>;
    fn signature_status(&self, signature: &Signature) -> SignatureStatus;
}

impl<T: LedgerRpc + ?Sized> LedgerRpc for std::sync::Arc<T> {
    fn get_account(&self, address: &Pubkey) -> Option<Vec<u8>> {
        (**self).get_account(address)
    }

    fn latest_blockhash(&self) -> Hash {
        (**self).latest_blockhash()
    }

    fn send_transaction(&self, tx: &Transaction) -> Result<Signature, String> {
        (**self).send_transaction(tx)
    }

    fn signature_status(&self, signature: &Signature) -> SignatureStatus {
        (**self).signature_status(signature)
    }
}

/// Outcome of a bounded submit-and-confirm cycle. `Unknown` is the
/// load-bearing case: the transaction may still land, so callers must
/// re-query ledger state rather than resubmit blindly.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SubmitOutcome {
    Confirmed(Signature),
    Unknown(Signature),
}

pub struct LedgerClient<R> {
    rpc: R,
    confirm_attempts: u32,
    confirm_backoff: Duration,
}

impl<R: LedgerRpc> LedgerClient<R> {
    pub fn new(rpc: R) -> Self {
        Self {
            rpc,
            confirm_attempts: DEFAULT_CONFIRM_ATTEMPTS,
            confirm_backoff: DEFAULT_CONFIRM_BACKOFF,
        }
    }

    pub fn with_confirmation(mut self, attempts: u32, backoff: Duration) -> Self {
        self.confirm_attempts = attempts.max(1);
        self.confirm_backoff = backoff;
        self
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }

    pub fn latest_blockhash(&self) -> Hash {
        self.rpc.latest_blockhash()
    }

    pub fn account_exists(&self, address: &Pubkey) -> bool {
        self.rpc.get_account(address).is_some()
    }

    /// Fetches and decodes a typed account. A present-but-undecodable
    /// account is data corruption, logged for operators and surfaced as
    /// `MalformedAccount`.
    pub fn fetch<T: AccountCodec>(&self, address: &Pubkey) -> Result<Option<T>, CoreError> {
        match self.rpc.get_account(address) {
            None => Ok(None),
            Some(bytes) => T::decode(&bytes).map(Some).map_err(|source| {
                error!(%address, %source, "malformed ledger account");
                CoreError::MalformedAccount {
                    address: *address,
                    source,
                }
            }),
        }
    }

    /// Submits a fully signed transaction and polls for confirmation
    /// within a bounded deadline. Rejection at the submission boundary is
    /// permanent for this exact transaction; exhausting the polling
    /// budget yields `Unknown`, not an inferred failure.
    pub fn submit_and_confirm(&self, tx: &Transaction) -> Result<SubmitOutcome, CoreError> {
        let signature = self
            .rpc
            .send_transaction(tx)
            .map_err(CoreError::RejectedByLedger)?;
        debug!(%signature, "transaction submitted");

        for attempt in 1..=self.confirm_attempts {
            match self.rpc.signature_status(&signature) {
                SignatureStatus::Confirmed => {
                    debug!(%signature, attempt, "transaction confirmed");
                    return Ok(SubmitOutcome::Confirmed(signature));
                }
                SignatureStatus::Failed(reason) => {
                    warn!(%signature, %reason, "transaction failed on ledger");
                    return Err(CoreError::RejectedByLedger(reason));
                }
                SignatureStatus::Unknown => {
                    if attempt < self.confirm_attempts {
                        std::thread::sleep(self.confirm_backoff * attempt);
                    }
                }
            }
        }

        warn!(%signature, "confirmation deadline exceeded, outcome unknown");
        Ok(SubmitOutcome::Unknown(signature))
    }
}

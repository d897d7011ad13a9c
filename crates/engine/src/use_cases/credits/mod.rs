//! Credit ledger: the per-user balance every paid action is gated on.
//!
//! A charge happens strictly before the model is called. Whether a failed
//! generation gives the credits back is decided by [`RefundPolicy`].

use std::sync::Arc;

use folio_domain::{GenerationKind, UserId, NEW_ACCOUNT_CREDITS};
use serde::{Deserialize, Serialize};

use crate::infrastructure::ports::{CreditRepo, DebitOutcome, RepoError};

/// Largest balance storage can hold.
pub const MAX_BALANCE: u64 = i64::MAX as u64;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientFunds { required: u64, available: u64 },
    #[error("Credit amounts must be positive")]
    InvalidAmount,
    #[error("Crediting {amount} would overflow the balance of {balance}")]
    BalanceOverflow { balance: u64, amount: u64 },
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
}

/// How a failed generation treats the credits it already consumed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundPolicy {
    /// Credits are consumed once the model is called, whatever happens next.
    #[default]
    Never,
    /// Refund when the model or the analysis fails; a user cancel still costs.
    OnFailure,
    /// Refund on failure and on cancellation.
    OnFailureOrCancel,
}

/// Why a charged action ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargedFailure {
    Failed,
    Cancelled,
}

impl RefundPolicy {
    pub fn refunds(self, failure: ChargedFailure) -> bool {
        match (self, failure) {
            (Self::Never, _) => false,
            (Self::OnFailure, ChargedFailure::Failed) => true,
            (Self::OnFailure, ChargedFailure::Cancelled) => false,
            (Self::OnFailureOrCancel, _) => true,
        }
    }
}

impl std::fmt::Display for RefundPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefundPolicy::Never => write!(f, "never"),
            RefundPolicy::OnFailure => write!(f, "on_failure"),
            RefundPolicy::OnFailureOrCancel => write!(f, "on_failure_or_cancel"),
        }
    }
}

impl std::str::FromStr for RefundPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "never" | "none" => Ok(RefundPolicy::Never),
            "on_failure" | "failure" => Ok(RefundPolicy::OnFailure),
            "on_failure_or_cancel" | "always" => Ok(RefundPolicy::OnFailureOrCancel),
            _ => Err(()),
        }
    }
}

/// Proof of a completed debit, needed to refund it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    pub user: UserId,
    pub kind: GenerationKind,
    pub amount: u64,
    pub balance_after: u64,
}

pub struct CreditLedger {
    repo: Arc<dyn CreditRepo>,
}

impl CreditLedger {
    pub fn new(repo: Arc<dyn CreditRepo>) -> Self {
        Self { repo }
    }

    /// Balance of a user; a user without an account has zero.
    pub async fn get_balance(&self, user: UserId) -> Result<u64, LedgerError> {
        Ok(self.repo.get_balance(user).await?.unwrap_or(0))
    }

    /// Open an account with the new-user grant. Repeated calls are no-ops.
    pub async fn open_account(&self, user: UserId) -> Result<u64, LedgerError> {
        let balance = self.repo.open_account(user, NEW_ACCOUNT_CREDITS).await?;
        tracing::debug!(user_id = %user, balance, "Credit account ready");
        Ok(balance)
    }

    /// Atomically subtract `amount`; refuses to take the balance below zero.
    pub async fn debit(&self, user: UserId, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        match self.repo.debit(user, amount).await? {
            DebitOutcome::Applied { balance } => Ok(balance),
            DebitOutcome::Insufficient { balance } => Err(LedgerError::InsufficientFunds {
                required: amount,
                available: balance,
            }),
        }
    }

    pub async fn credit(&self, user: UserId, amount: u64) -> Result<u64, LedgerError> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let balance = self.get_balance(user).await?;
        let total = balance.checked_add(amount).filter(|total| *total <= MAX_BALANCE);
        if total.is_none() {
            return Err(LedgerError::BalanceOverflow { balance, amount });
        }
        Ok(self.repo.credit(user, amount).await?)
    }

    /// Debit the fixed cost of `kind`.
    pub async fn charge(&self, user: UserId, kind: GenerationKind) -> Result<Charge, LedgerError> {
        let amount = kind.cost();
        let balance_after = self.debit(user, amount).await.inspect_err(|e| {
            tracing::info!(user_id = %user, kind = %kind, error = %e, "Charge refused");
        })?;
        tracing::info!(user_id = %user, kind = %kind, amount, balance_after, "Credits charged");
        Ok(Charge {
            user,
            kind,
            amount,
            balance_after,
        })
    }

    /// Give a charge back if `policy` says so. Refund errors are logged, not
    /// raised: the caller is already reporting the original failure.
    pub async fn settle_failure(
        &self,
        charge: &Charge,
        policy: RefundPolicy,
        failure: ChargedFailure,
    ) -> bool {
        if !policy.refunds(failure) {
            tracing::debug!(user_id = %charge.user, kind = %charge.kind, %policy, "Charge kept after failure");
            return false;
        }
        match self.credit(charge.user, charge.amount).await {
            Ok(balance) => {
                tracing::info!(user_id = %charge.user, amount = charge.amount, balance, "Charge refunded");
                true
            }
            Err(e) => {
                tracing::error!(user_id = %charge.user, amount = charge.amount, error = %e, "Refund failed");
                false
            }
        }
    }
}

//! Error kinds surfaced by the migration engine.

use std::time::Duration;

use alloy_core::primitives::{Address, TxHash};

use crate::state::{StateKey, StateValue};

/// Broad classification of a [`MigrationError`], used for logging and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    Prerequisite,
    ChainRead,
    Submission,
    ConfirmationTimeout,
    Confirmation,
    State,
    Artifact,
    Persist,
}

/// Failure of a migration step, stage or confirmation wait.
///
/// Every variant halts the run. Keys recorded before the failure stay in the
/// persisted state, so a restart skips them.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// A step needs a state key that an earlier stage has not recorded yet.
    #[error("{0}")]
    MissingPrerequisite(&'static str),

    /// Reading on-chain state needed to decide what a step should do failed.
    #[error("{step}: failed to read chain state: {source:#}")]
    ChainRead {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The signer does not own a contract it needs to administer.
    #[error("{contract}.owner is not signer (owner is {owner})")]
    NotOwner {
        contract: &'static str,
        owner: Address,
    },

    /// The node rejected the transaction, or it could not be built.
    #[error("{step}: failed to submit transaction: {source:#}")]
    Submission {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    /// The transaction was not mined to the requested depth in time.
    #[error("transaction {hash} not confirmed after {timeout:?}")]
    ConfirmationTimeout { hash: TxHash, timeout: Duration },

    /// Polling for the transaction receipt failed.
    #[error("failed waiting for transaction {hash}: {source:#}")]
    Confirmation {
        hash: TxHash,
        #[source]
        source: anyhow::Error,
    },

    /// The transaction was mined but reverted.
    #[error("transaction {hash} reverted in block {block_number}")]
    Reverted { hash: TxHash, block_number: u64 },

    /// A step tried to overwrite a key already recorded with another value.
    #[error("state key {key} is already {existing}, refusing to overwrite it with {incoming}")]
    StateConflict {
        key: StateKey,
        existing: StateValue,
        incoming: StateValue,
    },

    /// Bytecode could not be prepared for deployment.
    #[error("{contract}: {source:#}")]
    Artifact {
        contract: String,
        #[source]
        source: anyhow::Error,
    },

    /// The state-changed notification failed to persist the new state.
    #[error("failed to persist migration state: {0:#}")]
    Persist(#[source] anyhow::Error),
}

impl MigrationError {
    /// Returns the broad kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingPrerequisite(_) | Self::NotOwner { .. } => ErrorKind::Prerequisite,
            Self::ChainRead { .. } => ErrorKind::ChainRead,
            Self::Submission { .. } => ErrorKind::Submission,
            Self::ConfirmationTimeout { .. } => ErrorKind::ConfirmationTimeout,
            Self::Confirmation { .. } | Self::Reverted { .. } => ErrorKind::Confirmation,
            Self::StateConflict { .. } => ErrorKind::State,
            Self::Artifact { .. } => ErrorKind::Artifact,
            Self::Persist(_) => ErrorKind::Persist,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_prerequisite_message_is_verbatim() {
        let err = MigrationError::MissingPrerequisite("Missing V3 Core Factory");
        assert_eq!(err.to_string(), "Missing V3 Core Factory");
        assert_eq!(err.kind(), ErrorKind::Prerequisite);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::ConfirmationTimeout.to_string(), "confirmation-timeout");
        let err = MigrationError::ConfirmationTimeout {
            hash: TxHash::ZERO,
            timeout: Duration::from_secs(900),
        };
        assert_eq!(err.kind(), ErrorKind::ConfirmationTimeout);
    }
}

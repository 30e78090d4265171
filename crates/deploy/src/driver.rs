//! Runs a [`Migration`] to completion against a live chain.

use std::{sync::Arc, time::Duration};

use alloy_core::primitives::TxHash;
use futures::future::try_join_all;
use serde::Serialize;

use crate::{
    MigrationError, MigrationState, StateFile,
    chain::{ChainClient, TransactionReceipt},
    engine::{Migration, StageReport},
    step::StepOutput,
};

/// Blocks each transaction must have on top of it (its own included).
pub const DEFAULT_CONFIRMATIONS: u64 = 2;

/// Upper bound on the wait for a single transaction.
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Every stage completed and confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentReport {
    pub stages: Vec<StageReport>,
    pub state: MigrationState,
}

impl DeploymentReport {
    /// Step outputs grouped by stage, without the stage metadata.
    pub fn results(&self) -> Vec<&[StepOutput]> {
        self.stages
            .iter()
            .map(|stage| stage.outputs.as_slice())
            .collect()
    }
}

/// The run stopped at `stage`. `state` is the last persisted checkpoint.
#[derive(Debug, thiserror::Error)]
#[error("stage {stage} failed: {error}")]
pub struct DeploymentFailure {
    pub stage: usize,
    #[source]
    pub error: MigrationError,
    /// Stages that completed and were confirmed before the failure.
    pub stages: Vec<StageReport>,
    pub state: MigrationState,
}

/// Pulls stages from a migration, persisting and confirming each before the next.
#[derive(Clone)]
pub struct Driver {
    chain: Arc<dyn ChainClient>,
    confirmations: u64,
    confirmation_timeout: Duration,
    state_file: Option<StateFile>,
}

impl Driver {
    pub fn new(chain: Arc<dyn ChainClient>, confirmations: u64) -> Self {
        Self {
            chain,
            confirmations,
            confirmation_timeout: CONFIRMATION_TIMEOUT,
            state_file: None,
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    /// Save the state to `state_file` after every stage.
    pub fn persist_to(mut self, state_file: StateFile) -> Self {
        self.state_file = Some(state_file);
        self
    }

    pub async fn run(&self, migration: Migration) -> Result<DeploymentReport, DeploymentFailure> {
        let mut migration = match self.state_file.clone() {
            Some(state_file) => migration.on_state_change(move |state| state_file.save(state)),
            None => migration,
        };

        let mut stages = Vec::new();
        while let Some(result) = migration.next_stage().await {
            let outcome = match result {
                Ok(report) => self.wait_for_stage(&report).await.map(|()| report),
                Err(error) => Err(error),
            };

            match outcome {
                Ok(report) => {
                    tracing::info!(
                        stage = %report.name,
                        transactions = report.hashes().count(),
                        "Step {} complete",
                        report.index + 1
                    );
                    stages.push(report);
                }
                Err(error) => {
                    tracing::error!(stage = stages.len(), kind = %error.kind(), %error, "Deployment failed");
                    return Err(DeploymentFailure {
                        stage: stages.len(),
                        error,
                        stages,
                        state: migration.persisted_state().clone(),
                    });
                }
            }
        }

        Ok(DeploymentReport {
            stages,
            state: migration.persisted_state().clone(),
        })
    }

    /// Waits concurrently for every transaction submitted by the stage.
    async fn wait_for_stage(&self, report: &StageReport) -> Result<(), MigrationError> {
        try_join_all(report.hashes().map(|hash| self.wait_for(hash))).await?;
        Ok(())
    }

    async fn wait_for(&self, hash: TxHash) -> Result<TransactionReceipt, MigrationError> {
        tracing::debug!(%hash, confirmations = self.confirmations, "Waiting for transaction");

        let receipt = tokio::time::timeout(
            self.confirmation_timeout,
            self.chain.wait_for_confirmations(hash, self.confirmations),
        )
        .await
        .map_err(|_| MigrationError::ConfirmationTimeout {
            hash,
            timeout: self.confirmation_timeout,
        })?
        .map_err(|source| MigrationError::Confirmation { hash, source })?;

        if !receipt.succeeded() {
            return Err(MigrationError::Reverted {
                hash,
                block_number: receipt.block_number,
            });
        }

        tracing::debug!(%hash, block = receipt.block_number, "Transaction confirmed");
        Ok(receipt)
    }
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("confirmations", &self.confirmations)
            .field("confirmation_timeout", &self.confirmation_timeout)
            .field("state_file", &self.state_file)
            .finish_non_exhaustive()
    }
}

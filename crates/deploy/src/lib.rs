//! uniswap-v3-deploy - Resumable Uniswap V3 deployment library.
//!
//! A deployment is an ordered list of [`step::Stage`]s applied to a persisted
//! [`MigrationState`]. Steps whose key is already recorded do nothing, so an
//! interrupted run can be restarted from its state file without submitting a
//! transaction twice for a confirmed key.
//!
//! [`Migration`] runs one stage per pull and merges its records;
//! [`Driver`] persists the state and waits for every stage's transactions to
//! be confirmed before pulling the next one.

use std::sync::Arc;

use anyhow::Context;

mod artifact;
pub use artifact::{Artifact, ArtifactStore, LinkOffset};

pub mod chain;
pub use chain::{ChainClient, PendingDeployment, RpcChainClient, TransactionReceipt};

mod config;
pub use config::{
    DeployConfig, WEI_PER_GWEI, ascii_string_to_bytes32, parse_address, parse_gas_price_gwei,
};

mod driver;
pub use driver::{
    CONFIRMATION_TIMEOUT, DEFAULT_CONFIRMATIONS, DeploymentFailure, DeploymentReport, Driver,
};

mod engine;
pub use engine::{Migration, StageReport, StateChangeHook};

mod error;
pub use error::{ErrorKind, MigrationError};

pub mod rpc;

mod signer;
pub use signer::{LegacyTransaction, LocalSigner};

mod state;
pub use state::{MigrationState, StateFile, StateKey, StateRecord, StateValue};

pub mod step;

mod suite;
pub use suite::{
    MAX_INCENTIVE_DURATION, MAX_INCENTIVE_START_LEAD_TIME, REQUIRED_ARTIFACTS, standard_stages,
};

/// Runs the standard suite from `state_file`, persisting after every stage.
pub async fn deploy(
    config: DeployConfig,
    artifacts: &ArtifactStore,
    state_file: StateFile,
    confirmations: u64,
) -> anyhow::Result<Result<DeploymentReport, DeploymentFailure>> {
    let initial_state = state_file
        .load()
        .context("Failed to load and parse migration state file")?;
    let stages = standard_stages(artifacts)?;
    let chain = config.chain.clone();

    tracing::info!(
        state = %state_file.path().display(),
        recorded_keys = initial_state.len(),
        confirmations,
        ?config,
        "Starting deployment..."
    );

    let migration = Migration::new(Arc::new(config), stages, initial_state);
    let driver = Driver::new(chain, confirmations).persist_to(state_file);
    Ok(driver.run(migration).await)
}

//! Migration steps and stages.
//!
//! A step is a unit of deployment keyed by a [`StateKey`]: given the current
//! state and the run's config it either reports that its key is already
//! recorded (and does nothing on chain) or performs the on-chain action and
//! returns the record to add. Steps never mutate the state themselves; the
//! engine merges their records once the whole stage has finished.
//!
//! # Example
//!
//! ```no_run
//! use uniswap_v3_deploy::{ArtifactStore, StateKey, step::{DeployStep, Stage}};
//!
//! # fn build(artifacts: &ArtifactStore) -> anyhow::Result<Stage> {
//! let stage = Stage::new("core")
//!     .with(DeployStep::contract(StateKey::V3CoreFactory, artifacts.get("UniswapV3Factory")?))
//!     .with(DeployStep::library(StateKey::NftDescriptorLibraryV1_3_0, artifacts.get("NFTDescriptor")?));
//! # Ok(stage)
//! # }
//! ```

mod admin;
mod deploy;

pub use admin::{EnableOneBpFeeTier, TransferOwnership};
pub use deploy::{ArgumentsFn, ArtifactKind, DeployStep, LibrariesFn};

use alloy_core::primitives::{Address, TxHash};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{DeployConfig, MigrationError, MigrationState, StateKey, StateRecord};

/// Result of running a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub message: String,
    /// Address the step deployed or found already deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Transaction submitted by this run. Absent when the step was a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<TxHash>,
    /// Entry the engine adds to the state once the stage completes.
    #[serde(skip)]
    pub record: Option<StateRecord>,
}

impl StepOutput {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            address: None,
            hash: None,
            record: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<Option<Address>>) -> Self {
        self.address = address.into();
        self
    }

    pub fn with_hash(mut self, hash: TxHash) -> Self {
        self.hash = Some(hash);
        self
    }

    pub fn recording(mut self, record: StateRecord) -> Self {
        self.record = Some(record);
        self
    }
}

/// One deployable unit with its idempotency and argument logic.
///
/// Running a step whose [`MigrationStep::key`] is already present in the
/// state must not touch the chain.
pub trait MigrationStep: Send + Sync {
    /// Human readable name, used in logs.
    fn name(&self) -> &str;

    /// State key recorded once this step has been performed.
    fn key(&self) -> StateKey;

    /// Run the step against `state`.
    fn run<'a>(
        &'a self,
        state: &'a MigrationState,
        config: &'a DeployConfig,
    ) -> BoxFuture<'a, Result<Vec<StepOutput>, MigrationError>>;
}

/// Steps that do not depend on each other and may run concurrently.
///
/// A stage is the unit of progress: its records are merged and persisted,
/// and its transactions confirmed, before the next stage starts.
pub struct Stage {
    name: String,
    steps: Vec<Box<dyn MigrationStep>>,
}

impl Stage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Add a step to this stage.
    pub fn with(mut self, step: impl MigrationStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Box<dyn MigrationStep>] {
        &self.steps
    }

    pub(crate) fn into_parts(self) -> (String, Vec<Box<dyn MigrationStep>>) {
        (self.name, self.steps)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|step| step.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

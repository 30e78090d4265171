//! Stage sequencing over a running [`MigrationState`].
//!
//! [`Migration`] is pull-based: each call to [`Migration::next_stage`] runs
//! exactly one stage, merges its records, notifies the state-change hook and
//! hands the stage's outputs back. Nothing runs until the caller asks for the
//! next stage, which is how the driver inserts its confirmation wait between
//! stages.

use std::{iter::Enumerate, sync::Arc, vec};

use futures::{Stream, future::join_all, stream};
use serde::Serialize;

use crate::{
    DeployConfig, MigrationError, MigrationState,
    step::{Stage, StepOutput},
};

/// Called with the merged state after every stage, before its outputs are yielded.
pub type StateChangeHook = Box<dyn FnMut(&MigrationState) -> anyhow::Result<()> + Send>;

/// Outputs of one completed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// Position of the stage in the run, starting at 0.
    pub index: usize,
    pub name: String,
    pub outputs: Vec<StepOutput>,
}

impl StageReport {
    /// Transactions submitted by this stage.
    pub fn hashes(&self) -> impl Iterator<Item = alloy_core::primitives::TxHash> + '_ {
        self.outputs.iter().filter_map(|output| output.hash)
    }
}

/// An ordered list of stages applied to a migration state.
pub struct Migration {
    config: Arc<DeployConfig>,
    stages: Enumerate<vec::IntoIter<Stage>>,
    state: MigrationState,
    /// Last state the hook accepted.
    persisted: MigrationState,
    on_state_change: Option<StateChangeHook>,
    halted: bool,
}

impl Migration {
    pub fn new(config: Arc<DeployConfig>, stages: Vec<Stage>, initial_state: MigrationState) -> Self {
        Self {
            config,
            stages: stages.into_iter().enumerate(),
            persisted: initial_state.clone(),
            state: initial_state,
            on_state_change: None,
            halted: false,
        }
    }

    /// Register the hook notified with every new state, typically to persist it.
    ///
    /// A hook error halts the migration with [`MigrationError::Persist`].
    pub fn on_state_change(
        mut self,
        hook: impl FnMut(&MigrationState) -> anyhow::Result<()> + Send + 'static,
    ) -> Self {
        self.on_state_change = Some(Box::new(hook));
        self
    }

    /// Current in-memory state, including records of the last stage.
    pub fn state(&self) -> &MigrationState {
        &self.state
    }

    /// Last state accepted by the state-change hook.
    pub fn persisted_state(&self) -> &MigrationState {
        &self.persisted
    }

    pub fn config(&self) -> &DeployConfig {
        &self.config
    }

    /// Run the next stage.
    ///
    /// Returns `None` once every stage ran or after a failure. When a step
    /// fails, the records of its siblings are still merged and notified
    /// before the first failure is returned.
    pub async fn next_stage(&mut self) -> Option<Result<StageReport, MigrationError>> {
        if self.halted {
            return None;
        }
        let (index, stage) = self.stages.next()?;
        let (name, steps) = stage.into_parts();

        tracing::info!(stage = %name, index, steps = steps.len(), "Running stage");

        let results = {
            let state = &self.state;
            let config = self.config.as_ref();
            join_all(steps.iter().map(|step| step.run(state, config))).await
        };

        let mut outputs = Vec::new();
        let mut failure = None;
        for (step, result) in steps.iter().zip(results) {
            match result {
                Ok(step_outputs) => outputs.extend(step_outputs),
                Err(error) => {
                    tracing::error!(
                        stage = %name,
                        step = step.name(),
                        key = %step.key(),
                        kind = %error.kind(),
                        %error,
                        "Step failed"
                    );
                    failure.get_or_insert(error);
                }
            }
        }

        if let Err(error) = self.merge(&outputs) {
            self.halted = true;
            return Some(Err(error));
        }

        if let Some(error) = failure {
            self.halted = true;
            return Some(Err(error));
        }

        tracing::debug!(stage = %name, index, keys = self.state.len(), "Stage merged");
        Some(Ok(StageReport {
            index,
            name,
            outputs,
        }))
    }

    fn merge(&mut self, outputs: &[StepOutput]) -> Result<(), MigrationError> {
        self.state = self
            .state
            .merged(outputs.iter().filter_map(|output| output.record.as_ref()))?;

        if let Some(hook) = self.on_state_change.as_mut() {
            hook(&self.state).map_err(MigrationError::Persist)?;
        }
        self.persisted = self.state.clone();
        Ok(())
    }

    /// Expose the remaining stages as a stream of reports.
    pub fn into_stream(self) -> impl Stream<Item = Result<StageReport, MigrationError>> {
        stream::unfold(self, |mut migration| async move {
            migration
                .next_stage()
                .await
                .map(|result| (result, migration))
        })
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("remaining_stages", &self.stages.len())
            .field("state", &self.state)
            .field("halted", &self.halted)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use alloy_core::primitives::{Address, B256, Bytes, TxHash, address, b256};
    use futures::{FutureExt, StreamExt, future::BoxFuture};

    use super::*;
    use crate::{
        StateKey, StateRecord,
        chain::{ChainClient, PendingDeployment, TransactionReceipt},
        step::MigrationStep,
    };

    const FACTORY: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa0001");
    const ADMIN: Address = address!("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa0002");
    const HASH: TxHash = b256!("1111111111111111111111111111111111111111111111111111111111111111");

    struct OfflineChain;

    impl ChainClient for OfflineChain {
        fn signer_address(&self) -> Address {
            Address::ZERO
        }

        fn deploy(&self, _: Bytes, _: Option<u128>) -> BoxFuture<'_, anyhow::Result<PendingDeployment>> {
            async { anyhow::bail!("offline") }.boxed()
        }

        fn send(&self, _: Address, _: Bytes, _: Option<u128>) -> BoxFuture<'_, anyhow::Result<TxHash>> {
            async { anyhow::bail!("offline") }.boxed()
        }

        fn call(&self, _: Address, _: Bytes) -> BoxFuture<'_, anyhow::Result<Bytes>> {
            async { anyhow::bail!("offline") }.boxed()
        }

        fn wait_for_confirmations(&self, _: TxHash, _: u64) -> BoxFuture<'_, anyhow::Result<TransactionReceipt>> {
            async { anyhow::bail!("offline") }.boxed()
        }
    }

    fn config() -> Arc<DeployConfig> {
        Arc::new(DeployConfig {
            chain: Arc::new(OfflineChain),
            gas_price: None,
            weth9_address: Address::ZERO,
            native_currency_label_bytes: B256::ZERO,
            v2_core_factory_address: Address::ZERO,
            owner_address: Address::ZERO,
        })
    }

    /// Records `address` under `key` unless present.
    struct Record(StateKey, Address);

    impl MigrationStep for Record {
        fn name(&self) -> &str {
            self.0.as_str()
        }

        fn key(&self) -> StateKey {
            self.0
        }

        fn run<'a>(
            &'a self,
            state: &'a MigrationState,
            _: &'a DeployConfig,
        ) -> BoxFuture<'a, Result<Vec<StepOutput>, MigrationError>> {
            async move {
                if state.contains_key(&self.0) {
                    return Ok(vec![StepOutput::new("skipped")]);
                }
                Ok(vec![
                    StepOutput::new("recorded")
                        .with_address(self.1)
                        .with_hash(HASH)
                        .recording(StateRecord::new(self.0, self.1)),
                ])
            }
            .boxed()
        }
    }

    /// Fails with a missing prerequisite.
    struct Missing(&'static str);

    impl MigrationStep for Missing {
        fn name(&self) -> &str {
            self.0
        }

        fn key(&self) -> StateKey {
            StateKey::TickLens
        }

        fn run<'a>(
            &'a self,
            _: &'a MigrationState,
            _: &'a DeployConfig,
        ) -> BoxFuture<'a, Result<Vec<StepOutput>, MigrationError>> {
            async move { Err(MigrationError::MissingPrerequisite(self.0)) }.boxed()
        }
    }

    #[tokio::test]
    async fn test_stages_run_in_order_and_notify() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = seen.clone();

        let stages = vec![
            Stage::new("first").with(Record(StateKey::V3CoreFactory, FACTORY)),
            Stage::new("second").with(Record(StateKey::ProxyAdmin, ADMIN)),
        ];
        let mut migration = Migration::new(config(), stages, MigrationState::new())
            .on_state_change(move |state| {
                hook_seen.lock().unwrap().push(state.len());
                Ok(())
            });

        let first = migration.next_stage().await.unwrap().unwrap();
        assert_eq!((first.index, first.name.as_str()), (0, "first"));
        assert_eq!(migration.state().address(StateKey::ProxyAdmin), None);
        assert_eq!(*seen.lock().unwrap(), vec![1]);

        let second = migration.next_stage().await.unwrap().unwrap();
        assert_eq!((second.index, second.name.as_str()), (1, "second"));
        assert_eq!(second.hashes().collect::<Vec<_>>(), vec![HASH]);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        assert!(migration.next_stage().await.is_none());
        assert_eq!(migration.persisted_state(), migration.state());
    }

    #[tokio::test]
    async fn test_failure_keeps_sibling_records_and_halts() {
        let stages = vec![
            Stage::new("mixed")
                .with(Record(StateKey::V3CoreFactory, FACTORY))
                .with(Missing("Missing V3 Core Factory")),
            Stage::new("never").with(Record(StateKey::ProxyAdmin, ADMIN)),
        ];
        let mut migration = Migration::new(config(), stages, MigrationState::new());

        let err = migration.next_stage().await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "Missing V3 Core Factory");
        assert_eq!(migration.persisted_state().address(StateKey::V3CoreFactory), Some(FACTORY));
        assert!(migration.next_stage().await.is_none());
        assert_eq!(migration.state().len(), 1);
    }

    #[tokio::test]
    async fn test_hook_failure_is_persist_error() {
        let stages = vec![Stage::new("first").with(Record(StateKey::V3CoreFactory, FACTORY))];
        let mut migration = Migration::new(config(), stages, MigrationState::new())
            .on_state_change(|_| anyhow::bail!("disk full"));

        let err = migration.next_stage().await.unwrap().unwrap_err();
        assert!(matches!(err, MigrationError::Persist(_)));
        assert!(migration.persisted_state().is_empty());
    }

    #[tokio::test]
    async fn test_existing_state_is_kept() {
        let initial: MigrationState =
            [StateRecord::new(StateKey::V3CoreFactory, FACTORY)].into_iter().collect();
        let stages = vec![Stage::new("first").with(Record(StateKey::V3CoreFactory, ADMIN))];

        let reports: Vec<_> = Migration::new(config(), stages, initial)
            .into_stream()
            .collect()
            .await;

        assert_eq!(reports.len(), 1);
        let report = reports[0].as_ref().unwrap();
        assert_eq!(report.outputs[0].message, "skipped");
        assert_eq!(report.hashes().count(), 0);
    }
}

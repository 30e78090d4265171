//! Contract and library deployment steps.

use std::sync::Arc;

use alloy_core::{dyn_abi::DynSolValue, primitives::Address};
use futures::{FutureExt, future::BoxFuture};

use super::{MigrationStep, StepOutput};
use crate::{Artifact, DeployConfig, MigrationError, MigrationState, StateKey, StateRecord, StateValue};

/// Computes ordered constructor arguments from the state and config.
///
/// Returns [`MigrationError::MissingPrerequisite`] when a key it reads has not
/// been recorded yet.
pub type ArgumentsFn =
    fn(&MigrationState, &DeployConfig) -> Result<Vec<DynSolValue>, MigrationError>;

/// Resolves the libraries an artifact must be linked against.
pub type LibrariesFn = fn(&MigrationState) -> Result<Vec<(&'static str, Address)>, MigrationError>;

/// Category of a deployed artifact. Only changes how it is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ArtifactKind {
    Contract,
    Library,
}

/// Deploys an artifact once and records its address under `key`.
pub struct DeployStep {
    kind: ArtifactKind,
    key: StateKey,
    artifact: Arc<Artifact>,
    arguments: ArgumentsFn,
    libraries: LibrariesFn,
}

fn no_arguments(
    _: &MigrationState,
    _: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    Ok(Vec::new())
}

fn no_libraries(_: &MigrationState) -> Result<Vec<(&'static str, Address)>, MigrationError> {
    Ok(Vec::new())
}

impl DeployStep {
    /// Step deploying a contract without constructor arguments.
    pub fn contract(key: StateKey, artifact: Arc<Artifact>) -> Self {
        Self {
            kind: ArtifactKind::Contract,
            key,
            artifact,
            arguments: no_arguments,
            libraries: no_libraries,
        }
    }

    /// Step deploying a library.
    pub fn library(key: StateKey, artifact: Arc<Artifact>) -> Self {
        Self {
            kind: ArtifactKind::Library,
            ..Self::contract(key, artifact)
        }
    }

    /// Set how constructor arguments are computed.
    pub fn arguments(mut self, arguments: ArgumentsFn) -> Self {
        self.arguments = arguments;
        self
    }

    /// Set how linked libraries are resolved.
    pub fn libraries(mut self, libraries: LibrariesFn) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    async fn deploy(
        &self,
        state: &MigrationState,
        config: &DeployConfig,
    ) -> Result<Vec<StepOutput>, MigrationError> {
        let name = &self.artifact.contract_name;

        if let Some(existing) = state.get(&self.key) {
            let address = match existing {
                StateValue::Address(address) => Some(*address),
                _ => None,
            };
            tracing::info!(key = %self.key, contract = %name, ?address, "Already deployed, skipping");
            return Ok(vec![
                StepOutput::new(format!("{} {} was already deployed", self.kind, name))
                    .with_address(address),
            ]);
        }

        let arguments = (self.arguments)(state, config)?;
        let libraries = (self.libraries)(state)?;

        let bytecode = self
            .artifact
            .linked_bytecode(&libraries)
            .map_err(|source| MigrationError::Artifact {
                contract: name.clone(),
                source,
            })?;
        let mut init_code = bytecode.to_vec();
        init_code.extend(DynSolValue::Tuple(arguments).abi_encode_params());

        let pending = config
            .chain
            .deploy(init_code.into(), config.gas_price)
            .await
            .map_err(|source| {
                tracing::error!(key = %self.key, contract = %name, error = %source, "Failed to deploy");
                MigrationError::Submission {
                    step: self.key.as_str(),
                    source,
                }
            })?;

        tracing::info!(
            key = %self.key,
            contract = %name,
            address = %pending.address,
            hash = %pending.hash,
            "Deployment submitted"
        );

        Ok(vec![
            StepOutput::new(format!("{} {} deployed", self.kind, name))
                .with_address(pending.address)
                .with_hash(pending.hash)
                .recording(StateRecord::new(self.key, pending.address)),
        ])
    }
}

impl MigrationStep for DeployStep {
    fn name(&self) -> &str {
        &self.artifact.contract_name
    }

    fn key(&self) -> StateKey {
        self.key
    }

    fn run<'a>(
        &'a self,
        state: &'a MigrationState,
        config: &'a DeployConfig,
    ) -> BoxFuture<'a, Result<Vec<StepOutput>, MigrationError>> {
        self.deploy(state, config).boxed()
    }
}

//! Administrative call steps on already deployed contracts.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes, I256, U256, keccak256},
};
use futures::{FutureExt, future::BoxFuture};

use super::{MigrationStep, StepOutput};
use crate::{DeployConfig, MigrationError, MigrationState, StateKey, StateRecord};

const ONE_BP_FEE: u64 = 100;
const ONE_BP_TICK_SPACING: I256 = I256::ONE;

/// ABI-encodes a call: 4-byte selector of `signature` followed by its arguments.
pub(crate) fn encode_call(signature: &str, args: Vec<DynSolValue>) -> Bytes {
    let mut input = keccak256(signature.as_bytes())[..4].to_vec();
    if !args.is_empty() {
        input.extend(DynSolValue::Tuple(args).abi_encode_params());
    }
    input.into()
}

/// First 32-byte word of a call result.
fn first_word(output: &[u8]) -> anyhow::Result<[u8; 32]> {
    output
        .get(..32)
        .and_then(|word| word.try_into().ok())
        .ok_or_else(|| anyhow::anyhow!("call returned {} bytes, expected a word", output.len()))
}

async fn read_owner(
    config: &DeployConfig,
    step: &'static str,
    contract: Address,
) -> Result<Address, MigrationError> {
    let output = config
        .chain
        .call(contract, encode_call("owner()", vec![]))
        .await
        .and_then(|output| first_word(&output))
        .map_err(|source| MigrationError::ChainRead { step, source })?;
    Ok(Address::from_word(output.into()))
}

/// Enables the 1 bps fee tier (fee 100, tick spacing 1) on the V3 factory.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnableOneBpFeeTier;

impl EnableOneBpFeeTier {
    async fn enable(
        &self,
        state: &MigrationState,
        config: &DeployConfig,
    ) -> Result<Vec<StepOutput>, MigrationError> {
        let step = StateKey::OneBpFeeTierEnabled.as_str();
        if state.contains_key(&StateKey::OneBpFeeTierEnabled) {
            return Ok(vec![StepOutput::new(
                "UniswapV3Factory 1 bps fee tier already enabled",
            )]);
        }

        let factory = state.require_address(StateKey::V3CoreFactory, "Missing V3 Core Factory")?;

        let spacing = config
            .chain
            .call(
                factory,
                encode_call(
                    "feeAmountTickSpacing(uint24)",
                    vec![DynSolValue::Uint(U256::from(ONE_BP_FEE), 24)],
                ),
            )
            .await
            .and_then(|output| first_word(&output))
            .map_err(|source| MigrationError::ChainRead { step, source })?;

        let record = StateRecord::new(StateKey::OneBpFeeTierEnabled, true);
        if U256::from_be_bytes(spacing) != U256::ZERO {
            tracing::info!(%factory, "1 bps fee tier already enabled");
            return Ok(vec![
                StepOutput::new("UniswapV3Factory 1 bps fee tier already enabled")
                    .recording(record),
            ]);
        }

        let owner = read_owner(config, step, factory).await?;
        if owner != config.chain.signer_address() {
            return Err(MigrationError::NotOwner {
                contract: "UniswapV3Factory",
                owner,
            });
        }

        let hash = config
            .chain
            .send(
                factory,
                encode_call(
                    "enableFeeAmount(uint24,int24)",
                    vec![
                        DynSolValue::Uint(U256::from(ONE_BP_FEE), 24),
                        DynSolValue::Int(ONE_BP_TICK_SPACING, 24),
                    ],
                ),
                config.gas_price,
            )
            .await
            .map_err(|source| MigrationError::Submission { step, source })?;

        tracing::info!(%factory, %hash, "1 bps fee tier enable submitted");
        Ok(vec![
            StepOutput::new("UniswapV3Factory added a new fee tier 1 bps")
                .with_hash(hash)
                .recording(record),
        ])
    }
}

impl MigrationStep for EnableOneBpFeeTier {
    fn name(&self) -> &str {
        "EnableOneBpFeeTier"
    }

    fn key(&self) -> StateKey {
        StateKey::OneBpFeeTierEnabled
    }

    fn run<'a>(
        &'a self,
        state: &'a MigrationState,
        config: &'a DeployConfig,
    ) -> BoxFuture<'a, Result<Vec<StepOutput>, MigrationError>> {
        self.enable(state, config).boxed()
    }
}

/// Hands ownership of a deployed contract to the configured owner.
#[derive(Debug, Clone, Copy)]
pub struct TransferOwnership {
    /// Flag recorded once ownership is with the configured owner.
    pub key: StateKey,
    /// Key holding the address of the owned contract.
    pub contract_key: StateKey,
    /// Contract name used in messages.
    pub contract: &'static str,
    /// Error message when `contract_key` is not recorded.
    pub missing: &'static str,
    /// Setter signature taking the new owner, e.g. `setOwner(address)`.
    pub setter: &'static str,
}

impl TransferOwnership {
    async fn transfer(
        &self,
        state: &MigrationState,
        config: &DeployConfig,
    ) -> Result<Vec<StepOutput>, MigrationError> {
        let step = self.key.as_str();
        if state.contains_key(&self.key) {
            return Ok(vec![StepOutput::new(format!(
                "{} ownership already transferred",
                self.contract
            ))]);
        }

        let contract = state.require_address(self.contract_key, self.missing)?;

        let target = config.owner_address;
        let record = StateRecord::new(self.key, true);
        let owner = read_owner(config, step, contract).await?;

        if owner == target {
            tracing::info!(contract = self.contract, %owner, "Ownership already set");
            return Ok(vec![
                StepOutput::new(format!("{} owned by {} already", self.contract, target))
                    .recording(record),
            ]);
        }

        if owner != config.chain.signer_address() {
            return Err(MigrationError::NotOwner {
                contract: self.contract,
                owner,
            });
        }

        let hash = config
            .chain
            .send(
                contract,
                encode_call(self.setter, vec![DynSolValue::Address(target)]),
                config.gas_price,
            )
            .await
            .map_err(|source| MigrationError::Submission { step, source })?;

        tracing::info!(contract = self.contract, new_owner = %target, %hash, "Ownership transfer submitted");
        Ok(vec![
            StepOutput::new(format!("{} ownership set to {}", self.contract, target))
                .with_hash(hash)
                .recording(record),
        ])
    }
}

impl MigrationStep for TransferOwnership {
    fn name(&self) -> &str {
        self.contract
    }

    fn key(&self) -> StateKey {
        self.key
    }

    fn run<'a>(
        &'a self,
        state: &'a MigrationState,
        config: &'a DeployConfig,
    ) -> BoxFuture<'a, Result<Vec<StepOutput>, MigrationError>> {
        self.transfer(state, config).boxed()
    }
}

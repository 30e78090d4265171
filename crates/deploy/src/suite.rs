//! The standard Uniswap V3 deployment, as an ordered list of stages.
//!
//! Each stage only reads keys recorded by earlier stages, so the steps inside
//! a stage are independent and may be submitted concurrently.

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, U256},
};

use crate::{
    ArtifactStore, DeployConfig, MigrationError, MigrationState, StateKey,
    step::{DeployStep, EnableOneBpFeeTier, Stage, TransferOwnership},
};

/// Incentive programs may start at most 30 days after creation.
pub const MAX_INCENTIVE_START_LEAD_TIME: u64 = 2_592_000;
/// Incentive programs may last at most 2 years.
pub const MAX_INCENTIVE_DURATION: u64 = 63_072_000;

const MISSING_FACTORY: &str = "Missing V3 Core Factory";
const MISSING_NFT_DESCRIPTOR: &str = "Missing NFTDescriptor library";
const MISSING_DESCRIPTOR: &str = "Missing NonfungibleTokenPositionDescriptor";
const MISSING_PROXY_ADMIN: &str = "Missing ProxyAdmin";
const MISSING_DESCRIPTOR_PROXY: &str = "Missing descriptor proxy";
const MISSING_POSITION_MANAGER: &str = "Missing NonfungiblePositionManager";

fn factory(state: &MigrationState) -> Result<DynSolValue, MigrationError> {
    let factory = state.require_address(StateKey::V3CoreFactory, MISSING_FACTORY)?;
    Ok(DynSolValue::Address(factory))
}

fn position_manager(state: &MigrationState) -> Result<DynSolValue, MigrationError> {
    let manager = state
        .require_address(StateKey::NonfungibleTokenPositionManager, MISSING_POSITION_MANAGER)?;
    Ok(DynSolValue::Address(manager))
}

fn weth9(config: &DeployConfig) -> DynSolValue {
    DynSolValue::Address(config.weth9_address)
}

fn factory_and_weth9(
    state: &MigrationState,
    config: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    Ok(vec![factory(state)?, weth9(config)])
}

fn descriptor_arguments(
    _: &MigrationState,
    config: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    Ok(vec![
        weth9(config),
        DynSolValue::FixedBytes(config.native_currency_label_bytes, 32),
    ])
}

fn descriptor_libraries(
    state: &MigrationState,
) -> Result<Vec<(&'static str, Address)>, MigrationError> {
    let library =
        state.require_address(StateKey::NftDescriptorLibraryV1_3_0, MISSING_NFT_DESCRIPTOR)?;
    Ok(vec![("NFTDescriptor", library)])
}

fn descriptor_proxy_arguments(
    state: &MigrationState,
    _: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    let descriptor = state.require_address(
        StateKey::NonfungibleTokenPositionDescriptorV1_3_0,
        MISSING_DESCRIPTOR,
    )?;
    let admin = state.require_address(StateKey::ProxyAdmin, MISSING_PROXY_ADMIN)?;
    Ok(vec![
        DynSolValue::Address(descriptor),
        DynSolValue::Address(admin),
        DynSolValue::Bytes(Vec::new()),
    ])
}

fn position_manager_arguments(
    state: &MigrationState,
    config: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    let descriptor_proxy =
        state.require_address(StateKey::DescriptorProxy, MISSING_DESCRIPTOR_PROXY)?;
    Ok(vec![factory(state)?, weth9(config), DynSolValue::Address(descriptor_proxy)])
}

fn migrator_arguments(
    state: &MigrationState,
    config: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    Ok(vec![factory(state)?, weth9(config), position_manager(state)?])
}

fn staker_arguments(
    state: &MigrationState,
    _: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    Ok(vec![
        factory(state)?,
        position_manager(state)?,
        DynSolValue::Uint(U256::from(MAX_INCENTIVE_START_LEAD_TIME), 256),
        DynSolValue::Uint(U256::from(MAX_INCENTIVE_DURATION), 256),
    ])
}

fn swap_router02_arguments(
    state: &MigrationState,
    config: &DeployConfig,
) -> Result<Vec<DynSolValue>, MigrationError> {
    Ok(vec![
        DynSolValue::Address(config.v2_core_factory_address),
        factory(state)?,
        position_manager(state)?,
        weth9(config),
    ])
}

/// Builds the six stages of a full deployment from the loaded artifacts.
///
/// Fails if an artifact the suite needs is missing from `artifacts`.
pub fn standard_stages(artifacts: &ArtifactStore) -> anyhow::Result<Vec<Stage>> {
    let core = Stage::new("core")
        .with(DeployStep::contract(
            StateKey::V3CoreFactory,
            artifacts.get("UniswapV3Factory")?,
        ))
        .with(DeployStep::contract(
            StateKey::Multicall2,
            artifacts.get("UniswapInterfaceMulticall")?,
        ))
        .with(DeployStep::contract(
            StateKey::ProxyAdmin,
            artifacts.get("ProxyAdmin")?,
        ))
        .with(DeployStep::contract(
            StateKey::TickLens,
            artifacts.get("TickLens")?,
        ))
        .with(DeployStep::library(
            StateKey::NftDescriptorLibraryV1_3_0,
            artifacts.get("NFTDescriptor")?,
        ));

    let periphery = Stage::new("periphery")
        .with(EnableOneBpFeeTier)
        .with(
            DeployStep::contract(
                StateKey::NonfungibleTokenPositionDescriptorV1_3_0,
                artifacts.get("NonfungibleTokenPositionDescriptor")?,
            )
            .arguments(descriptor_arguments)
            .libraries(descriptor_libraries),
        )
        .with(
            DeployStep::contract(StateKey::QuoterV2, artifacts.get("QuoterV2")?)
                .arguments(factory_and_weth9),
        )
        .with(
            DeployStep::contract(StateKey::Quoter, artifacts.get("Quoter")?)
                .arguments(factory_and_weth9),
        )
        .with(
            DeployStep::contract(StateKey::SwapRouter03, artifacts.get("SwapRouter")?)
                .arguments(factory_and_weth9),
        );

    let descriptor_proxy = Stage::new("descriptor-proxy").with(
        DeployStep::contract(
            StateKey::DescriptorProxy,
            artifacts.get("TransparentUpgradeableProxy")?,
        )
        .arguments(descriptor_proxy_arguments),
    );

    let position_manager = Stage::new("position-manager").with(
        DeployStep::contract(
            StateKey::NonfungibleTokenPositionManager,
            artifacts.get("NonfungiblePositionManager")?,
        )
        .arguments(position_manager_arguments),
    );

    let position_dependents = Stage::new("position-dependents")
        .with(
            DeployStep::contract(StateKey::V3Migrator, artifacts.get("V3Migrator")?)
                .arguments(migrator_arguments),
        )
        .with(
            DeployStep::contract(StateKey::V3Staker, artifacts.get("UniswapV3Staker")?)
                .arguments(staker_arguments),
        )
        .with(
            DeployStep::contract(StateKey::SwapRouter02, artifacts.get("SwapRouter02")?)
                .arguments(swap_router02_arguments),
        );

    let ownership = Stage::new("ownership")
        .with(TransferOwnership {
            key: StateKey::V3CoreFactoryOwnershipTransferred,
            contract_key: StateKey::V3CoreFactory,
            contract: "UniswapV3Factory",
            missing: MISSING_FACTORY,
            setter: "setOwner(address)",
        })
        .with(TransferOwnership {
            key: StateKey::ProxyAdminOwnershipTransferred,
            contract_key: StateKey::ProxyAdmin,
            contract: "ProxyAdmin",
            missing: MISSING_PROXY_ADMIN,
            setter: "transferOwnership(address)",
        });

    Ok(vec![
        core,
        periphery,
        descriptor_proxy,
        position_manager,
        position_dependents,
        ownership,
    ])
}

/// Contract names of every artifact [`standard_stages`] needs.
pub const REQUIRED_ARTIFACTS: [&str; 14] = [
    "UniswapV3Factory",
    "UniswapInterfaceMulticall",
    "ProxyAdmin",
    "TickLens",
    "NFTDescriptor",
    "NonfungibleTokenPositionDescriptor",
    "QuoterV2",
    "Quoter",
    "SwapRouter",
    "TransparentUpgradeableProxy",
    "NonfungiblePositionManager",
    "V3Migrator",
    "UniswapV3Staker",
    "SwapRouter02",
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Artifact;

    fn store() -> ArtifactStore {
        let mut store = ArtifactStore::new();
        for name in REQUIRED_ARTIFACTS {
            store.insert(Artifact {
                contract_name: name.to_string(),
                bytecode: "0x00".to_string(),
                link_references: Default::default(),
            });
        }
        store
    }

    #[test]
    fn test_stage_layout() {
        let stages = standard_stages(&store()).unwrap();
        let layout: Vec<(&str, Vec<StateKey>)> = stages
            .iter()
            .map(|stage| (stage.name(), stage.steps().iter().map(|s| s.key()).collect()))
            .collect();

        assert_eq!(
            layout,
            vec![
                (
                    "core",
                    vec![
                        StateKey::V3CoreFactory,
                        StateKey::Multicall2,
                        StateKey::ProxyAdmin,
                        StateKey::TickLens,
                        StateKey::NftDescriptorLibraryV1_3_0,
                    ]
                ),
                (
                    "periphery",
                    vec![
                        StateKey::OneBpFeeTierEnabled,
                        StateKey::NonfungibleTokenPositionDescriptorV1_3_0,
                        StateKey::QuoterV2,
                        StateKey::Quoter,
                        StateKey::SwapRouter03,
                    ]
                ),
                ("descriptor-proxy", vec![StateKey::DescriptorProxy]),
                ("position-manager", vec![StateKey::NonfungibleTokenPositionManager]),
                (
                    "position-dependents",
                    vec![StateKey::V3Migrator, StateKey::V3Staker, StateKey::SwapRouter02]
                ),
                (
                    "ownership",
                    vec![
                        StateKey::V3CoreFactoryOwnershipTransferred,
                        StateKey::ProxyAdminOwnershipTransferred,
                    ]
                ),
            ]
        );
    }

    #[test]
    fn test_missing_artifact() {
        let err = standard_stages(&ArtifactStore::new()).unwrap_err();
        assert!(err.to_string().contains("UniswapV3Factory"));
    }

    #[test]
    fn test_missing_factory_message() {
        let err = factory(&MigrationState::new()).unwrap_err();
        assert_eq!(err.to_string(), "Missing V3 Core Factory");
    }
}

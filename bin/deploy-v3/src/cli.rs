use std::path::PathBuf;

use alloy_core::primitives::{Address, B256};
use clap::Parser;
use tracing::level_filters::LevelFilter;
use url::Url;
use uniswap_v3_deploy::{
    DEFAULT_CONFIRMATIONS, LocalSigner, ascii_string_to_bytes32, parse_address,
    parse_gas_price_gwei,
};

fn parse_private_key(input: &str) -> anyhow::Result<LocalSigner> {
    LocalSigner::from_private_key(input).map_err(|e| anyhow::anyhow!("Invalid private key! {e}"))
}

fn parse_json_rpc(input: &str) -> anyhow::Result<Url> {
    Url::parse(input).map_err(|e| anyhow::anyhow!("Invalid JSON RPC URL {e}"))
}

fn parse_label(input: &str) -> anyhow::Result<B256> {
    ascii_string_to_bytes32(input).map_err(|e| anyhow::anyhow!("Invalid native currency label {e}"))
}

#[derive(Debug, Parser)]
#[command(name = "deploy-v3")]
#[command(
    author,
    version,
    about = "Deploy Uniswap V3 contracts to an EVM chain, resuming from a state file"
)]
#[command(args_override_self = true)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "DEPLOY_V3_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Private key used to deploy all contracts (0x-prefixed, 32 bytes).
    #[arg(long, alias = "pk", env = "DEPLOY_V3_PRIVATE_KEY", hide_env_values = true, value_parser = parse_private_key)]
    pub private_key: LocalSigner,

    /// JSON RPC URL where the contracts should be deployed.
    #[arg(short, long, env = "DEPLOY_V3_JSON_RPC", value_parser = parse_json_rpc)]
    pub json_rpc: Url,

    /// Address of the WETH9 contract on this chain.
    #[arg(long, alias = "w9", env = "DEPLOY_V3_WETH9_ADDRESS", value_parser = parse_address)]
    pub weth9_address: Address,

    /// Native currency label, e.g. ETH.
    #[arg(long, alias = "ncl", env = "DEPLOY_V3_NATIVE_CURRENCY_LABEL", value_parser = parse_label)]
    pub native_currency_label: B256,

    /// Address that will own the deployed contracts after the run.
    #[arg(short, long, env = "DEPLOY_V3_OWNER_ADDRESS", value_parser = parse_address)]
    pub owner_address: Address,

    /// Path to the JSON file holding the migration state.
    #[arg(short, long, env = "DEPLOY_V3_STATE", default_value = "./state.json")]
    pub state: PathBuf,

    /// V2 core factory address used by SwapRouter02. Zero address when absent.
    #[arg(long, alias = "v2", env = "DEPLOY_V3_V2_CORE_FACTORY_ADDRESS", value_parser = parse_address)]
    pub v2_core_factory_address: Option<Address>,

    /// Gas price to pay for each transaction, in gwei.
    ///
    /// If not provided, the node's suggested gas price is used.
    #[arg(short, long, env = "DEPLOY_V3_GAS_PRICE", value_parser = parse_gas_price_gwei)]
    pub gas_price: Option<u128>,

    /// How many confirmations to wait for after each transaction.
    #[arg(short, long, env = "DEPLOY_V3_CONFIRMATIONS", default_value_t = DEFAULT_CONFIRMATIONS)]
    pub confirmations: u64,

    /// Directory containing the compiled contract artifacts.
    #[arg(short, long, env = "DEPLOY_V3_ARTIFACTS", default_value = "./artifacts")]
    pub artifacts: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_core::primitives::address;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn args<'a>(extra: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec![
            "deploy-v3",
            "--private-key",
            KEY,
            "--json-rpc",
            "http://localhost:8545",
            "--weth9-address",
            "0xc02aaa39b223fe8d0a5e5c4f27ead9083c756cc2",
            "--native-currency-label",
            "ETH",
            "--owner-address",
            "0x70997970c51812dc3a010c7d01b50e0d17dc79c8",
        ];
        args.extend_from_slice(extra);
        args
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(args(&[])).unwrap();

        assert_eq!(cli.private_key.address(), address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266"));
        assert_eq!(cli.state, PathBuf::from("./state.json"));
        assert_eq!(cli.artifacts, PathBuf::from("./artifacts"));
        assert_eq!(cli.confirmations, 2);
        assert_eq!(cli.gas_price, None);
        assert_eq!(cli.v2_core_factory_address, None);
        assert_eq!(&cli.native_currency_label[..3], b"ETH");
    }

    #[test]
    fn test_gas_price_in_gwei() {
        let cli = Cli::try_parse_from(args(&["--gas-price", "30", "-c", "5"])).unwrap();

        assert_eq!(cli.gas_price, Some(30_000_000_000));
        assert_eq!(cli.confirmations, 5);
    }

    #[test]
    fn test_rejects_invalid_input() {
        assert!(Cli::try_parse_from(args(&["--gas-price", "fast"])).is_err());
        assert!(Cli::try_parse_from(args(&["--v2-core-factory-address", "0x1234"])).is_err());
        assert!(Cli::try_parse_from(args(&["--native-currency-label", &"X".repeat(33)])).is_err());
        assert!(Cli::try_parse_from(args(&["--json-rpc", "not a url"])).is_err());
        assert!(Cli::try_parse_from(args(&["--private-key", "0x1234"])).is_err());
    }

    #[test]
    fn test_missing_required() {
        assert!(Cli::try_parse_from(["deploy-v3", "--json-rpc", "http://localhost:8545"]).is_err());
    }
}

//! Run-wide deployment configuration and its input validation.

use std::{fmt, str::FromStr, sync::Arc};

use alloy_core::primitives::{Address, B256};
use anyhow::Context;

use crate::chain::ChainClient;

/// Wei per gwei, the unit gas prices are given in.
pub const WEI_PER_GWEI: u128 = 1_000_000_000;

/// Immutable parameters shared by every step of a run.
#[derive(Clone)]
pub struct DeployConfig {
    /// Client submitting transactions with the deployer's key.
    pub chain: Arc<dyn ChainClient>,
    /// Gas price in wei. Uses the node's suggestion when unset.
    pub gas_price: Option<u128>,
    /// Wrapped native token (WETH9) on this chain.
    pub weth9_address: Address,
    /// Native currency label, right-padded to 32 bytes.
    pub native_currency_label_bytes: B256,
    /// Uniswap V2 factory used by SwapRouter02. Zero when the chain has none.
    pub v2_core_factory_address: Address,
    /// Account that owns the factory and proxy admin once the run completes.
    pub owner_address: Address,
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("signer", &self.chain.signer_address())
            .field("gas_price", &self.gas_price)
            .field("weth9_address", &self.weth9_address)
            .field("native_currency_label_bytes", &self.native_currency_label_bytes)
            .field("v2_core_factory_address", &self.v2_core_factory_address)
            .field("owner_address", &self.owner_address)
            .finish()
    }
}

/// Encodes an ASCII label as a right-padded bytes32.
pub fn ascii_string_to_bytes32(label: &str) -> anyhow::Result<B256> {
    if label.len() > 32 || !label.is_ascii() {
        anyhow::bail!("Invalid label, must be less than 32 characters");
    }

    let mut bytes = [0u8; 32];
    bytes[..label.len()].copy_from_slice(label.as_bytes());
    Ok(B256::from(bytes))
}

/// Parses an address, enforcing the EIP-55 checksum when the input is mixed-case.
pub fn parse_address(input: &str) -> anyhow::Result<Address> {
    let hex_part = input.strip_prefix("0x").unwrap_or(input);
    let mixed_case = hex_part.chars().any(|c| c.is_ascii_uppercase())
        && hex_part.chars().any(|c| c.is_ascii_lowercase());

    if mixed_case {
        Address::parse_checksummed(input, None)
            .with_context(|| format!("bad address checksum: {input}"))
    } else {
        Address::from_str(input).with_context(|| format!("invalid address: {input}"))
    }
}

/// Parses a gas price given in gwei into wei.
pub fn parse_gas_price_gwei(input: &str) -> anyhow::Result<u128> {
    let gwei: u128 = input
        .trim()
        .parse()
        .with_context(|| format!("Failed to parse gas price: {input}"))?;
    gwei.checked_mul(WEI_PER_GWEI)
        .context("Gas price overflows when converted to wei")
}

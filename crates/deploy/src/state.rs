//! Persisted migration state.
//!
//! The state maps well-known keys to on-chain facts (mostly contract addresses).
//! It is append-only: once a key is recorded it is never removed or changed, so
//! its presence means the artifact already exists on chain and must not be
//! deployed again.

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use derive_more::Deref;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::MigrationError;

/// Keys the migration suite records.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
pub enum StateKey {
    #[strum(serialize = "v3CoreFactoryAddress")]
    V3CoreFactory,
    #[strum(serialize = "oneBpFeeTierEnabled")]
    OneBpFeeTierEnabled,
    #[strum(serialize = "multicall2Address")]
    Multicall2,
    #[strum(serialize = "proxyAdminAddress")]
    ProxyAdmin,
    #[strum(serialize = "tickLensAddress")]
    TickLens,
    #[strum(serialize = "nftDescriptorLibraryAddressV1_3_0")]
    NftDescriptorLibraryV1_3_0,
    #[strum(serialize = "nonfungibleTokenPositionDescriptorAddressV1_3_0")]
    NonfungibleTokenPositionDescriptorV1_3_0,
    #[strum(serialize = "descriptorProxyAddress")]
    DescriptorProxy,
    #[strum(serialize = "nonfungibleTokenPositionManagerAddress")]
    NonfungibleTokenPositionManager,
    #[strum(serialize = "v3MigratorAddress")]
    V3Migrator,
    #[strum(serialize = "v3StakerAddress")]
    V3Staker,
    #[strum(serialize = "quoterV2Address")]
    QuoterV2,
    #[strum(serialize = "quoterAddress")]
    Quoter,
    #[strum(serialize = "swapRouter02")]
    SwapRouter02,
    #[strum(serialize = "swapRouter03")]
    SwapRouter03,
    #[strum(serialize = "v3CoreFactoryOwnershipTransferred")]
    V3CoreFactoryOwnershipTransferred,
    #[strum(serialize = "proxyAdminOwnershipTransferred")]
    ProxyAdminOwnershipTransferred,
}

impl StateKey {
    /// The key as it appears in the state file.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl Serialize for StateKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StateKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let key = String::deserialize(deserializer)?;
        key.parse().map_err(|_| {
            serde::de::Error::custom(format!("unknown migration state key `{key}`"))
        })
    }
}

/// A value recorded under a [`StateKey`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateValue {
    Address(Address),
    Flag(bool),
    Addresses(Vec<Address>),
    Records(Vec<serde_json::Map<String, serde_json::Value>>),
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(address) => write!(f, "{address}"),
            Self::Flag(flag) => write!(f, "{flag}"),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl From<Address> for StateValue {
    fn from(address: Address) -> Self {
        Self::Address(address)
    }
}

impl From<bool> for StateValue {
    fn from(flag: bool) -> Self {
        Self::Flag(flag)
    }
}

/// A single key/value pair a step asks the engine to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateRecord {
    pub key: StateKey,
    pub value: StateValue,
}

impl StateRecord {
    pub fn new(key: StateKey, value: impl Into<StateValue>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

/// Append-only mapping of completed state keys to their on-chain values.
///
/// Read access goes through [`Deref`] to the underlying map; the only way to
/// add entries is [`MigrationState::record`], which refuses overwrites.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Deref)]
#[serde(transparent)]
pub struct MigrationState(BTreeMap<StateKey, StateValue>);

impl MigrationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the address recorded under `key`, if any.
    pub fn address(&self, key: StateKey) -> Option<Address> {
        match self.0.get(&key) {
            Some(StateValue::Address(address)) => Some(*address),
            _ => None,
        }
    }

    /// Returns the address recorded under `key`, or a missing-prerequisite error.
    pub fn require_address(
        &self,
        key: StateKey,
        missing: &'static str,
    ) -> Result<Address, MigrationError> {
        self.address(key)
            .ok_or(MigrationError::MissingPrerequisite(missing))
    }

    /// Records `record`, returning whether the state changed.
    ///
    /// Recording the value already stored under a key is a no-op. Recording a
    /// different value is a [`MigrationError::StateConflict`] and leaves the
    /// state untouched.
    pub fn record(&mut self, record: StateRecord) -> Result<bool, MigrationError> {
        match self.0.get(&record.key) {
            Some(existing) if *existing == record.value => Ok(false),
            Some(existing) => Err(MigrationError::StateConflict {
                key: record.key,
                existing: existing.clone(),
                incoming: record.value,
            }),
            None => {
                self.0.insert(record.key, record.value);
                Ok(true)
            }
        }
    }

    /// Returns the union of this state and `records` without modifying `self`.
    ///
    /// Fails as a whole if any record conflicts with an existing key.
    pub fn merged<'a>(
        &self,
        records: impl IntoIterator<Item = &'a StateRecord>,
    ) -> Result<Self, MigrationError> {
        let mut next = self.clone();
        for record in records {
            next.record(record.clone())?;
        }
        Ok(next)
    }

    /// Whether every key of `other` is present here with the same value.
    pub fn includes(&self, other: &MigrationState) -> bool {
        other
            .0
            .iter()
            .all(|(key, value)| self.0.get(key) == Some(value))
    }
}

/// Builds a state from known records. Later duplicates replace earlier ones.
impl FromIterator<StateRecord> for MigrationState {
    fn from_iter<I: IntoIterator<Item = StateRecord>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|record| (record.key, record.value))
                .collect(),
        )
    }
}

/// JSON file holding the migration state between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    path: PathBuf,
}

impl StateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the state, or an empty state if the file does not exist yet.
    pub fn load(&self) -> Result<MigrationState> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "No state file found, starting from empty state");
            return Ok(MigrationState::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read migration state from {}", self.path.display()))?;
        let state: MigrationState = serde_json::from_str(&content)
            .context("Failed to parse migration state file")?;

        tracing::info!(path = %self.path.display(), keys = state.len(), "Migration state loaded");
        Ok(state)
    }

    /// Overwrites the file with `state`.
    ///
    /// The content is written to a sibling temporary file first and renamed
    /// into place, so a crash never leaves a truncated state file behind.
    pub fn save(&self, state: &MigrationState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .context("Failed to serialize migration state")?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, json)
            .with_context(|| format!("Failed to write migration state to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to move migration state into {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), keys = state.len(), "Migration state saved");
        Ok(())
    }
}

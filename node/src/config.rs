//! Node configuration file.
//!
//! A JSON document holding the network name and the devnet genesis. Ports,
//! paths and log format come from the CLI (or `MECH_*` env vars) instead.

use anyhow::{bail, Context, Result};
use mech_contracts::devnet::{Genesis, GenesisBalance};
use mech_contracts::MarketplaceConfig;
use mech_protocol::config::{chain_id_for_network, CREDIT_RATIO_SCALE};
use mech_protocol::crypto::MechKeypair;
use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the config inside the data directory.
pub const CONFIG_FILE: &str = "config.json";

/// File name of the owner key inside the data directory.
pub const OWNER_KEY_FILE: &str = "owner.key";

/// Native value minted to the owner of a fresh devnet.
const DEVNET_OWNER_FUNDS: u64 = 1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub network: String,
    pub genesis: Genesis,
}

impl NodeConfig {
    /// A devnet owned and drained by `owner`, with the owner funded and no
    /// mechs registered yet.
    pub fn devnet(network: &str, owner: Address) -> Result<Self> {
        let chain_id = chain_id_for_network(network)
            .with_context(|| format!("unknown network: {network}"))?;
        Ok(Self {
            network: network.to_string(),
            genesis: Genesis {
                chain_id,
                owner,
                drainer: owner,
                config: MarketplaceConfig::default(),
                factories: Vec::new(),
                services: Vec::new(),
                mechs: Vec::new(),
                balances: vec![GenesisBalance {
                    account: owner,
                    native: DEVNET_OWNER_FUNDS,
                    ..Default::default()
                }],
                token_credit_ratio: CREDIT_RATIO_SCALE,
                subscription_reserve: 0,
            },
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: NodeConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)
            .with_context(|| format!("failed to write config {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.genesis
            .config
            .validate()
            .context("invalid marketplace config")?;

        if let Some(expected) = chain_id_for_network(&self.network) {
            if expected != self.genesis.chain_id {
                bail!(
                    "network {} expects chain id {}, genesis has {}",
                    self.network,
                    expected,
                    self.genesis.chain_id
                );
            }
        }
        if self.genesis.owner.is_zero() || self.genesis.drainer.is_zero() {
            bail!("genesis owner and drainer must be non-zero");
        }
        for mech in &self.genesis.mechs {
            if !self
                .genesis
                .services
                .iter()
                .any(|s| s.service_id == mech.service_id)
            {
                bail!(
                    "mech {} references unknown service {}",
                    mech.mech,
                    mech.service_id
                );
            }
        }
        Ok(())
    }
}

/// Writes `keypair`'s secret key as hex, readable by the owner only.
pub fn save_owner_key(path: &Path, keypair: &MechKeypair) -> Result<()> {
    std::fs::write(path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write owner key to {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to restrict {}", path.display()))?;
    }
    Ok(())
}

/// Reads the owner key written by `init`, if there is one.
pub fn load_owner_key(path: &Path) -> Result<Option<MechKeypair>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read owner key {}", path.display()))?;
    let keypair = MechKeypair::from_hex(&raw)
        .with_context(|| format!("malformed owner key {}", path.display()))?;
    Ok(Some(keypair))
}

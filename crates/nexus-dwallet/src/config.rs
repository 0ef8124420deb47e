use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::dwallet::ObjectId;
use crate::keys::DEFAULT_DOMAIN_SALT;
use crate::poll::PollConfig;
use crate::retry::BackoffConfig;

pub const SUI_TESTNET_RPC_URL: &str = "https://fullnode.testnet.sui.io:443";
pub const SUI_COIN_TYPE: &str = "0x2::sui::SUI";
pub const IKA_TESTNET_COIN_TYPE: &str =
    "0x1f26bb2f711ff82dcda4d02c77d5123089cb7f8418751474b9fb744ce031526a::ika::IKA";

pub const HYPER_EVM_TESTNET_RPC_URL: &str = "https://rpc.hyperliquid-testnet.xyz/evm";
pub const HYPER_EVM_TESTNET_CHAIN_ID: u64 = 998;
pub const HYPER_EVM_TESTNET_USDC: &str = "0x2B3370eE501B4a559b57D449569354196457D8Ab";
pub const HYPER_EVM_TESTNET_CORE_DEPOSIT_WALLET: &str =
    "0x0B80659a4076E9E93C7DbE0f10675A16a3e5C206";
/// `CoreWriter` system contract. Same address on every network.
pub const CORE_WRITER_ADDRESS: &str = "0x3333333333333333333333333333333333333333";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    Mainnet,
    #[default]
    Testnet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IkaConfig {
    /// Sui JSON-RPC endpoint used for every coordinator read.
    pub sui_rpc_url: String,
    /// Ika coordinator package id (Move calls target `<package>::coordinator::*`).
    pub coordinator_package_id: Option<String>,
    /// Shared coordinator object passed as the first argument to every coordinator call.
    pub coordinator_object_id: Option<String>,
    /// Object table holding the network encryption keys. The last entry is treated as latest.
    pub network_encryption_keys_table_id: Option<String>,
    /// Pins a specific network encryption key instead of reading the table.
    pub network_encryption_key_id: Option<String>,
    pub ika_coin_type: String,
    pub sui_coin_type: String,
    /// Gas split off as the presign fee coin, in MIST.
    pub presign_fee_amount: u64,
    /// Hex-encoded domain salt for password key derivation.
    ///
    /// Every dWallet created under one salt is only recoverable with the same salt.
    pub key_derivation_salt_hex: String,
}

impl Default for IkaConfig {
    fn default() -> Self {
        Self {
            sui_rpc_url: SUI_TESTNET_RPC_URL.into(),
            coordinator_package_id: None,
            coordinator_object_id: None,
            network_encryption_keys_table_id: None,
            network_encryption_key_id: None,
            ika_coin_type: IKA_TESTNET_COIN_TYPE.into(),
            sui_coin_type: SUI_COIN_TYPE.into(),
            presign_fee_amount: 1_000_000,
            key_derivation_salt_hex: hex::encode(DEFAULT_DOMAIN_SALT),
        }
    }
}

/// The Nexus wallet registry that records dWallets and their presigns per owner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub package_id: Option<String>,
    pub registry_object_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperEvmConfig {
    pub rpc_url: String,
    /// Additional endpoints tried in order when the primary fails.
    pub fallback_rpc_urls: Vec<String>,
    pub chain_id: u64,
    pub usdc_address: String,
    pub core_deposit_wallet_address: String,
    pub core_writer_address: String,
    /// HyperCore dex credited by bridge deposits. 0 is the default perp dex.
    pub destination_dex: u32,
}

impl Default for HyperEvmConfig {
    fn default() -> Self {
        Self {
            rpc_url: HYPER_EVM_TESTNET_RPC_URL.into(),
            fallback_rpc_urls: vec![],
            chain_id: HYPER_EVM_TESTNET_CHAIN_ID,
            usdc_address: HYPER_EVM_TESTNET_USDC.into(),
            core_deposit_wallet_address: HYPER_EVM_TESTNET_CORE_DEPOSIT_WALLET.into(),
            core_writer_address: CORE_WRITER_ADDRESS.into(),
            destination_dex: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperliquidConfig {
    /// Hyperliquid API base URL (mainnet).
    pub base_url_mainnet: String,
    /// Hyperliquid API base URL (testnet).
    pub base_url_testnet: String,
}

impl Default for HyperliquidConfig {
    fn default() -> Self {
        Self {
            base_url_mainnet: "https://api.hyperliquid.xyz".into(),
            base_url_testnet: "https://api.hyperliquid-testnet.xyz".into(),
        }
    }
}

/// A bounded wait, in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSecs {
    pub timeout: u64,
    pub interval: u64,
}

impl WaitSecs {
    pub const fn poll(self) -> PollConfig {
        PollConfig::secs(self.timeout, self.interval)
    }
}

const fn wait(timeout: u64, interval: u64) -> WaitSecs {
    WaitSecs { timeout, interval }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingsConfig {
    /// Activation: wait for the network to finish its half of DKG.
    pub activation_awaiting_signature: WaitSecs,
    /// Activation: wait for Active after the share is accepted.
    pub activation_active: WaitSecs,
    pub presign_completed: WaitSecs,
    /// Per-candidate wait before the signer moves on to the next presign.
    pub signer_presign_candidate: WaitSecs,
    pub signer_dwallet_active: WaitSecs,
    pub sign_session_completed: WaitSecs,
    pub settlement_interval_seconds: u64,
    pub settlement_max_attempts: u32,
    pub rate_limit_attempts: usize,
    pub rate_limit_base_delay_ms: u64,
}

impl Default for TimingsConfig {
    fn default() -> Self {
        Self {
            activation_awaiting_signature: wait(300, 5),
            activation_active: wait(120, 3),
            presign_completed: wait(180, 4),
            signer_presign_candidate: wait(60, 4),
            signer_dwallet_active: wait(30, 3),
            sign_session_completed: wait(120, 2),
            settlement_interval_seconds: 10,
            settlement_max_attempts: 12,
            rate_limit_attempts: 5,
            rate_limit_base_delay_ms: 1000,
        }
    }
}

impl TimingsConfig {
    pub fn rate_limit_backoff(&self) -> BackoffConfig {
        BackoffConfig {
            rounds: self.rate_limit_attempts,
            base_delay: Duration::from_millis(self.rate_limit_base_delay_ms),
            ..BackoffConfig::rate_limit()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NexusConfig {
    pub network_mode: NetworkMode,
    pub ika: IkaConfig,
    pub registry: RegistryConfig,
    pub hyper_evm: HyperEvmConfig,
    pub hyperliquid: HyperliquidConfig,
    pub timings: TimingsConfig,
}

/// Ika network ids resolved from config, ready for transaction building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IkaNetwork {
    pub coordinator_package: ObjectId,
    pub coordinator_object: ObjectId,
    pub registry_package: ObjectId,
    pub registry_object: ObjectId,
    pub ika_coin_type: String,
    pub sui_coin_type: String,
    pub presign_fee_amount: u64,
}

fn required(v: Option<&String>, key: &str, env: &str) -> eyre::Result<ObjectId> {
    match v.map(String::as_str).map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => Ok(ObjectId::new(s)),
        None => eyre::bail!("{key} is not configured (set it in config.toml or {env})"),
    }
}

impl NexusConfig {
    pub fn ika_network(&self) -> eyre::Result<IkaNetwork> {
        Ok(IkaNetwork {
            coordinator_package: required(
                self.ika.coordinator_package_id.as_ref(),
                "ika.coordinator_package_id",
                "NEXUS_IKA_COORDINATOR_PACKAGE_ID",
            )?,
            coordinator_object: required(
                self.ika.coordinator_object_id.as_ref(),
                "ika.coordinator_object_id",
                "NEXUS_IKA_COORDINATOR_OBJECT_ID",
            )?,
            registry_package: required(
                self.registry.package_id.as_ref(),
                "registry.package_id",
                "NEXUS_REGISTRY_PACKAGE_ID",
            )?,
            registry_object: required(
                self.registry.registry_object_id.as_ref(),
                "registry.registry_object_id",
                "NEXUS_REGISTRY_OBJECT_ID",
            )?,
            ika_coin_type: self.ika.ika_coin_type.clone(),
            sui_coin_type: self.ika.sui_coin_type.clone(),
            presign_fee_amount: self.ika.presign_fee_amount,
        })
    }

    pub fn key_derivation_salt(&self) -> eyre::Result<Vec<u8>> {
        let s = self.ika.key_derivation_salt_hex.trim();
        let salt = hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| eyre::eyre!("ika.key_derivation_salt_hex: {e}"))?;
        if salt.is_empty() {
            eyre::bail!("ika.key_derivation_salt_hex must not be empty");
        }
        Ok(salt)
    }

    pub fn hyperliquid_base_url(&self) -> &str {
        match self.network_mode {
            NetworkMode::Mainnet => &self.hyperliquid.base_url_mainnet,
            NetworkMode::Testnet => &self.hyperliquid.base_url_testnet,
        }
    }

    /// Primary HyperEVM endpoint followed by fallbacks, without duplicates.
    pub fn hyper_evm_rpc_urls(&self) -> Vec<String> {
        let mut out = vec![self.hyper_evm.rpc_url.clone()];
        for u in &self.hyper_evm.fallback_rpc_urls {
            if !out.contains(u) {
                out.push(u.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_target_testnet() {
        let cfg = NexusConfig::default();
        assert_eq!(cfg.network_mode, NetworkMode::Testnet);
        assert_eq!(cfg.hyper_evm.chain_id, 998);
        assert_eq!(
            cfg.hyperliquid_base_url(),
            "https://api.hyperliquid-testnet.xyz"
        );
        assert_eq!(cfg.timings.presign_completed, wait(180, 4));
        assert_eq!(cfg.timings.settlement_max_attempts, 12);
    }

    #[test]
    fn default_salt_round_trips_through_hex() -> eyre::Result<()> {
        let cfg = NexusConfig::default();
        assert_eq!(cfg.key_derivation_salt()?, DEFAULT_DOMAIN_SALT.to_vec());
        Ok(())
    }

    #[test]
    fn ika_network_requires_ids() {
        let cfg = NexusConfig::default();
        let err = cfg.ika_network().err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("ika.coordinator_package_id"), "{err}");

        let mut cfg = NexusConfig::default();
        cfg.ika.coordinator_package_id = Some("0x1".into());
        cfg.ika.coordinator_object_id = Some("0x2".into());
        cfg.registry.package_id = Some("0x3".into());
        cfg.registry.registry_object_id = Some("0x4".into());
        assert!(cfg.ika_network().is_ok(), "all ids present");
    }

    #[test]
    fn rpc_urls_dedup_fallbacks() {
        let mut cfg = NexusConfig::default();
        cfg.hyper_evm.fallback_rpc_urls =
            vec![HYPER_EVM_TESTNET_RPC_URL.into(), "https://backup.example".into()];
        assert_eq!(
            cfg.hyper_evm_rpc_urls(),
            vec![
                HYPER_EVM_TESTNET_RPC_URL.to_owned(),
                "https://backup.example".to_owned()
            ]
        );
    }
}

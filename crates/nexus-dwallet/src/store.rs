use crate::{
    config::{NetworkMode, NexusConfig},
    paths::NexusPaths,
};
use eyre::Context as _;
use std::{fs, path::PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

fn parse_network_mode_env(s: &str) -> Option<NetworkMode> {
    let v = s.trim().to_lowercase();
    match v.as_str() {
        "mainnet" | "main" | "prod" | "production" => Some(NetworkMode::Mainnet),
        "testnet" | "test" | "dev" | "devnet" => Some(NetworkMode::Testnet),
        _ => None,
    }
}

/// Apply `NEXUS_*` environment overrides on top of the file config.
fn apply_env_overrides(cfg: &mut NexusConfig) {
    /// Helper: if an env var is set and non-empty, apply `setter` with the trimmed value.
    fn apply_env(var: &str, setter: impl FnOnce(&str)) {
        if let Ok(u) = std::env::var(var) {
            let t = u.trim();
            if !t.is_empty() {
                setter(t);
            }
        }
    }

    apply_env("NEXUS_NETWORK_MODE", |v| {
        if let Some(m) = parse_network_mode_env(v) {
            cfg.network_mode = m;
        }
    });
    apply_env("NEXUS_SUI_RPC_URL", |v| {
        v.clone_into(&mut cfg.ika.sui_rpc_url);
    });
    apply_env("NEXUS_IKA_COORDINATOR_PACKAGE_ID", |v| {
        cfg.ika.coordinator_package_id = Some(v.to_owned());
    });
    apply_env("NEXUS_IKA_COORDINATOR_OBJECT_ID", |v| {
        cfg.ika.coordinator_object_id = Some(v.to_owned());
    });
    apply_env("NEXUS_IKA_NETWORK_ENCRYPTION_KEYS_TABLE_ID", |v| {
        cfg.ika.network_encryption_keys_table_id = Some(v.to_owned());
    });
    apply_env("NEXUS_IKA_NETWORK_ENCRYPTION_KEY_ID", |v| {
        cfg.ika.network_encryption_key_id = Some(v.to_owned());
    });
    apply_env("NEXUS_IKA_COIN_TYPE", |v| {
        v.clone_into(&mut cfg.ika.ika_coin_type);
    });
    apply_env("NEXUS_KEY_DERIVATION_SALT_HEX", |v| {
        v.clone_into(&mut cfg.ika.key_derivation_salt_hex);
    });
    apply_env("NEXUS_REGISTRY_PACKAGE_ID", |v| {
        cfg.registry.package_id = Some(v.to_owned());
    });
    apply_env("NEXUS_REGISTRY_OBJECT_ID", |v| {
        cfg.registry.registry_object_id = Some(v.to_owned());
    });
    apply_env("NEXUS_HYPER_EVM_RPC_URL", |v| {
        v.clone_into(&mut cfg.hyper_evm.rpc_url);
    });
    apply_env("NEXUS_HYPERLIQUID_BASE_URL_TESTNET", |v| {
        v.clone_into(&mut cfg.hyperliquid.base_url_testnet);
    });
    apply_env("NEXUS_HYPERLIQUID_BASE_URL_MAINNET", |v| {
        v.clone_into(&mut cfg.hyperliquid.base_url_mainnet);
    });
    if let Ok(v) = std::env::var("NEXUS_HYPER_EVM_CHAIN_ID") {
        if let Ok(n) = v.trim().parse::<u64>() {
            if n > 0 {
                cfg.hyper_evm.chain_id = n;
            }
        }
    }
}

impl ConfigStore {
    pub fn new(paths: &NexusPaths) -> Self {
        Self {
            path: paths.config_dir.join("config.toml"),
        }
    }

    pub fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn load_or_init_default(&self) -> eyre::Result<NexusConfig> {
        if !self.path.exists() {
            let cfg = NexusConfig::default();
            self.save(&cfg)?;
            let mut cfg = cfg;
            apply_env_overrides(&mut cfg);
            return Ok(cfg);
        }

        let s = fs::read_to_string(&self.path).context("read config.toml")?;
        let mut cfg: NexusConfig = toml::from_str(&s).context("parse config.toml")?;
        apply_env_overrides(&mut cfg);
        Ok(cfg)
    }

    pub fn save(&self, cfg: &NexusConfig) -> eyre::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
        let s = toml::to_string_pretty(cfg).context("serialize config.toml")?;
        fs::write(&self.path, s).context("write config.toml")?;
        Ok(())
    }
}

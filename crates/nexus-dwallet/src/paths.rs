use directories::ProjectDirs;
use eyre::ContextCompat as _;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct NexusPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl NexusPaths {
    pub fn discover() -> eyre::Result<Self> {
        // Test/CI override knobs.
        if let (Ok(data_dir), Ok(config_dir)) = (
            std::env::var("NEXUS_DATA_DIR"),
            std::env::var("NEXUS_CONFIG_DIR"),
        ) {
            return Ok(Self::rooted(PathBuf::from(config_dir), PathBuf::from(data_dir)));
        }

        // macOS: ~/Library/Application Support/nexus-dwallet
        // Linux: ~/.config/nexus-dwallet
        // Windows: %APPDATA%\\nexus-dwallet
        let proj = ProjectDirs::from("", "", "nexus-dwallet")
            .context("failed to resolve project dirs")?;
        Ok(Self::rooted(
            proj.config_dir().to_path_buf(),
            proj.data_dir().to_path_buf(),
        ))
    }

    pub fn rooted(config_dir: PathBuf, data_dir: PathBuf) -> Self {
        let log_file = data_dir.join("nexus-dwallet.log.jsonl");
        Self {
            config_dir,
            data_dir,
            log_file,
        }
    }
}

use super::Config;
use super::types::prlens_dir;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

impl Config {
    /// Loads `~/.prlens/config.toml`, writing a default file on first run.
    pub fn load_or_init() -> Result<Self> {
        let prlens_dir = prlens_dir();
        let config_path = prlens_dir.join("config.toml");

        if !prlens_dir.exists() {
            fs::create_dir_all(&prlens_dir).context("Failed to create .prlens directory")?;
        }

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self {
                config_path,
                ..Self::default()
            };
            config.validate()?;
            config.save()?;
            Ok(config)
        }
    }

    /// Loads an explicit config file. A missing file is an error here.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.config_path = path.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&self.config_path, toml_str).context("Failed to write config file")?;
        Ok(())
    }
}

use anyhow::Context;
use clap::ValueEnum;
use log::LevelFilter;
use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::services::toplevel::MAX_MANAGER_VERSION;

const CONFIG_PATH: &str = "~/.config/toplevels.toml";

#[derive(Deserialize, ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub dedup_synced: bool,
    #[serde(default = "default_max_manager_version")]
    pub max_manager_version: u32,
}

fn default_log_level() -> String {
    "warn".to_owned()
}

fn default_max_manager_version() -> u32 {
    MAX_MANAGER_VERSION
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            format: OutputFormat::default(),
            dedup_synced: false,
            max_manager_version: default_max_manager_version(),
        }
    }
}

impl Config {
    pub fn log_level(&self) -> anyhow::Result<LevelFilter> {
        self.log_level
            .parse()
            .with_context(|| format!("invalid log level {:?}", self.log_level))
    }
}

pub fn default_config_path() -> PathBuf {
    shellexpand::path::tilde(CONFIG_PATH).into_owned()
}

pub fn parse_config(content: &str) -> Result<Config, toml::de::Error> {
    toml::from_str(content)
}

/// Reads the config at `path`. A missing file yields the default config.
pub fn read_config(path: &Path) -> anyhow::Result<Config> {
    match fs::read_to_string(path) {
        Ok(content) => parse_config(&content)
            .with_context(|| format!("failed to parse config file {}", path.display())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Config::default()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file {}", path.display()))
        }
    }
}

//! Server configuration.

use crate::error::Result;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The socket address the API listens on.
    pub address: SocketAddr,
    pub database: DatabaseConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(rename = "type")]
    pub kind: DatabaseKind,
    /// The database file for backends that persist; unused by `memory`.
    #[serde(default)]
    pub location: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    Memory,
    Plaintext,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let file = std::fs::File::open(path)?;
        Ok(serde_yaml::from_reader(file)?)
    }
}

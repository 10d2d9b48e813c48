// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of `hoist.toml` to simplify the process of
//! serialization and deserialization. The configuration file has two tables:
//! `[sync]` describing where client build output should be mirrored into the
//! server's resources, and `[deploy]` describing the artifact to ship and the
//! remote host to ship it to.
//!
//! # Remote Host Descriptor
//!
//! The remote host is never fully described by the file alone. The domain can
//! be overridden on the command line, and the private key path is normally
//! read from an environment variable (`EC2_KEYPAIR` by default) so that it
//! never has to be committed next to the project. Use
//! [`DeploySettings::remote_host`] to resolve the final descriptor.

use crate::deploy::RemoteLayout;

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Hoist configuration file layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct HoistConfig {
    /// Resource sync settings.
    pub sync: Option<SyncSettings>,

    /// Remote deployment settings.
    #[serde(default)]
    pub deploy: DeploySettings,
}

impl HoistConfig {
    /// Load configuration from file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file is not valid.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            source,
            path: path.as_ref().to_path_buf(),
        })?;

        data.parse()
    }

    /// Obtain sync settings, failing if the `[sync]` table is missing.
    pub fn sync_settings(&self) -> Result<&SyncSettings> {
        self.sync.as_ref().ok_or(ConfigError::MissingSection("sync"))
    }
}

impl FromStr for HoistConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: HoistConfig = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every local path field.
        if let Some(sync) = config.sync.as_mut() {
            sync.source = expand_path(&sync.source)?;
            sync.destination = expand_path(&sync.destination)?;
        }
        if let Some(artifact) = config.deploy.artifact.as_mut() {
            *artifact = expand_path(artifact)?;
        }
        if let Some(key) = config.deploy.key.as_mut() {
            *key = expand_path(key)?;
        }

        Ok(config)
    }
}

impl Display for HoistConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Resource sync settings.
///
/// Client build output at `source` gets mirrored into
/// `destination/subpath`.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SyncSettings {
    /// Client build output directory.
    pub source: PathBuf,

    /// Server static-resources root.
    pub destination: PathBuf,

    /// Sub-directory of destination that receives the client files.
    #[serde(default = "default_subpath")]
    pub subpath: PathBuf,

    /// Gitignore-style patterns of source files to leave out.
    pub exclude: Option<Vec<String>>,
}

impl SyncSettings {
    /// Directory that actually mirrors the source.
    pub fn target(&self) -> PathBuf {
        self.destination.join(&self.subpath)
    }
}

/// Remote deployment settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploySettings {
    /// Packaged server artifact to ship.
    pub artifact: Option<PathBuf>,

    /// Domain name of remote host.
    pub domain: Option<String>,

    /// Remote user to log in as.
    pub user: String,

    /// Environment variable holding the private key path.
    pub key_env: String,

    /// Explicit private key path, takes priority over `key_env`.
    pub key: Option<PathBuf>,

    /// Deployment root on remote host, relative to remote home.
    pub remote_base: String,

    /// Name of server process to terminate before cleanup.
    pub process_name: String,

    /// Program and leading arguments that launch the artifact.
    pub launch: Vec<String>,

    /// Name of log file inside each deployment directory.
    pub log_file: String,

    /// Run remote commands through sudo.
    pub sudo: bool,

    /// Extra arguments handed to both ssh and scp.
    pub ssh_options: Vec<String>,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            artifact: None,
            domain: None,
            user: "ec2-user".into(),
            key_env: "EC2_KEYPAIR".into(),
            key: None,
            remote_base: "ac".into(),
            process_name: "java".into(),
            launch: vec!["java".into(), "-jar".into()],
            log_file: "output.txt".into(),
            sudo: true,
            ssh_options: Vec::new(),
        }
    }
}

impl DeploySettings {
    /// Resolve remote host descriptor.
    ///
    /// Domain override wins over configured domain. Explicit key path wins over
    /// the key environment variable.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MissingDomain`] if no domain is available.
    /// - Return [`ConfigError::MissingKey`] if no private key path is available.
    pub fn remote_host(&self, domain_override: Option<&str>) -> Result<RemoteHost> {
        let domain = domain_override
            .map(ToString::to_string)
            .or_else(|| self.domain.clone())
            .filter(|domain| !domain.trim().is_empty())
            .ok_or(ConfigError::MissingDomain)?;

        let key = match &self.key {
            Some(key) => key.clone(),
            None => std::env::var(&self.key_env)
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(|value| PathBuf::from(shellexpand::tilde(&value).into_owned()))
                .ok_or_else(|| ConfigError::MissingKey {
                    var: self.key_env.clone(),
                })?,
        };

        Ok(RemoteHost {
            user: self.user.clone(),
            domain,
            key,
            options: self.ssh_options.clone(),
        })
    }

    /// Remote directory layout and command shape for rollouts.
    pub fn layout(&self) -> RemoteLayout {
        RemoteLayout {
            remote_base: self.remote_base.clone(),
            process_name: self.process_name.clone(),
            launch: self.launch.clone(),
            log_file: self.log_file.clone(),
            sudo: self.sudo,
        }
    }
}

/// Remote host descriptor.
///
/// Read-only for the duration of a rollout.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct RemoteHost {
    /// Remote user name.
    pub user: String,

    /// Domain name of remote host.
    pub domain: String,

    /// Private key used to authenticate both scp and ssh.
    pub key: PathBuf,

    /// Extra arguments for ssh and scp.
    pub options: Vec<String>,
}

impl RemoteHost {
    /// Connection target in `user@domain` form.
    pub fn target(&self) -> String {
        format!("{}@{}", self.user, self.domain)
    }
}

impl Display for RemoteHost {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.target().as_str())
    }
}

fn default_subpath() -> PathBuf {
    PathBuf::from("static")
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Configuration file cannot be read.
    #[error("failed to read configuration file at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Configuration lacks a required table.
    #[error("configuration has no [{0}] table")]
    MissingSection(&'static str),

    /// No remote domain configured or given.
    #[error("no remote domain configured, set deploy.domain or pass --domain")]
    MissingDomain,

    /// No private key configured or exported.
    #[error("no private key configured, set deploy.key or export {var}")]
    MissingKey { var: String },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

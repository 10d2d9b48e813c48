// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine where Hoist should look for its configuration file.

use std::path::{Path, PathBuf};

/// Name of configuration file Hoist looks for.
pub const CONFIG_FILE_NAME: &str = "hoist.toml";

/// Determine path to the user-wide configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/hoist/hoist.toml`. Does not
/// check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if configuration directory cannot be determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn user_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("hoist").join(CONFIG_FILE_NAME))
        .ok_or(NoWayHome)
}

/// Locate configuration file to use.
///
/// An explicit path always wins. Otherwise `./hoist.toml` is preferred over
/// the user-wide configuration file. When neither exists, `./hoist.toml` is
/// returned so callers know where a fresh configuration should be written.
pub fn locate_config(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return local;
    }

    match user_config_path() {
        Ok(path) if path.exists() => path,
        _ => local,
    }
}

/// No way to determine user's configuration directory.
///
/// # See Also
///
/// - [`dirs::config_dir`](https://docs.rs/dirs/latest/dirs/fn.config_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's configuration directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

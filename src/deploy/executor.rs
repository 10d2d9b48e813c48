// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote execution capabilities.
//!
//! A rollout needs exactly two things from the outside world besides the
//! local file system: a way to securely copy a staged directory to the remote
//! host, and a way to run one command in one authenticated remote session.
//! Both are expressed through [`RemoteExecutor`] so that each step can be
//! swapped out in tests or rehearsals.
//!
//! Hoist does not implement SSH itself. [`OpenSshExecutor`] drives the
//! system's OpenSSH `scp` and `ssh` clients, relying entirely on their own
//! timeout and keepalive behaviour.

use crate::{config::RemoteHost, deploy::command::RemoteCommand, sync::mirror_tree};

use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Command, ExitStatus},
};
use tracing::{debug, info, instrument};

/// Layer of indirection for remote side effects.
pub trait RemoteExecutor {
    /// Recursively copy `local_dir` into `remote_parent` on remote host.
    fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> Result<()>;

    /// Run command in a fresh remote session, returning its output.
    fn run_session(&self, command: &RemoteCommand) -> Result<String>;
}

impl<E> RemoteExecutor for &E
where
    E: RemoteExecutor + ?Sized,
{
    fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> Result<()> {
        (**self).secure_copy(local_dir, remote_parent)
    }

    fn run_session(&self, command: &RemoteCommand) -> Result<String> {
        (**self).run_session(command)
    }
}

impl<E> RemoteExecutor for Box<E>
where
    E: RemoteExecutor + ?Sized,
{
    fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> Result<()> {
        (**self).secure_copy(local_dir, remote_parent)
    }

    fn run_session(&self, command: &RemoteCommand) -> Result<String> {
        (**self).run_session(command)
    }
}

/// Remote execution through the system's OpenSSH clients.
#[derive(Debug, Clone)]
pub struct OpenSshExecutor {
    host: RemoteHost,
    ssh: OsString,
    scp: OsString,
}

impl OpenSshExecutor {
    pub fn new(host: RemoteHost) -> Self {
        Self {
            host,
            ssh: "ssh".into(),
            scp: "scp".into(),
        }
    }

    /// Use different ssh and scp binaries.
    pub fn with_programs(mut self, ssh: impl Into<OsString>, scp: impl Into<OsString>) -> Self {
        self.ssh = ssh.into();
        self.scp = scp.into();
        self
    }

    pub fn host(&self) -> &RemoteHost {
        &self.host
    }

    fn scp_args(&self, local_dir: &Path, remote_parent: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-r".into(), "-i".into(), self.host.key.clone().into()];
        args.extend(self.host.options.iter().map(OsString::from));
        args.push(local_dir.as_os_str().to_os_string());
        args.push(format!("{}:{}/", self.host.target(), remote_parent.trim_end_matches('/')).into());
        args
    }

    fn ssh_args(&self, command: &RemoteCommand) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), self.host.key.clone().into()];
        args.extend(self.host.options.iter().map(OsString::from));
        args.push(self.host.target().into());
        args.push(command.render().into());
        args
    }
}

impl RemoteExecutor for OpenSshExecutor {
    #[instrument(skip(self), level = "debug")]
    fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> Result<()> {
        let args = self.scp_args(local_dir, remote_parent);
        info!("run {}", display_command(&self.scp, &args));
        let output = syscall_non_interactive(&self.scp, args, None)?;
        debug!("{output}");

        Ok(())
    }

    #[instrument(skip(self, command), level = "debug")]
    fn run_session(&self, command: &RemoteCommand) -> Result<String> {
        let args = self.ssh_args(command);
        info!("run {}", display_command(&self.ssh, &args));
        syscall_non_interactive(&self.ssh, args, None)
    }
}

/// Treat a local directory as the remote user's home directory.
///
/// Secure copy becomes a local mirror, and sessions run through `sh -c` with
/// the directory as working directory. Useful for rehearsing a rollout
/// without touching a real host.
#[derive(Debug, Clone)]
pub struct LocalShellExecutor {
    root: PathBuf,
}

impl LocalShellExecutor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl RemoteExecutor for LocalShellExecutor {
    #[instrument(skip(self), level = "debug")]
    fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> Result<()> {
        let name = local_dir.file_name().ok_or_else(|| ExecError::NotADirectory {
            path: local_dir.to_path_buf(),
        })?;
        let target = self.root.join(remote_parent).join(name);
        info!("copy {:?} to {:?}", local_dir.display(), target.display());
        mirror_tree(local_dir, target)?;

        Ok(())
    }

    #[instrument(skip(self, command), level = "debug")]
    fn run_session(&self, command: &RemoteCommand) -> Result<String> {
        let rendered = command.render();
        info!("run sh -c {:?} in {:?}", rendered, self.root.display());
        syscall_non_interactive("sh", ["-c", rendered.as_str()], Some(self.root.as_path()))
    }
}

/// Log every remote side effect without performing it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunExecutor;

impl RemoteExecutor for DryRunExecutor {
    fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> Result<()> {
        info!(
            "dry run: would copy {:?} into {remote_parent}/",
            local_dir.display()
        );
        Ok(())
    }

    fn run_session(&self, command: &RemoteCommand) -> Result<String> {
        info!("dry run: would run {command}");
        Ok(String::new())
    }
}

fn display_command(program: &OsStr, args: &[OsString]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(OsString::as_os_str))
        .map(|word| crate::deploy::command::quote(word.to_string_lossy().as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

fn syscall_non_interactive(
    cmd: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    current_dir: Option<&Path>,
) -> Result<String> {
    let mut command = Command::new(cmd.as_ref());
    command.args(args);
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }

    let output = command.output().map_err(|source| ExecError::Spawn {
        source,
        program: cmd.as_ref().to_string_lossy().into_owned(),
    })?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();
    let mut message = String::new();

    if !stdout.is_empty() {
        message.push_str(format!("stdout: {stdout}").as_str());
    }

    if !stderr.is_empty() {
        message.push_str(format!("stderr: {stderr}").as_str());
    }

    // INVARIANT: Chomp trailing newlines.
    let message = message
        .strip_suffix("\r\n")
        .or(message.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(message);

    if !output.status.success() {
        return Err(ExecError::Status {
            program: cmd.as_ref().to_string_lossy().into_owned(),
            status: output.status,
            message,
        });
    }

    Ok(message)
}

/// Remote execution error types.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// External program could not be started.
    #[error("failed to spawn {program:?}")]
    Spawn {
        #[source]
        source: std::io::Error,
        program: String,
    },

    /// External program exited unsuccessfully.
    #[error("command {program:?} failed ({status}):\n{message}")]
    Status {
        program: String,
        status: ExitStatus,
        message: String,
    },

    /// Staged path has no directory name to copy under.
    #[error("cannot copy {:?}, it does not name a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Local mirror standing in for secure copy failed.
    #[error(transparent)]
    Mirror(#[from] crate::sync::SyncError),
}

/// Friendly result alias :3
pub type Result<T, E = ExecError> = std::result::Result<T, E>;

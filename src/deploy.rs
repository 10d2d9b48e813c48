// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote rollout of a packaged server artifact.
//!
//! A __rollout__ replaces the server running on a remote host with a freshly
//! packaged artifact. Each rollout is namespaced by a random
//! [`DeploymentId`], which names the __deployment directory__ both locally
//! (`<artifact parent>/<id>/`) and remotely (`~/<remote base>/<id>/`).
//!
//! # Phases
//!
//! A rollout walks through the following phases strictly in order:
//!
//! 1. __Staged__: deployment directory created locally, artifact copied in.
//! 2. __Transferred__: deployment directory copied to remote base with scp.
//! 3. __RemoteCleaned__: one remote session kills the running server, deletes
//!    every file under remote base except the new deployment, and prunes
//!    directories left empty.
//! 4. __Started__: a second remote session launches the new artifact in the
//!    background with all output going to a log file in the new deployment
//!    directory.
//!
//! The launch runs in its own session so the local side can observe that the
//! command was submitted and return without waiting on the long-lived server.
//!
//! Any failure stops the rollout where it stands. Nothing is retried or rolled
//! back: a failed transfer leaves the staged directory behind, and a failed
//! remote step leaves whatever state the remote shell reached. Staging
//! failures happen before any network traffic, and transfer failures happen
//! before any remote mutation. Concurrent rollouts against the same remote
//! base are unsafe, no locking is performed.

pub mod command;
pub mod executor;
pub mod id;

use crate::deploy::{
    command::{CommandChain, Detached, Invocation, RemoteCommand},
    executor::{ExecError, OpenSshExecutor, RemoteExecutor},
    id::{DeploymentId, IdGenerator, RandomIds},
};

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

/// Rollout phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    Staged,
    Transferred,
    RemoteCleaned,
    Started,
    Done,
}

impl Display for Phase {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Idle => "idle",
            Self::Staged => "staged",
            Self::Transferred => "transferred",
            Self::RemoteCleaned => "remote cleaned",
            Self::Started => "started",
            Self::Done => "done",
        };
        fmt.write_str(name)
    }
}

/// Shape of the remote deployment root and the commands run against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    /// Deployment root, relative to remote home.
    pub remote_base: String,

    /// Process name terminated before cleanup.
    pub process_name: String,

    /// Program and leading arguments that launch the artifact.
    pub launch: Vec<String>,

    /// Log file name inside the deployment directory.
    pub log_file: String,

    /// Run remote commands through sudo.
    pub sudo: bool,
}

impl Default for RemoteLayout {
    fn default() -> Self {
        crate::config::DeploySettings::default().layout()
    }
}

impl RemoteLayout {
    /// Check that layout describes a safe deployment root and a usable launch.
    ///
    /// The remote base must be a plain relative path below the remote home,
    /// because cleanup deletes every file under it that lies outside the new
    /// deployment directory.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InvalidLayout`] if remote base is empty,
    ///   absolute, starts with `~`, or has empty, `.`, `..`, or glob segments.
    /// - Return [`DeployError::InvalidLayout`] if launch has no program.
    /// - Return [`DeployError::InvalidLayout`] if log file is not a plain file
    ///   name.
    pub fn validate(&self) -> Result<()> {
        let base = self.remote_base.trim_end_matches('/');
        let reason = if base.is_empty() {
            Some("must not be empty")
        } else if self.remote_base.starts_with('/') {
            Some("must be relative to remote home")
        } else if self.remote_base.starts_with('~') {
            Some("must not start with '~'")
        } else if base
            .split('/')
            .any(|segment| matches!(segment, "" | "." | ".."))
        {
            Some("must not contain empty, '.' or '..' segments")
        } else if base.contains(['*', '?', '[', ']', '\\']) {
            Some("must not contain glob characters")
        } else {
            None
        };
        if let Some(reason) = reason {
            return Err(invalid_layout("remote_base", &self.remote_base, reason));
        }

        if self.launch.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(invalid_layout(
                "launch",
                &format!("{:?}", self.launch),
                "must name a program",
            ));
        }

        if matches!(self.log_file.as_str(), "" | "." | "..") || self.log_file.contains('/') {
            return Err(invalid_layout(
                "log_file",
                &self.log_file,
                "must be a plain file name",
            ));
        }

        Ok(())
    }

    fn base(&self) -> String {
        format!("./{}", self.remote_base.trim_end_matches('/'))
    }

    /// Remote deployment directory for target identifier.
    pub fn deployment_dir(&self, id: DeploymentId) -> String {
        format!("{}/{id}", self.base())
    }

    /// Kill old server, delete everything but the new deployment, prune
    /// empty directories.
    ///
    /// Termination is joined with `;` so that a missing process never blocks
    /// deletion. Pruning is joined with `&&` so it only runs after deletion
    /// succeeded.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InvalidLayout`] if layout fails validation.
    pub fn cleanup_command(&self, id: DeploymentId) -> Result<CommandChain> {
        self.validate()?;

        let base = self.base();
        let terminate = Invocation::new("killall")
            .arg(&self.process_name)
            .sudo(self.sudo);
        let delete = Invocation::new("find")
            .args([base.as_str(), "-type", "f", "-not", "-path"])
            .arg(format!("{}/*", self.deployment_dir(id)))
            .arg("-delete")
            .sudo(self.sudo);
        let prune = Invocation::new("find")
            .args([base.as_str(), "-empty", "-type", "d", "-delete"])
            .sudo(self.sudo);

        Ok(CommandChain::new(terminate).then(delete).and_then(prune))
    }

    /// Launch artifact detached with every stream bound to the log file.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InvalidLayout`] if layout fails validation.
    pub fn launch_command(&self, id: DeploymentId, artifact_name: &str) -> Result<Detached> {
        self.validate()?;

        let Some((program, args)) = self.launch.split_first() else {
            return Err(invalid_layout("launch", "[]", "must name a program"));
        };
        let dir = self.deployment_dir(id);
        let invocation = Invocation::new(program)
            .args(args)
            .arg(format!("{dir}/{artifact_name}"))
            .sudo(self.sudo);

        Ok(Detached::new(invocation, format!("{dir}/{}", self.log_file)))
    }
}

fn invalid_layout(field: &'static str, value: &str, reason: &'static str) -> DeployError {
    DeployError::InvalidLayout {
        field,
        value: value.to_string(),
        reason,
    }
}

/// Everything a rollout will do, decided up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollout {
    /// Identifier namespacing this rollout.
    pub id: DeploymentId,

    /// Packaged artifact being shipped.
    pub artifact: PathBuf,

    /// Local deployment directory.
    pub local_dir: PathBuf,

    /// Artifact copy inside local deployment directory.
    pub staged_artifact: PathBuf,

    /// Remote parent directory the deployment directory is copied into.
    pub remote_base: String,

    /// Remote deployment directory.
    pub remote_dir: String,

    /// Remote log file of new server.
    pub log_file: String,

    /// First remote session.
    pub cleanup: RemoteCommand,

    /// Second remote session.
    pub launch: RemoteCommand,
}

/// Rollout driver.
///
/// Generic over the remote executor and the identifier source so that each
/// can be replaced in tests.
#[derive(Debug)]
pub struct Deployer<E = OpenSshExecutor, G = RandomIds>
where
    E: RemoteExecutor,
    G: IdGenerator,
{
    executor: E,
    ids: G,
    layout: RemoteLayout,
}

impl<E> Deployer<E, RandomIds>
where
    E: RemoteExecutor,
{
    /// Construct deployer drawing random identifiers.
    pub fn new(executor: E, layout: RemoteLayout) -> Self {
        Self::with_ids(executor, RandomIds, layout)
    }
}

impl<E, G> Deployer<E, G>
where
    E: RemoteExecutor,
    G: IdGenerator,
{
    /// Construct deployer with a custom identifier source.
    pub fn with_ids(executor: E, ids: G, layout: RemoteLayout) -> Self {
        Self {
            executor,
            ids,
            layout,
        }
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Decide every path and command of a rollout.
    ///
    /// Draws exactly one identifier. Nothing is touched, locally or remotely.
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::InvalidLayout`] if remote layout is unsafe.
    /// - Return [`DeployError::MissingArtifact`] if artifact is not a file.
    pub fn plan(&mut self, artifact: impl AsRef<Path>) -> Result<Rollout> {
        self.layout.validate()?;

        let artifact = artifact.as_ref();
        let (Some(parent), Some(name)) = (artifact.parent(), artifact.file_name()) else {
            return Err(DeployError::MissingArtifact {
                path: artifact.to_path_buf(),
            });
        };
        if !artifact.is_file() {
            return Err(DeployError::MissingArtifact {
                path: artifact.to_path_buf(),
            });
        }

        let id = self.ids.next_id();
        let local_dir = parent.join(id.to_string());
        let staged_artifact = local_dir.join(name);
        let name = name.to_string_lossy();
        let launch = self.layout.launch_command(id, name.as_ref())?;
        let cleanup = self.layout.cleanup_command(id)?;

        Ok(Rollout {
            id,
            artifact: artifact.to_path_buf(),
            staged_artifact,
            local_dir,
            remote_base: self.layout.remote_base.trim_end_matches('/').to_string(),
            remote_dir: self.layout.deployment_dir(id),
            log_file: launch.log().to_string(),
            cleanup: cleanup.into(),
            launch: launch.into(),
        })
    }

    /// Plan and execute rollout of artifact.
    pub fn deploy(&mut self, artifact: impl AsRef<Path>) -> Result<Rollout> {
        let rollout = self.plan(artifact)?;
        self.execute(&rollout, |_| {})?;

        Ok(rollout)
    }

    /// Execute planned rollout.
    ///
    /// Observer is told about every phase reached, in order, starting from
    /// [`Phase::Staged`].
    ///
    /// # Errors
    ///
    /// - Return [`DeployError::Stage`] if local staging fails.
    /// - Return [`DeployError::Transfer`] if secure copy fails.
    /// - Return [`DeployError::Cleanup`] if cleanup session fails.
    /// - Return [`DeployError::Launch`] if launch session fails.
    #[instrument(skip(self, rollout, observer), fields(id = %rollout.id), level = "debug")]
    pub fn execute(&self, rollout: &Rollout, mut observer: impl FnMut(Phase)) -> Result<()> {
        info!(
            "roll out {:?} with id {}",
            rollout.artifact.display(),
            rollout.id
        );

        stage(rollout)?;
        observer(Phase::Staged);

        self.executor
            .secure_copy(&rollout.local_dir, &rollout.remote_base)
            .map_err(|source| DeployError::Transfer {
                source,
                id: rollout.id,
            })?;
        info!("transferred {:?}", rollout.local_dir.display());
        observer(Phase::Transferred);

        let output = self
            .executor
            .run_session(&rollout.cleanup)
            .map_err(|source| DeployError::Cleanup {
                source,
                id: rollout.id,
            })?;
        log_output(&output);
        info!("remote cleanup done");
        observer(Phase::RemoteCleaned);

        let output = self
            .executor
            .run_session(&rollout.launch)
            .map_err(|source| DeployError::Launch {
                source,
                id: rollout.id,
            })?;
        log_output(&output);
        info!("server started, logging to {}", rollout.log_file);
        observer(Phase::Started);

        info!("rollout {} successful", rollout.id);
        observer(Phase::Done);

        Ok(())
    }
}

/// Create local deployment directory and copy artifact into it.
#[instrument(skip(rollout), level = "debug")]
fn stage(rollout: &Rollout) -> Result<()> {
    fs::create_dir_all(&rollout.local_dir).map_err(|source| DeployError::Stage {
        source,
        path: rollout.local_dir.clone(),
    })?;
    fs::copy(&rollout.artifact, &rollout.staged_artifact).map_err(|source| DeployError::Stage {
        source,
        path: rollout.staged_artifact.clone(),
    })?;
    info!("staged {:?}", rollout.staged_artifact.display());

    Ok(())
}

fn log_output(output: &str) {
    if !output.is_empty() {
        info!("{output}");
    }
}

/// Rollout error types.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// Remote layout would make cleanup or launch unsafe.
    #[error("invalid deploy.{field} {value:?}: {reason}")]
    InvalidLayout {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    /// Artifact to ship does not exist.
    #[error("server artifact {:?} is not a file", path.display())]
    MissingArtifact { path: PathBuf },

    /// Local staging failed, nothing was sent to remote host.
    #[error("failed to stage {:?}", path.display())]
    Stage {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Secure copy failed, remote host left unmodified.
    #[error("failed to transfer deployment {id}")]
    Transfer {
        #[source]
        source: ExecError,
        id: DeploymentId,
    },

    /// Cleanup session failed, remote state may be partially cleaned.
    #[error("failed to clean up remote host for deployment {id}")]
    Cleanup {
        #[source]
        source: ExecError,
        id: DeploymentId,
    },

    /// Launch session failed.
    #[error("failed to launch deployment {id}")]
    Launch {
        #[source]
        source: ExecError,
        id: DeploymentId,
    },
}

impl DeployError {
    /// Last phase reached before failure.
    pub fn phase(&self) -> Phase {
        match self {
            Self::InvalidLayout { .. } | Self::MissingArtifact { .. } | Self::Stage { .. } => {
                Phase::Idle
            }
            Self::Transfer { .. } => Phase::Staged,
            Self::Cleanup { .. } => Phase::Transferred,
            Self::Launch { .. } => Phase::RemoteCleaned,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Copy(PathBuf, String),
        Session(String),
    }

    #[derive(Debug, Default)]
    struct MockExecutor {
        calls: RefCell<Vec<Call>>,
        fail_copy: bool,
        fail_session: Option<usize>,
    }

    impl MockExecutor {
        fn sessions(&self) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|call| matches!(call, Call::Session(_)))
                .count()
        }
    }

    impl RemoteExecutor for MockExecutor {
        fn secure_copy(&self, local_dir: &Path, remote_parent: &str) -> executor::Result<()> {
            self.calls
                .borrow_mut()
                .push(Call::Copy(local_dir.to_path_buf(), remote_parent.into()));
            if self.fail_copy {
                return Err(ExecError::NotADirectory {
                    path: local_dir.to_path_buf(),
                });
            }

            Ok(())
        }

        fn run_session(&self, command: &RemoteCommand) -> executor::Result<String> {
            let index = self.sessions();
            self.calls
                .borrow_mut()
                .push(Call::Session(command.render()));
            if self.fail_session == Some(index) {
                return Err(ExecError::NotADirectory {
                    path: PathBuf::from("session"),
                });
            }

            Ok(String::new())
        }
    }

    fn fixed(id: u64) -> impl FnMut() -> u64 {
        move || id
    }

    fn layout() -> RemoteLayout {
        RemoteLayout {
            sudo: false,
            ..RemoteLayout::default()
        }
    }

    fn artifact(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("server.jar");
        fs::write(&path, b"PK\x03\x04 not really a jar").unwrap();
        path
    }

    #[test]
    fn cleanup_command_matches_short_circuit_layout() {
        let command = RemoteLayout::default()
            .cleanup_command(DeploymentId::new(42))
            .unwrap();

        assert_eq!(
            command.render(),
            "sudo killall java ; sudo find ./ac -type f -not -path './ac/42/*' -delete && sudo find ./ac -empty -type d -delete"
        );
    }

    #[test]
    fn launch_command_logs_into_deployment_directory() {
        let command = RemoteLayout::default()
            .launch_command(DeploymentId::new(42), "server.jar")
            .unwrap();

        assert_eq!(
            command.render(),
            "nohup sudo java -jar ./ac/42/server.jar >./ac/42/output.txt 2>./ac/42/output.txt <./ac/42/output.txt &"
        );
    }

    #[test]
    fn plan_draws_one_identifier_for_every_path() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let mut draws = 0;
        let ids = || -> u64 {
            draws += 1;
            42
        };
        let mut deployer = Deployer::with_ids(MockExecutor::default(), ids, layout());

        let rollout = deployer.plan(&artifact).unwrap();
        drop(deployer);

        assert_eq!(draws, 1);
        assert_eq!(rollout.local_dir, dir.path().join("42"));
        assert_eq!(rollout.staged_artifact, dir.path().join("42/server.jar"));
        assert_eq!(rollout.remote_dir, "./ac/42");
        assert_eq!(rollout.log_file, "./ac/42/output.txt");
        assert!(rollout.cleanup.render().contains("'./ac/42/*'"));
        assert!(rollout.launch.render().contains("./ac/42/server.jar"));
    }

    #[test]
    fn staging_copies_artifact_byte_for_byte() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let mut deployer = Deployer::with_ids(MockExecutor::default(), fixed(42), layout());

        deployer.deploy(&artifact).unwrap();

        let staged = dir.path().join("42").join("server.jar");
        assert_eq!(fs::read(staged).unwrap(), fs::read(&artifact).unwrap());
    }

    #[test]
    fn rollout_walks_phases_in_order() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let mut deployer = Deployer::with_ids(MockExecutor::default(), fixed(7), layout());

        let rollout = deployer.plan(&artifact).unwrap();
        let mut phases = vec![Phase::Idle];
        deployer.execute(&rollout, |phase| phases.push(phase)).unwrap();

        assert_eq!(
            phases,
            vec![
                Phase::Idle,
                Phase::Staged,
                Phase::Transferred,
                Phase::RemoteCleaned,
                Phase::Started,
                Phase::Done,
            ]
        );
        assert_eq!(
            *deployer.executor().calls.borrow(),
            vec![
                Call::Copy(dir.path().join("7"), "ac".into()),
                Call::Session(rollout.cleanup.render()),
                Call::Session(rollout.launch.render()),
            ]
        );
    }

    #[test]
    fn failed_transfer_opens_no_remote_session() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let executor = MockExecutor {
            fail_copy: true,
            ..MockExecutor::default()
        };
        let mut deployer = Deployer::with_ids(executor, fixed(7), layout());

        let error = deployer.deploy(&artifact).unwrap_err();

        assert!(matches!(error, DeployError::Transfer { .. }));
        assert_eq!(error.phase(), Phase::Staged);
        assert_eq!(deployer.executor().sessions(), 0);
        assert!(dir.path().join("7/server.jar").exists());
    }

    #[test]
    fn failed_cleanup_never_launches() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let executor = MockExecutor {
            fail_session: Some(0),
            ..MockExecutor::default()
        };
        let mut deployer = Deployer::with_ids(executor, fixed(7), layout());

        let error = deployer.deploy(&artifact).unwrap_err();

        assert!(matches!(error, DeployError::Cleanup { .. }));
        assert_eq!(error.phase(), Phase::Transferred);
        assert_eq!(deployer.executor().sessions(), 1);
    }

    #[test]
    fn failed_launch_reports_remote_cleaned() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let executor = MockExecutor {
            fail_session: Some(1),
            ..MockExecutor::default()
        };
        let mut deployer = Deployer::with_ids(executor, fixed(7), layout());

        let rollout = deployer.plan(&artifact).unwrap();
        let mut phases = Vec::new();
        let error = deployer
            .execute(&rollout, |phase| phases.push(phase))
            .unwrap_err();

        assert!(matches!(error, DeployError::Launch { .. }));
        assert_eq!(error.phase(), Phase::RemoteCleaned);
        assert_eq!(
            phases,
            vec![Phase::Staged, Phase::Transferred, Phase::RemoteCleaned]
        );
        assert_eq!(deployer.executor().sessions(), 2);
    }

    #[test]
    fn trailing_slash_on_remote_base_is_ignored() {
        let layout = RemoteLayout {
            remote_base: "apps/ac/".into(),
            ..layout()
        };

        layout.validate().unwrap();
        assert_eq!(layout.deployment_dir(DeploymentId::new(3)), "./apps/ac/3");
    }

    #[test_case(""; "empty")]
    #[test_case("/"; "root")]
    #[test_case("/srv/ac"; "absolute")]
    #[test_case("~/ac"; "tilde")]
    #[test_case("."; "current directory")]
    #[test_case("ac/../.."; "parent directory")]
    #[test_case("ac//42"; "empty segment")]
    #[test_case("a*"; "glob")]
    #[test]
    fn unsafe_remote_base_fails_before_any_side_effect(remote_base: &str) {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let mut draws = 0;
        let ids = || -> u64 {
            draws += 1;
            2
        };
        let layout = RemoteLayout {
            remote_base: remote_base.into(),
            ..layout()
        };
        let mut deployer = Deployer::with_ids(MockExecutor::default(), ids, layout);

        let error = deployer.deploy(&artifact).unwrap_err();
        let calls = deployer.executor().calls.borrow().len();
        drop(deployer);

        assert!(matches!(
            error,
            DeployError::InvalidLayout {
                field: "remote_base",
                ..
            }
        ));
        pretty_assertions::assert_eq!(error.phase(), Phase::Idle);
        pretty_assertions::assert_eq!(calls, 0);
        pretty_assertions::assert_eq!(draws, 0);
        assert!(!dir.path().join("2").exists());
    }

    #[test]
    fn empty_launch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let artifact = artifact(&dir);
        let layout = RemoteLayout {
            launch: Vec::new(),
            ..layout()
        };

        let result = layout.launch_command(DeploymentId::new(7), "server.jar");
        assert!(matches!(
            result,
            Err(DeployError::InvalidLayout { field: "launch", .. })
        ));

        let mut deployer = Deployer::with_ids(MockExecutor::default(), fixed(7), layout);
        let error = deployer.deploy(&artifact).unwrap_err();
        assert!(matches!(error, DeployError::InvalidLayout { field: "launch", .. }));
        assert_eq!(deployer.executor().calls.borrow().len(), 0);
    }

    #[test]
    fn missing_artifact_fails_before_any_side_effect() {
        let dir = TempDir::new().unwrap();
        let mut draws = 0;
        let ids = || -> u64 {
            draws += 1;
            7
        };
        let mut deployer = Deployer::with_ids(MockExecutor::default(), ids, layout());

        let error = deployer.plan(dir.path().join("server.jar")).unwrap_err();
        let calls = deployer.executor().calls.borrow().len();
        drop(deployer);

        assert!(matches!(error, DeployError::MissingArtifact { .. }));
        assert_eq!(calls, 0);
        assert_eq!(draws, 0);
        assert!(!dir.path().join("7").exists());
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Ship a client/server application to a remote host.
//!
//! Hoist covers the two steps that sit between building an application and
//! having it run on a remote machine:
//!
//! 1. [`sync`]: mirror the client build output into the server's static
//!    resources before the server bundle is packaged.
//! 2. [`deploy`]: stage the packaged server artifact under a random
//!    deployment identifier, copy it to the remote host, retire the previous
//!    deployment, and start the new one in the background.
//!
//! Building and packaging the artifact is left to whatever build tool the
//! project already uses.

pub mod config;
pub mod deploy;
pub mod path;
pub mod sync;

pub use config::{DeploySettings, HoistConfig, RemoteHost, SyncSettings};
pub use deploy::{
    command::{CommandChain, Detached, Invocation, RemoteCommand},
    executor::{DryRunExecutor, LocalShellExecutor, OpenSshExecutor, RemoteExecutor},
    id::{DeploymentId, IdGenerator, RandomIds},
    Deployer, Phase, RemoteLayout, Rollout,
};
pub use sync::{ResourceSync, SyncReport};

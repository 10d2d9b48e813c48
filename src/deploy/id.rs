// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment identifiers.
//!
//! Every rollout namespaces its files under a directory named after a random
//! non-negative integer. The identifier is drawn once per rollout and reused
//! for the local staging directory, the remote deployment directory, and the
//! cleanup exclusion filter.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::ParseIntError,
    str::FromStr,
};

/// Random identifier namespacing one deployment.
///
/// Always fits in 63 bits, so it prints the same way a signed 64-bit
/// absolute value would.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeploymentId(u64);

impl DeploymentId {
    /// Largest identifier that can be produced.
    pub const MAX: u64 = i64::MAX as u64;

    /// Construct identifier, masking off the sign bit.
    pub fn new(value: u64) -> Self {
        Self(value & Self::MAX)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl Display for DeploymentId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "{}", self.0)
    }
}

impl FromStr for DeploymentId {
    type Err = ParseIntError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        data.parse::<u64>().map(Self::new)
    }
}

/// Source of deployment identifiers.
pub trait IdGenerator {
    /// Produce next identifier.
    fn next_id(&mut self) -> DeploymentId;
}

/// Draw identifiers from the thread-local random number generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn next_id(&mut self) -> DeploymentId {
        DeploymentId::new(rand::random::<u64>())
    }
}

impl<F> IdGenerator for F
where
    F: FnMut() -> u64,
{
    fn next_id(&mut self) -> DeploymentId {
        DeploymentId::new(self())
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Structured remote commands.
//!
//! Remote sessions ultimately receive a single shell string. Instead of
//! interpolating that string by hand, Hoist assembles commands out of
//! [`Invocation`]s (program plus argument list) and only renders them at the
//! last moment. Every argument is quoted as needed during rendering, so paths
//! and patterns never need manual escaping.
//!
//! # Chains
//!
//! A [`CommandChain`] joins invocations with POSIX list operators. The
//! cleanup step depends on the exact short-circuit behaviour of these
//! operators: process termination is joined with `;` so that its failure
//! (e.g., no such process on a first deploy) never blocks deletion, while
//! pruning empty directories is joined with `&&` so it only runs after
//! deletion succeeded. [`CommandChain::evaluate`] applies the same semantics
//! to an arbitrary step runner.

use std::fmt::{Display, Formatter, Result as FmtResult};

/// Program plus argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: String,
    args: Vec<String>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix invocation with sudo when `enabled` is set.
    pub fn sudo(self, enabled: bool) -> Self {
        if !enabled {
            return self;
        }

        let mut args = Vec::with_capacity(self.args.len() + 1);
        args.push(self.program);
        args.extend(self.args);
        Self {
            program: "sudo".into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Render as shell words.
    pub fn render(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|word| quote(word))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Display for Invocation {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.render().as_str())
    }
}

/// POSIX list operator joining two invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    /// Run next invocation regardless of previous exit status (`;`).
    Always,

    /// Run next invocation only if previous one succeeded (`&&`).
    OnSuccess,
}

impl Connector {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Always => ";",
            Self::OnSuccess => "&&",
        }
    }
}

/// Invocations joined by list operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandChain {
    head: Invocation,
    tail: Vec<(Connector, Invocation)>,
}

impl CommandChain {
    pub fn new(head: Invocation) -> Self {
        Self {
            head,
            tail: Vec::new(),
        }
    }

    /// Append invocation joined with `;`.
    pub fn then(mut self, next: Invocation) -> Self {
        self.tail.push((Connector::Always, next));
        self
    }

    /// Append invocation joined with `&&`.
    pub fn and_then(mut self, next: Invocation) -> Self {
        self.tail.push((Connector::OnSuccess, next));
        self
    }

    /// All invocations in order, regardless of connector.
    pub fn invocations(&self) -> impl Iterator<Item = &Invocation> {
        std::iter::once(&self.head).chain(self.tail.iter().map(|(_, invocation)| invocation))
    }

    /// Evaluate chain against a step runner.
    ///
    /// The runner receives each invocation that the shell would actually
    /// execute and reports whether it succeeded. Returns the exit status of
    /// the chain as a whole, which is the status of the last executed step.
    pub fn evaluate(&self, mut run: impl FnMut(&Invocation) -> bool) -> bool {
        let mut status = run(&self.head);
        for (connector, invocation) in &self.tail {
            match connector {
                Connector::Always => status = run(invocation),
                Connector::OnSuccess if status => status = run(invocation),
                Connector::OnSuccess => continue,
            }
        }

        status
    }

    pub fn render(&self) -> String {
        let mut rendered = self.head.render();
        for (connector, invocation) in &self.tail {
            rendered.push(' ');
            rendered.push_str(connector.as_str());
            rendered.push(' ');
            rendered.push_str(invocation.render().as_str());
        }

        rendered
    }
}

/// Background invocation with every standard stream bound to one log file.
///
/// All three streams must be redirected, otherwise the remote session stays
/// attached to the long-lived process and never returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detached {
    invocation: Invocation,
    log: String,
}

impl Detached {
    pub fn new(invocation: Invocation, log: impl Into<String>) -> Self {
        Self {
            invocation,
            log: log.into(),
        }
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn render(&self) -> String {
        let log = quote(&self.log);
        format!(
            "nohup {} >{log} 2>{log} <{log} &",
            self.invocation.render()
        )
    }
}

/// Command handed to a single remote session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    Chain(CommandChain),
    Detached(Detached),
}

impl RemoteCommand {
    pub fn render(&self) -> String {
        match self {
            Self::Chain(chain) => chain.render(),
            Self::Detached(detached) => detached.render(),
        }
    }
}

impl Display for RemoteCommand {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.render().as_str())
    }
}

impl From<CommandChain> for RemoteCommand {
    fn from(chain: CommandChain) -> Self {
        Self::Chain(chain)
    }
}

impl From<Detached> for RemoteCommand {
    fn from(detached: Detached) -> Self {
        Self::Detached(detached)
    }
}

/// Quote word for a POSIX shell.
///
/// Words made only of characters that the shell never interprets are left
/// as-is to keep logged commands readable.
pub fn quote(word: &str) -> String {
    let is_plain = !word.is_empty()
        && word.chars().all(|c| {
            c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '%' | '+' | '=' | ',')
        });

    if is_plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case("server.jar", "server.jar"; "plain word")]
    #[test_case("./ac/42/*", "'./ac/42/*'"; "glob pattern")]
    #[test_case("it's", "'it'\\''s'"; "embedded quote")]
    #[test_case("two words", "'two words'"; "whitespace")]
    #[test_case("", "''"; "empty word")]
    #[test_case("~/ac", "'~/ac'"; "tilde is not expanded")]
    #[test]
    fn quote_words(word: &str, expect: &str) {
        pretty_assertions::assert_eq!(quote(word), expect);
    }

    #[test]
    fn sudo_prefixes_program() {
        let invocation = Invocation::new("killall").arg("java").sudo(true);
        assert_eq!(invocation.program(), "sudo");
        assert_eq!(invocation.render(), "sudo killall java");

        let invocation = Invocation::new("killall").arg("java").sudo(false);
        assert_eq!(invocation.render(), "killall java");
    }

    #[test]
    fn chain_renders_list_operators() {
        let chain = CommandChain::new(Invocation::new("killall").arg("java"))
            .then(Invocation::new("find").args(["./ac", "-type", "f", "-delete"]))
            .and_then(Invocation::new("find").args(["./ac", "-empty", "-type", "d", "-delete"]));

        assert_eq!(
            chain.render(),
            "killall java ; find ./ac -type f -delete && find ./ac -empty -type d -delete"
        );
    }

    #[test]
    fn failed_step_before_semicolon_does_not_block_next_step() {
        let chain = CommandChain::new(Invocation::new("kill"))
            .then(Invocation::new("delete"))
            .and_then(Invocation::new("prune"));

        let mut executed = Vec::new();
        let status = chain.evaluate(|invocation| {
            executed.push(invocation.program().to_string());
            invocation.program() != "kill"
        });

        assert!(status);
        assert_eq!(executed, vec!["kill", "delete", "prune"]);
    }

    #[test]
    fn failed_step_before_and_skips_next_step() {
        let chain = CommandChain::new(Invocation::new("kill"))
            .then(Invocation::new("delete"))
            .and_then(Invocation::new("prune"));

        let mut executed = Vec::new();
        let status = chain.evaluate(|invocation| {
            executed.push(invocation.program().to_string());
            invocation.program() != "delete"
        });

        assert!(!status);
        assert_eq!(executed, vec!["kill", "delete"]);
    }

    #[test]
    fn detached_redirects_every_stream_to_log() {
        let detached = Detached::new(
            Invocation::new("java").args(["-jar", "./ac/42/server.jar"]),
            "./ac/42/output.txt",
        );

        assert_eq!(
            detached.render(),
            "nohup java -jar ./ac/42/server.jar >./ac/42/output.txt 2>./ac/42/output.txt <./ac/42/output.txt &"
        );
    }
}

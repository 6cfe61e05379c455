//! Reports the outcome of each session to the operator.
//!
//! As in the rest of this crate, the logic lives in testable functions that take generic writers.
//! The production [Reporter] locks stdout or stderr just long enough to write one report, so that
//! a report is never interleaved with log output or with another report.

use crate::error::Error;
use async_trait::async_trait;
use std::io::{self, Write};
use std::time::Duration;
use tokio::task;

/// Where a batch writes its reports.
#[async_trait]
pub trait Report: Send {
    async fn stdout(&mut self, text: &str) -> io::Result<()>;

    async fn stderr(&mut self, text: &str) -> io::Result<()>;
}

/// The real, production-ready [Report] implementation. Uses the real stdout/stderr.
#[derive(Clone, Debug, Default)]
pub struct Reporter;

#[async_trait]
impl Report for Reporter {
    async fn stdout(&mut self, text: &str) -> io::Result<()> {
        // We do not use Tokio's async IO, which provides no locking mechanisms.
        let mut stdout = io::stdout().lock();
        task::block_in_place(move || _write(&mut stdout, text))
    }

    async fn stderr(&mut self, text: &str) -> io::Result<()> {
        let mut stderr = io::stderr().lock();
        task::block_in_place(move || _write(&mut stderr, text))
    }
}

/// A [Report] that keeps everything in memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Captured {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[async_trait]
impl Report for Captured {
    async fn stdout(&mut self, text: &str) -> io::Result<()> {
        _write(&mut self.stdout, text)
    }

    async fn stderr(&mut self, text: &str) -> io::Result<()> {
        _write(&mut self.stderr, text)
    }
}

/// A testable method containing the logic for writing one report.
pub fn _write(mut writer: impl Write, text: &str) -> io::Result<()> {
    writer.write_all(text.as_bytes())?;
    writer.flush()
}

/// Values substituted into an [OutputFormat].
#[derive(Clone, Copy, Debug)]
pub struct Fields<'a> {
    pub user: &'a str,
    pub host: &'a str,
    pub command: &'a str,
    pub output: &'a str,
}

impl<'a> Fields<'a> {
    fn get(&self, name: &str) -> Option<&'a str> {
        match name {
            "user" => Some(self.user),
            "host" => Some(self.host),
            "command" => Some(self.command),
            "output" => Some(self.output),
            _ => None,
        }
    }
}

/// A per-host report template.
///
/// `${user}`, `${host}`, `${command}` and `${output}` are replaced with their values. Any other
/// `${...}` is kept as written. The two characters `\n` become a newline, while `\\n` is kept as
/// written. Substituted values are inserted verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    template: String,
}

impl OutputFormat {
    pub fn new(template: impl Into<String>) -> Self {
        OutputFormat {
            template: template.into(),
        }
    }

    pub fn render(&self, fields: &Fields) -> String {
        let mut rendered = String::with_capacity(self.template.len() + fields.output.len());
        let mut rest = self.template.as_str();

        while let Some(at) = rest.find(['\\', '$']) {
            rendered.push_str(&rest[..at]);
            rest = &rest[at..];

            if let Some(after) = rest.strip_prefix("\\\\") {
                rendered.push_str("\\\\");
                rest = after;
            } else if let Some(after) = rest.strip_prefix("\\n") {
                rendered.push('\n');
                rest = after;
            } else if let Some((value, after)) = substitution(rest, fields) {
                rendered.push_str(value);
                rest = after;
            } else {
                // A lone backslash or dollar sign.
                rendered.push_str(&rest[..1]);
                rest = &rest[1..];
            }
        }
        rendered.push_str(rest);
        rendered
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::new(crate::config::DEFAULT_OUTPUT_FORMAT)
    }
}

// If `text` starts with a known `${name}`, returns its value and the text after it.
fn substitution<'a, 'f>(text: &'a str, fields: &Fields<'f>) -> Option<(&'f str, &'a str)> {
    let inner = text.strip_prefix("${")?;
    let end = inner.find('}')?;
    let value = fields.get(&inner[..end])?;
    Some((value, &inner[end + 1..]))
}

/// Why a session counts as failed, for the line appended to its report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    Status(i32),
    TimedOut(Duration),

    /// The session ended without an exit status.
    Broken,
}

/// The annotation appended to a failed command's report.
pub fn command_failure(failure: Failure) -> String {
    match failure {
        Failure::Status(status) => format!("[error] Command failed ! (status = {status})"),
        Failure::TimedOut(after) => {
            format!("[error] Command timed out ! (after {} seconds)", after.as_secs())
        }
        Failure::Broken => "[error] Command failed ! (no exit status)".to_string(),
    }
}

/// The annotation appended to a failed transfer's report.
pub fn mirror_failure(failure: Failure) -> String {
    match failure {
        Failure::Status(status) => format!("[error] rsync failed ! (status = {status})"),
        Failure::TimedOut(after) => {
            format!("[error] rsync timed out ! (after {} seconds)", after.as_secs())
        }
        Failure::Broken => "[error] rsync failed ! (no exit status)".to_string(),
    }
}

/// The line printed when the first failure ends a batch.
pub fn fail_fast(err: &Error) -> String {
    match err {
        Error::RemoteCommandFailure { host, command, .. } => {
            format!("[error] Command \"{command}\" failed on host \"{host}\"\n")
        }
        Error::SessionTimeout { host, command, .. } => {
            format!("[error] Command \"{command}\" timed out on host \"{host}\"\n")
        }
        err => format!("[error] {err}\n"),
    }
}

/// The block printed after a sweep in which some hosts failed.
pub fn summary(label: &str, hosts: &[String]) -> String {
    let mut text = format!("[error] {label} failed on following hosts");
    for host in hosts {
        text.push_str("\n  ");
        text.push_str(host);
    }
    text.push('\n');
    text
}

#[cfg(test)]
mod test;

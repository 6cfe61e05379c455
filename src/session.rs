//! Drives one interactive `ssh` or `rsync` invocation from spawn to exit status.
//!
//! The transport process runs on a pseudo-terminal so that it asks for passwords the same way it
//! would ask a person. A [Session] reads what the process prints, answers the prompts listed in
//! its [PromptTable] and stops at end of stream or when its deadline passes.
//!
//! # Exit status
//!
//! `ssh` does not reliably distinguish its own failures from the remote command's. For
//! [Invocation::Remote], the remote shell therefore prints a sentinel line carrying `$?` after the
//! user's command. The session parses that line and strips it from the captured output. If the
//! stream ends without a sentinel (e.g. `ssh` could not connect), the transport's own exit status
//! is reported instead.
//!
//! # States
//!
//! ```text
//! AwaitingPrompt --prompt--> Authenticated --prompt--> Authenticated
//!       |                          |
//!       +-------- end of stream ---+--> Done
//!       +-------- deadline --------+--> TimedOut
//!       +-------- read error ------+--> StreamClosed
//! ```

use crate::core::{Credentials, Secret};
use async_trait::async_trait;
use regex::bytes::Regex;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{self, Instant};

pub mod pty;

pub use pty::PtyTransport;

/// Marks the line carrying the remote exit status.
pub const SENTINEL: &str = "__VOLLEY_EXIT_STATUS__=";

/// How much to read from the transport at a time.
const READ_CHUNK: usize = 4096;

/// Prompts are only looked for in this many trailing bytes of output.
const PROMPT_WINDOW: usize = 1024;

/// A fully composed command line, ready to be spawned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invocation {
    /// Runs `command` on a remote host through `program` (normally `ssh`).
    ///
    /// `args` hold everything up to and including the host. The remote script, with its exit
    /// status sentinel, is appended by [Invocation::argv].
    Remote {
        program: String,
        args: Vec<String>,
        command: String,
    },

    /// Runs a local program (normally `rsync`) whose own exit status is the result.
    Local { program: String, args: Vec<String> },
}

impl Invocation {
    /// The argument vector to spawn.
    pub fn argv(&self) -> io::Result<Vec<String>> {
        let (program, args) = match self {
            Invocation::Remote { program, args, .. } | Invocation::Local { program, args } => {
                (program, args)
            }
        };
        let mut argv = Vec::with_capacity(args.len() + 2);
        argv.push(program.clone());
        argv.extend(args.iter().cloned());
        if let Invocation::Remote { command, .. } = self {
            argv.push(remote_script(command)?);
        }
        Ok(argv)
    }

    /// Whether the output ends with a [SENTINEL] line.
    pub fn has_sentinel(&self) -> bool {
        matches!(self, Invocation::Remote { .. })
    }

    /// The command line as an operator would type it.
    pub fn display(&self) -> String {
        match self.argv() {
            Ok(argv) => shlex::try_join(argv.iter().map(String::as_str))
                .unwrap_or_else(|_| argv.join(" ")),
            Err(_) => format!("{self:?}"),
        }
    }
}

/// Wraps `command` so that the remote shell runs it under `/bin/sh -c` and then reports `$?`.
///
/// Quoting the command as a single word keeps pipes, redirections and backslashes intact.
pub fn remote_script(command: &str) -> io::Result<String> {
    let quoted = shlex::try_quote(command)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err.to_string()))?;
    Ok(format!("/bin/sh -c {quoted}; printf '\\n{SENTINEL}%d\\n' \"$?\""))
}

/// What a finished session produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome {
    /// The remote command's exit status, or the local transport's.
    pub status: i32,

    /// Everything the command printed, without prompts, sentinel, or trailing newlines.
    pub output: String,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Ways a session can end without an [Outcome].
#[derive(Debug, Error)]
pub enum SessionError {
    /// Nothing terminal happened before the deadline.
    #[error("session timed out")]
    Timeout,

    /// The transport went away without reporting a status.
    #[error("stream closed unexpectedly")]
    StreamClosed,

    /// The worker running the session was lost before returning.
    #[error("worker stopped before returning a result")]
    WorkerLost,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The byte stream a [Session] talks to, plus control of the process behind it.
#[async_trait]
pub trait Transport: Send {
    /// Reads whatever is available. `Ok(0)` means end of stream.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Waits for the process to exit. `None` if it was killed by a signal.
    async fn wait(&mut self) -> io::Result<Option<i32>>;

    async fn kill(&mut self) -> io::Result<()>;
}

/// The states of a [Session].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    AwaitingPrompt,
    Authenticated,
    Done,
    TimedOut,
    StreamClosed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Done | State::TimedOut | State::StreamClosed)
    }
}

/// Conditions a [Session] reacts to.
#[derive(Clone, Debug)]
pub enum Trigger {
    /// Text at the very end of the stream matches.
    Pattern(Regex),

    /// The stream ended.
    EndOfStream,

    /// The deadline passed.
    Deadline,
}

/// What a [Session] does when a [Trigger] fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    SendLogin,
    SendElevation,
    Finish,
    Abort,
}

/// Applies `step` to `state`.
pub fn transition(state: State, step: Step) -> State {
    match (state, step) {
        (state, _) if state.is_terminal() => state,
        (_, Step::SendLogin | Step::SendElevation) => State::Authenticated,
        (_, Step::Finish) => State::Done,
        (_, Step::Abort) => State::TimedOut,
    }
}

/// Ordered `(trigger, step)` pairs. Earlier entries win when several patterns match.
#[derive(Clone, Debug)]
pub struct PromptTable {
    entries: Vec<(Trigger, Step)>,
}

impl PromptTable {
    pub fn new(entries: Vec<(Trigger, Step)>) -> Self {
        PromptTable { entries }
    }

    /// Finds the first pattern matching at the end of `tail`.
    ///
    /// Returns the byte range of the prompt within `tail` and the step to take.
    pub fn match_prompt(&self, tail: &[u8]) -> Option<(usize, usize, Step)> {
        self.entries.iter().find_map(|(trigger, step)| match trigger {
            Trigger::Pattern(regex) => regex.find(tail).map(|m| (m.start(), m.end(), *step)),
            _ => None,
        })
    }

    /// The step for a non-pattern trigger.
    fn step_for(&self, wanted: &Trigger) -> Option<Step> {
        self.entries.iter().find_map(|(trigger, step)| match (trigger, wanted) {
            (Trigger::EndOfStream, Trigger::EndOfStream) => Some(*step),
            (Trigger::Deadline, Trigger::Deadline) => Some(*step),
            _ => None,
        })
    }
}

impl Default for PromptTable {
    /// `sudo` prompts, then `ssh`/`rsync` password and passphrase prompts, then end of stream and
    /// the deadline.
    fn default() -> Self {
        let pattern = |re: &str| match Regex::new(re) {
            Ok(regex) => Trigger::Pattern(regex),
            Err(err) => panic!("invalid built-in prompt pattern {re:?}: {err}"),
        };
        PromptTable::new(vec![
            (pattern(r"(?i)[^\n]*\[sudo\] password for [^\n]*:[ \t]*$"), Step::SendElevation),
            (pattern(r"(?i)[^\n]*(?:password|passphrase)[^\n]*:[ \t]*$"), Step::SendLogin),
            (Trigger::EndOfStream, Step::Finish),
            (Trigger::Deadline, Step::Abort),
        ])
    }
}

/// One run of the automaton.
#[derive(Debug)]
pub struct Session<'a> {
    table: &'a PromptTable,
    credentials: &'a Credentials,
    timeout: Duration,
    sentinel: bool,
    state: State,

    /// Everything read so far, minus answered prompts.
    buffer: Vec<u8>,

    /// Where unanswered text starts in `buffer`.
    scan_from: usize,

    /// Set right after answering a prompt; the transport's newline echo starts here.
    echo_at: Option<usize>,
}

impl<'a> Session<'a> {
    pub fn new(
        table: &'a PromptTable,
        credentials: &'a Credentials,
        timeout: Duration,
        sentinel: bool,
    ) -> Self {
        Session {
            table,
            credentials,
            timeout,
            sentinel,
            state: State::AwaitingPrompt,
            buffer: vec![],
            scan_from: 0,
            echo_at: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Runs the session against `transport` until a terminal state.
    ///
    /// On timeout the transport is killed before returning.
    pub async fn drive<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
    ) -> Result<Outcome, SessionError> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = vec![0; READ_CHUNK];

        loop {
            let read = time::timeout_at(deadline, transport.read(&mut chunk)).await;
            let step = match read {
                Err(_elapsed) => self.table.step_for(&Trigger::Deadline).unwrap_or(Step::Abort),
                Ok(Err(err)) => {
                    tracing::debug!("transport read failed: {err}");
                    self.state = State::StreamClosed;
                    let _ = transport.kill().await;
                    return Err(SessionError::StreamClosed);
                }
                Ok(Ok(0)) => self.table.step_for(&Trigger::EndOfStream).unwrap_or(Step::Finish),
                Ok(Ok(n)) => {
                    self.append(&chunk[..n]);
                    match self.next_prompt() {
                        Some(step) => step,
                        None => continue,
                    }
                }
            };

            let previous = self.state;
            self.state = transition(self.state, step);
            tracing::debug!(from = ?previous, to = ?self.state, ?step, "session transition");

            match step {
                Step::SendLogin => {
                    let credentials = self.credentials;
                    let secret = credentials.login.as_ref().map(Secret::expose);
                    self.answer(transport, secret).await?;
                }
                Step::SendElevation => {
                    let credentials = self.credentials;
                    let secret = credentials.elevation.as_ref().map(Secret::expose);
                    self.answer(transport, secret).await?;
                }
                Step::Abort => {
                    let _ = transport.kill().await;
                    return Err(SessionError::Timeout);
                }
                Step::Finish => {
                    let status = match time::timeout_at(deadline, transport.wait()).await {
                        Ok(status) => status?,
                        Err(_elapsed) => {
                            self.state = State::TimedOut;
                            let _ = transport.kill().await;
                            return Err(SessionError::Timeout);
                        }
                    };
                    return self.finish(status);
                }
            }
        }
    }

    fn append(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        // Drop the line break the transport prints after reading a password.
        if let Some(at) = self.echo_at {
            let rest = &self.buffer[at..];
            if rest.starts_with(b"\r\n") {
                self.buffer.drain(at..at + 2);
                self.echo_at = None;
            } else if rest.starts_with(b"\n") {
                self.buffer.drain(at..at + 1);
                self.echo_at = None;
            } else if !rest.is_empty() && rest != b"\r" {
                self.echo_at = None;
            }
        }
    }

    /// Checks the unanswered tail for a prompt, removing the prompt text if one matched.
    fn next_prompt(&mut self) -> Option<Step> {
        let from = self.scan_from.max(self.buffer.len().saturating_sub(PROMPT_WINDOW));
        let (start, end, step) = self.table.match_prompt(&self.buffer[from..])?;
        let (start, end) = (from + start, from + end);
        self.buffer.drain(start..end);
        self.scan_from = start;
        Some(step)
    }

    async fn answer<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        secret: Option<&str>,
    ) -> Result<(), SessionError> {
        if secret.is_none() {
            tracing::debug!("prompted for a password that was not provided; sending empty line");
        }
        let mut line = secret.unwrap_or("").as_bytes().to_vec();
        line.push(b'\n');
        let written = transport.write_all(&line).await;
        zeroize::Zeroize::zeroize(&mut line);
        written?;
        self.echo_at = Some(self.scan_from);
        Ok(())
    }

    fn finish(&mut self, process_status: Option<i32>) -> Result<Outcome, SessionError> {
        let text = String::from_utf8_lossy(&self.buffer).replace("\r\n", "\n");

        if self.sentinel {
            if let Some((output, status)) = strip_sentinel(&text) {
                return Ok(Outcome { status, output });
            }
        }

        match process_status {
            Some(status) => Ok(Outcome {
                status,
                output: text.trim_end_matches('\n').to_string(),
            }),
            None => {
                self.state = State::StreamClosed;
                Err(SessionError::StreamClosed)
            }
        }
    }
}

/// Splits the last [SENTINEL] line off `text`.
///
/// Returns the remaining output, with trailing newlines trimmed, and the status the sentinel
/// carried. Returns `None` if there is no well-formed sentinel line.
pub fn strip_sentinel(text: &str) -> Option<(String, i32)> {
    let mut search_end = text.len();
    while let Some(at) = text[..search_end].rfind(SENTINEL) {
        search_end = at;
        if at > 0 && !text[..at].ends_with('\n') {
            continue;
        }

        let after = &text[at + SENTINEL.len()..];
        let line_end = after.find('\n').unwrap_or(after.len());
        let Ok(status) = after[..line_end].trim_end_matches('\r').parse::<i32>() else {
            continue;
        };

        let mut output = text[..at].to_string();
        output.push_str(after.get(line_end + 1..).unwrap_or(""));
        let trimmed = output.trim_end_matches('\n').len();
        output.truncate(trimmed);
        return Some((output, status));
    }
    None
}

/// Spawns `invocation` on a pseudo-terminal and drives it with the default [PromptTable].
pub async fn execute(
    invocation: &Invocation,
    credentials: &Credentials,
    timeout: Duration,
) -> Result<Outcome, SessionError> {
    let argv = invocation.argv()?;
    tracing::debug!(command = %invocation.display(), "spawning transport");
    let mut transport = PtyTransport::spawn(&argv)?;
    let table = PromptTable::default();
    Session::new(&table, credentials, timeout, invocation.has_sentinel())
        .drive(&mut transport)
        .await
}

#[cfg(test)]
mod test;

//! Fans one request out across a list of hosts.
//!
//! Hosts are visited in waves of [Batch::parallel] hosts. Within a wave every host runs at once,
//! each working through its own commands in order, while reports are written strictly in host-list
//! order. Unless `continue_on_error` is set, the first failure reported ends the batch: later
//! waves are never contacted and whatever is still running is cancelled.

use crate::config::Options;
use crate::core::credentials::{AskPassword, Terminal};
use crate::core::{action, Action, Credentials, Direction, Transfer};
use crate::error::{Error, Result};
use crate::pool::{Job, Runner, SessionRunner, WorkerPool};
use crate::session::{Invocation, Outcome, SessionError};
use futures::stream::{FuturesOrdered, StreamExt};
use std::sync::Arc;
use std::time::Duration;

pub mod report;

use report::{Failure, Fields, OutputFormat, Report, Reporter};

/// One request, bound to its hosts, options and credentials.
///
/// Fail-fast only guarantees that no host after the first failure is contacted when
/// [Batch::parallel] is `1`. With more workers, that host's siblings in the same wave have
/// already started; they are cancelled and left out of the report.
#[derive(Debug)]
pub struct Batch<R = SessionRunner> {
    options: Options,
    hosts: Vec<String>,
    credentials: Arc<Credentials>,
    raise_on_error: bool,
    parallel: usize,
    runner: Arc<R>,
}

impl Batch<SessionRunner> {
    /// Creates a batch that runs real `ssh` and `rsync` processes, asking for passwords on the
    /// terminal when `options` require them.
    pub fn from_options(options: Options, hosts: Vec<String>, action: &Action) -> Result<Self> {
        Batch::new(
            options,
            hosts,
            action,
            Credentials::default(),
            &mut Terminal,
            Arc::new(SessionRunner),
        )
    }
}

impl<R: Runner> Batch<R> {
    /// Validates the request and resolves credentials.
    ///
    /// Fails without prompting if `hosts` is empty.
    pub fn new(
        options: Options,
        hosts: Vec<String>,
        action: &Action,
        explicit: Credentials,
        asker: &mut impl AskPassword,
        runner: Arc<R>,
    ) -> Result<Self> {
        if hosts.is_empty() {
            return Err(Error::config("no hosts given"));
        }

        let credentials = Credentials::resolve(explicit, &options, action, asker)?;
        let parallel = options.parallel.clamp(1, hosts.len());
        if parallel != options.parallel {
            tracing::debug!(requested = options.parallel, parallel, "adjusted parallelism");
        }

        Ok(Batch {
            raise_on_error: !options.continue_on_error,
            credentials: Arc::new(credentials),
            options,
            hosts,
            parallel,
            runner,
        })
    }

    /// How many hosts are contacted at once.
    pub fn parallel(&self) -> usize {
        self.parallel
    }

    /// Whether the first failure ends the batch.
    pub fn raise_on_error(&self) -> bool {
        self.raise_on_error
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Runs `action` on every host, reporting to the real stdout and stderr.
    ///
    /// Returns the process exit code: `0` if every host succeeded, `1` otherwise.
    pub async fn execute(&self, action: &Action) -> Result<i32> {
        let mut reporter = Reporter;
        match action {
            Action::Command(commands) => self.execute_commands(commands, &mut reporter).await,
            Action::Mirror(transfer) => self.execute_mirror(transfer, &mut reporter).await,
        }
    }

    /// Runs `commands`, in order, on every host.
    pub async fn execute_commands(
        &self,
        commands: &[String],
        reporter: &mut impl Report,
    ) -> Result<i32> {
        if commands.is_empty() {
            return Err(Error::config("no command given"));
        }

        let user = self.options.ssh_user();
        let ssh_args = self.options.ssh_args()?;
        let plans = self
            .hosts
            .iter()
            .map(|host| {
                let mut args = ssh_args.clone();
                args.extend(["-l".to_string(), user.clone(), host.clone()]);
                let dispatches = commands
                    .iter()
                    .map(|command| Dispatch {
                        command: command.clone(),
                        invocation: Invocation::Remote {
                            program: "ssh".to_string(),
                            args: args.clone(),
                            command: command.clone(),
                        },
                    })
                    .collect();
                HostPlan {
                    host: host.clone(),
                    dispatches,
                }
            })
            .collect();

        let mode = Mode::Command {
            user,
            format: OutputFormat::new(&self.options.output_format),
        };
        let label = format!("Command \"{}\"", commands.join("; "));
        let runs = match self.sweep(plans, &mode, &label, reporter).await? {
            Sweep::Finished(runs) => runs,
            Sweep::Failed => return Ok(1),
        };

        if self.options.verify_output {
            return verify(&runs, reporter).await;
        }
        Ok(0)
    }

    /// Mirrors `transfer` between the control node and every host.
    pub async fn execute_mirror(
        &self,
        transfer: &Transfer,
        reporter: &mut impl Report,
    ) -> Result<i32> {
        if transfer.source.is_empty() {
            return Err(Error::config("no mirror source given"));
        }
        if transfer.destination.is_empty() {
            return Err(Error::config("no mirror destination given"));
        }

        let user = self.options.rsync_user();
        let rsync_args = self.options.rsync_args()?;
        let plans = self
            .hosts
            .iter()
            .map(|host| {
                let mut args = rsync_args.clone();
                match transfer.direction {
                    Direction::Push => args.extend([
                        transfer.source.clone(),
                        format!("{user}@{host}:{}", transfer.destination),
                    ]),
                    Direction::Pull => args.extend([
                        format!("{user}@{host}:{}", transfer.source),
                        transfer.local_destination(host),
                    ]),
                }
                let invocation = Invocation::Local {
                    program: "rsync".to_string(),
                    args,
                };
                HostPlan {
                    host: host.clone(),
                    dispatches: vec![Dispatch {
                        command: invocation.display(),
                        invocation,
                    }],
                }
            })
            .collect();

        let label = format!(
            "Mirror \"{}\"",
            action::title(&Action::Mirror(transfer.clone())),
        );
        match self.sweep(plans, &Mode::Mirror, &label, reporter).await? {
            Sweep::Finished(_) => Ok(0),
            Sweep::Failed => Ok(1),
        }
    }

    /// Runs every plan, wave by wave, and reports the results in host-list order.
    async fn sweep(
        &self,
        plans: Vec<HostPlan>,
        mode: &Mode,
        label: &str,
        reporter: &mut impl Report,
    ) -> Result<Sweep> {
        let pool = WorkerPool::new(self.runner.clone(), self.parallel);
        tracing::debug!(workers = pool.size(), hosts = plans.len(), "starting sweep");

        let timeout = self.options.expect_timeout();
        let waves = plans.len().div_ceil(self.parallel);
        let mut plans = plans.into_iter();
        let mut runs = Vec::with_capacity(self.hosts.len());
        let mut failed_hosts = vec![];

        for wave in 0..waves {
            tracing::debug!(wave, "starting wave");
            let mut lanes: FuturesOrdered<_> = plans
                .by_ref()
                .take(self.parallel)
                .map(|plan| self.run_host(&pool, plan, timeout))
                .collect();

            // Dropping `lanes` and `pool` on an early return cancels the rest of this wave.
            while let Some(run) = lanes.next().await {
                for attempt in &run.attempts {
                    let failure = failure(&attempt.result, timeout);
                    reporter.stdout(&mode.render(&run.host, attempt, failure)).await?;
                    if failure.is_none() {
                        continue;
                    }

                    failed_hosts.push(run.host.clone());
                    if self.raise_on_error {
                        let err = error_for(&run.host, attempt, timeout);
                        reporter.stderr(&report::fail_fast(&err)).await?;
                        return Ok(Sweep::Failed);
                    }
                }
                runs.push(run);
            }

            if wave + 1 < waves && !self.options.delay().is_zero() {
                tracing::debug!(delay = ?self.options.delay(), "pausing between waves");
                tokio::time::sleep(self.options.delay()).await;
            }
        }

        if !failed_hosts.is_empty() {
            reporter.stderr(&report::summary(label, &failed_hosts)).await?;
            return Ok(Sweep::Failed);
        }
        Ok(Sweep::Finished(runs))
    }

    /// Runs one host's commands in order, stopping at the first failure if required.
    async fn run_host(&self, pool: &WorkerPool<R>, plan: HostPlan, timeout: Duration) -> HostRun {
        let mut attempts = Vec::with_capacity(plan.dispatches.len());
        for dispatch in plan.dispatches {
            let job = Job {
                invocation: dispatch.invocation.clone(),
                credentials: self.credentials.clone(),
                timeout,
            };
            let result = pool.submit(job).wait().await;
            let failed = failure(&result, timeout).is_some();
            attempts.push(Attempt {
                command: dispatch.command,
                result,
            });
            if failed && self.raise_on_error {
                break;
            }
        }
        HostRun {
            host: plan.host,
            attempts,
        }
    }
}

/// The sessions to run on one host.
#[derive(Clone, Debug)]
struct HostPlan {
    host: String,
    dispatches: Vec<Dispatch>,
}

#[derive(Clone, Debug)]
struct Dispatch {
    /// What the operator sees in reports and errors.
    command: String,
    invocation: Invocation,
}

/// What happened on one host.
#[derive(Debug)]
struct HostRun {
    host: String,
    attempts: Vec<Attempt>,
}

#[derive(Debug)]
struct Attempt {
    command: String,
    result: Result<Outcome, SessionError>,
}

impl HostRun {
    fn outputs(&self) -> Vec<&str> {
        self.attempts.iter().map(Attempt::output).collect()
    }
}

impl Attempt {
    fn output(&self) -> &str {
        match &self.result {
            Ok(outcome) => &outcome.output,
            Err(_) => "",
        }
    }
}

enum Sweep {
    Finished(Vec<HostRun>),
    Failed,
}

/// How each attempt is rendered.
enum Mode {
    Command { user: String, format: OutputFormat },
    Mirror,
}

impl Mode {
    fn render(&self, host: &str, attempt: &Attempt, failure: Option<Failure>) -> String {
        let mut text = match self {
            Mode::Command { user, format } => format.render(&Fields {
                user,
                host,
                command: &attempt.command,
                output: attempt.output(),
            }),
            Mode::Mirror => format!("% {}\n{}\n", attempt.command, attempt.output()),
        };
        if let Some(failure) = failure {
            text.push_str(&match self {
                Mode::Command { .. } => report::command_failure(failure),
                Mode::Mirror => report::mirror_failure(failure),
            });
            text.push('\n');
        }
        text.push('\n');
        text
    }
}

fn failure(result: &Result<Outcome, SessionError>, timeout: Duration) -> Option<Failure> {
    match result {
        Ok(outcome) if outcome.success() => None,
        Ok(outcome) => Some(Failure::Status(outcome.status)),
        Err(SessionError::Timeout) => Some(Failure::TimedOut(timeout)),
        Err(_) => Some(Failure::Broken),
    }
}

fn error_for(host: &str, attempt: &Attempt, timeout: Duration) -> Error {
    let host = host.to_string();
    let command = attempt.command.clone();
    match &attempt.result {
        Ok(outcome) => Error::RemoteCommandFailure {
            host,
            command,
            status: outcome.status,
        },
        Err(SessionError::Timeout) => Error::SessionTimeout {
            host,
            command,
            timeout,
        },
        Err(SessionError::Io(err)) => Error::Transport {
            host,
            command,
            source: std::io::Error::new(err.kind(), err.to_string()),
        },
        Err(SessionError::StreamClosed | SessionError::WorkerLost) => {
            Error::StreamClosedUnexpectedly { host, command }
        }
    }
}

/// Checks that every host printed the same output for every command.
async fn verify(runs: &[HostRun], reporter: &mut impl Report) -> Result<i32> {
    let Some((first, rest)) = runs.split_first() else {
        return Ok(0);
    };
    let expected = first.outputs();
    let diverging: Vec<String> = rest
        .iter()
        .filter(|run| run.outputs() != expected)
        .map(|run| run.host.clone())
        .collect();

    if diverging.is_empty() {
        reporter.stdout("Verified output of all hosts.\n").await?;
        return Ok(0);
    }

    let err = Error::VerificationMismatch { hosts: diverging };
    reporter.stderr(&format!("[error] {err}\n")).await?;
    Ok(1)
}

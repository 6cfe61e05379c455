//! Command-line arguments for `volley` and `volley-rsync`.
//!
//! Flags override whatever the defaults file says. Boolean flags can only switch a behavior on;
//! to switch one off, leave the flag out and set it in a defaults file.

use crate::config::Options;
use crate::core::{hosts, Action, Direction, Transfer};
use crate::error::Result;
use clap::{Args, Parser};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

/// Flags shared by both binaries.
#[derive(Clone, Debug, Default, Args)]
pub struct CommonArgs {
    /// Comma-separated list of target hosts.
    #[arg(short = 'H', long)]
    pub hosts: Option<String>,

    /// Files listing target hosts, one per line.
    #[arg(short = 'f', long, value_delimiter = ',')]
    pub hosts_files: Vec<PathBuf>,

    /// Ask for the ssh/rsync login password before starting.
    #[arg(short = 'l', long)]
    pub prompt_login_password: bool,

    /// How many hosts to contact at once.
    #[arg(short = 'p', long)]
    pub parallel: Option<usize>,

    /// Keep going after a host fails.
    #[arg(short = 'c', long)]
    pub continue_on_error: bool,

    /// Seconds allowed for each host.
    #[arg(short = 't', long, value_name = "SECONDS")]
    pub expect_timeout: Option<u64>,

    /// Seconds to wait between batches of hosts.
    #[arg(short = 'd', long, value_name = "SECONDS")]
    pub delay: Option<u64>,

    /// Print debug logs to stderr.
    #[arg(short = 'D', long)]
    pub debug: bool,

    /// Read defaults from this file instead of ~/.volley.yaml or /etc/volley/volley.yaml.
    #[arg(long, value_name = "FILE")]
    pub conf: Option<PathBuf>,
}

impl CommonArgs {
    fn apply(&self, options: &mut Options) {
        if let Some(list) = &self.hosts {
            options.hosts = hosts::parse_host_list(list);
        }
        if !self.hosts_files.is_empty() {
            options.hosts_files = self.hosts_files.clone();
        }
        options.prompt_login_password |= self.prompt_login_password;
        options.continue_on_error |= self.continue_on_error;
        options.debug |= self.debug;
        if let Some(parallel) = self.parallel {
            options.parallel = parallel;
        }
        if let Some(timeout) = self.expect_timeout {
            options.expect_timeout = timeout;
        }
        if let Some(delay) = self.delay {
            options.delay = delay;
        }
    }
}

/// Runs shell commands on many hosts.
#[derive(Clone, Debug, Parser)]
#[command(name = "volley")]
pub struct CommandArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Login user for ssh.
    #[arg(short = 'u', long)]
    pub ssh_user: Option<String>,

    /// Extra arguments for ssh.
    #[arg(short = 'o', long, allow_hyphen_values = true)]
    pub ssh_options: Option<String>,

    /// Ask for the sudo password before starting.
    #[arg(short = 's', long)]
    pub prompt_sudo_password: bool,

    /// Report template. Knows ${user}, ${host}, ${command} and ${output}.
    #[arg(long)]
    pub output_format: Option<String>,

    /// Fail unless every host prints the same output.
    #[arg(short = 'V', long)]
    pub verify_output: bool,

    /// Commands to run, in order, on each host.
    #[arg(required = true)]
    pub command: Vec<String>,
}

impl CommandArgs {
    /// Loads the defaults file and applies these flags on top.
    pub fn options(&self) -> Result<Options> {
        let mut options = Options::discover(self.common.conf.as_deref())?;
        self.apply(&mut options);
        Ok(options)
    }

    pub fn apply(&self, options: &mut Options) {
        self.common.apply(options);
        if let Some(user) = &self.ssh_user {
            options.ssh_user = Some(user.clone());
        }
        if let Some(ssh_options) = &self.ssh_options {
            options.ssh_options = Some(ssh_options.clone());
        }
        if let Some(format) = &self.output_format {
            options.output_format = format.clone();
        }
        options.prompt_sudo_password |= self.prompt_sudo_password;
        options.verify_output |= self.verify_output;
    }

    pub fn action(&self) -> Action {
        Action::Command(self.command.clone())
    }
}

/// Mirrors files between this machine and many hosts with rsync.
#[derive(Clone, Debug, Parser)]
#[command(name = "volley-rsync")]
pub struct RsyncArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// `push` copies from here to every host; `pull` copies from every host to here.
    #[arg(short = 'm', long)]
    pub mirror_mode: Option<Direction>,

    /// Remote user for rsync.
    #[arg(long)]
    pub rsync_user: Option<String>,

    /// Arguments for rsync. Default: -av
    #[arg(long, allow_hyphen_values = true)]
    pub rsync_options: Option<String>,

    /// When pulling, write every host's copy to the same destination.
    #[arg(long)]
    pub no_append_host_suffix: bool,

    /// Local path for a push; remote path for a pull.
    pub source: String,

    /// Remote path for a push; local path for a pull.
    pub destination: String,
}

impl RsyncArgs {
    /// Loads the defaults file and applies these flags on top.
    pub fn options(&self) -> Result<Options> {
        let mut options = Options::discover(self.common.conf.as_deref())?;
        self.apply(&mut options);
        Ok(options)
    }

    pub fn apply(&self, options: &mut Options) {
        self.common.apply(options);
        if let Some(direction) = self.mirror_mode {
            options.mirror_mode = direction;
        }
        if let Some(user) = &self.rsync_user {
            options.rsync_user = Some(user.clone());
        }
        if let Some(rsync_options) = &self.rsync_options {
            options.rsync_options = Some(rsync_options.clone());
        }
        if self.no_append_host_suffix {
            options.append_host_suffix = false;
        }
    }

    /// The transfer these arguments describe, given the merged `options`.
    pub fn action(&self, options: &Options) -> Action {
        Action::Mirror(Transfer {
            source: self.source.clone(),
            destination: self.destination.clone(),
            direction: options.mirror_mode,
            append_host_suffix: options.append_host_suffix,
        })
    }
}

/// The question asked before touching production hosts.
pub fn production_prompt(action: &Action, host_count: usize) -> String {
    let what = match action {
        Action::Command(commands) => format!("Command \"{}\"", commands.join("; ")),
        Action::Mirror(transfer) => format!(
            "Mirroring \"{}\" -> \"{}\"",
            transfer.source, transfer.destination,
        ),
    };
    format!("{what} will be executed to {host_count} hosts. Are you sure? [yes/NO]: ")
}

/// Asks `prompt` on `writer` and returns whether the answer read from `reader` is `yes`.
pub fn confirm(mut reader: impl BufRead, mut writer: impl Write, prompt: &str) -> io::Result<bool> {
    write!(writer, "{prompt}")?;
    writer.flush()?;

    let mut answer = String::new();
    reader.read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}

/// Asks for confirmation on the terminal if `VOLLEY_ENV` says the hosts are production.
///
/// Returns `true` if dispatch may go ahead.
pub fn confirm_production(action: &Action, host_count: usize) -> io::Result<bool> {
    if !Options::is_production() {
        return Ok(true);
    }
    let prompt = production_prompt(action, host_count);
    confirm(io::stdin().lock(), io::stdout().lock(), &prompt)
}

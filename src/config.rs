//! Run-time options and where their defaults live.

use crate::core::action::Direction;
use crate::core::hosts;
use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The name of the defaults file looked up in [config_dir].
pub const CONFIG_FILE: &str = "volley.yaml";

/// The name of the per-user defaults file looked up in the home directory.
pub const USER_CONFIG_FILE: &str = ".volley.yaml";

/// Environment variable naming the deployment tier of the target hosts.
pub const ENV_VAR: &str = "VOLLEY_ENV";

/// The default report template. Rendered output is followed by one extra newline.
pub const DEFAULT_OUTPUT_FORMAT: &str = "${user}@${host} % ${command}\\n${output}\\n";

/// Used when `rsync_options` is not set.
pub const DEFAULT_RSYNC_OPTIONS: &str = "-av";

/// Returns a [PathBuf] to the directory where Volley's configuration should live.
///
/// When compiled for testing, this returns `CARGO_MANIFEST_DIR` plus `resources/etc/volley`.
/// Otherwise, it returns `/etc/volley`.
pub fn config_dir() -> PathBuf {
    // Omit the leading slash so that PathBuf::push appends instead of replacing.
    const CONFIG_DIR: &str = "etc/volley";

    let mut path = PathBuf::new();

    #[cfg(test)]
    {
        path.push(env!("CARGO_MANIFEST_DIR"));
        path.push("resources");
    }
    #[cfg(not(test))]
    path.push("/");

    path.push(CONFIG_DIR);
    path
}

/// Every option the dispatch engine understands.
///
/// Values missing from a configuration file take the defaults listed on each field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Options {
    /// Target hosts, in dispatch order. Default: none.
    ///
    /// A configuration file may give either a sequence or a comma-separated string.
    #[serde(deserialize_with = "deserialize_hosts")]
    pub hosts: Vec<String>,

    /// Files listing further hosts, one per line. Default: none.
    pub hosts_files: Vec<PathBuf>,

    /// Login user for `ssh`. Default: the invoking user.
    pub ssh_user: Option<String>,

    /// Extra `ssh` arguments, split like a shell would. Default: none.
    pub ssh_options: Option<String>,

    /// Ask for the login password before dispatching. Default: `false`.
    pub prompt_login_password: bool,

    /// Ask for the `sudo` password before dispatching. Default: `false`.
    pub prompt_sudo_password: bool,

    /// How many hosts to contact at once. Default: `1`.
    pub parallel: usize,

    /// Visit every host even after a failure. Default: `false`.
    pub continue_on_error: bool,

    /// Seconds allowed for each remote session. Default: `30`.
    pub expect_timeout: u64,

    /// Seconds to wait between host batches. Default: `0`.
    pub delay: u64,

    /// Per-host report template. Default: [DEFAULT_OUTPUT_FORMAT].
    pub output_format: String,

    /// Require identical output from every host. Default: `false`.
    pub verify_output: bool,

    /// Transfer direction for `volley-rsync`. Default: push.
    pub mirror_mode: Direction,

    /// Remote user for `rsync`. Default: the invoking user.
    pub rsync_user: Option<String>,

    /// Extra `rsync` arguments. Default: [DEFAULT_RSYNC_OPTIONS].
    pub rsync_options: Option<String>,

    /// Give every pulled copy a `__<host>` suffix. Default: `true`.
    pub append_host_suffix: bool,

    /// Enables debug logging. Default: `false`.
    pub debug: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            hosts: vec![],
            hosts_files: vec![],
            ssh_user: None,
            ssh_options: None,
            prompt_login_password: false,
            prompt_sudo_password: false,
            parallel: 1,
            continue_on_error: false,
            expect_timeout: 30,
            delay: 0,
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            verify_output: false,
            mirror_mode: Direction::Push,
            rsync_user: None,
            rsync_options: None,
            append_host_suffix: true,
            debug: false,
        }
    }
}

impl Options {
    /// Reads options from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| Error::config(format!("cannot read {}: {err}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|err| Error::config(format!("invalid {}: {err}", path.display())))
    }

    /// Loads defaults from the first configuration file found.
    ///
    /// `explicit` must exist if given. Otherwise `~/.volley.yaml` and then
    /// `/etc/volley/volley.yaml` are tried, and built-in defaults are used if neither exists.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        let mut candidates = vec![];
        if let Some(mut home) = home::home_dir() {
            home.push(USER_CONFIG_FILE);
            candidates.push(home);
        }
        candidates.push(config_dir().join(CONFIG_FILE));

        for candidate in candidates {
            match fs::metadata(&candidate) {
                Ok(md) if md.is_file() => {
                    tracing::debug!(path = %candidate.display(), "loading defaults");
                    return Self::load(&candidate);
                }
                Err(err) if err.kind() != ErrorKind::NotFound => {
                    return Err(Error::config(format!(
                        "cannot read {}: {err}",
                        candidate.display(),
                    )));
                }
                _ => {}
            }
        }
        Ok(Self::default())
    }

    /// The per-session time budget.
    pub fn expect_timeout(&self) -> Duration {
        Duration::from_secs(self.expect_timeout)
    }

    /// The pause between host batches.
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay)
    }

    /// The `ssh` login user, falling back to the invoking user.
    pub fn ssh_user(&self) -> String {
        self.ssh_user.clone().unwrap_or_else(current_user)
    }

    /// The `rsync` remote user, falling back to the invoking user.
    pub fn rsync_user(&self) -> String {
        self.rsync_user.clone().unwrap_or_else(current_user)
    }

    /// `ssh_options` split into arguments.
    pub fn ssh_args(&self) -> Result<Vec<String>> {
        split_args("ssh_options", self.ssh_options.as_deref().unwrap_or(""))
    }

    /// `rsync_options` split into arguments.
    pub fn rsync_args(&self) -> Result<Vec<String>> {
        let options = self.rsync_options.as_deref().unwrap_or(DEFAULT_RSYNC_OPTIONS);
        split_args("rsync_options", options)
    }

    /// Whether `VOLLEY_ENV` marks the target hosts as production.
    pub fn is_production() -> bool {
        matches!(env::var(ENV_VAR), Ok(tier) if tier == "production")
    }
}

fn split_args(name: &str, value: &str) -> Result<Vec<String>> {
    shlex::split(value).ok_or_else(|| Error::config(format!("cannot parse {name}: {value}")))
}

/// Name of the user running this process.
pub fn current_user() -> String {
    if let Ok(Some(user)) = nix::unistd::User::from_uid(nix::unistd::getuid()) {
        return user.name;
    }
    env::var("USER")
        .or_else(|_| env::var("LOGNAME"))
        .unwrap_or_else(|_| "root".to_string())
}

fn deserialize_hosts<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostList {
        Sequence(Vec<String>),
        Line(String),
    }

    Ok(match HostList::deserialize(deserializer)? {
        HostList::Sequence(hosts) => hosts,
        HostList::Line(line) => hosts::parse_host_list(&line),
    })
}

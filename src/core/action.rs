//! Types for representing what the user asked to run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// What Volley should do on every host.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Shell commands, run in order on each host.
    Command(Vec<String>),

    /// A file-mirroring transfer between the control node and each host.
    Mirror(Transfer),
}

/// Which way a [Transfer] copies files.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Replicate a local path onto every host.
    #[default]
    Push,

    /// Copy a path from every host to the control node.
    Pull,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Push => f.write_str("push"),
            Direction::Pull => f.write_str("pull"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push" => Ok(Direction::Push),
            "pull" => Ok(Direction::Pull),
            other => Err(format!("invalid mirror mode: {other}")),
        }
    }
}

/// Describes one mirror operation.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Transfer {
    /// Local path for a push; remote path for a pull.
    pub source: String,

    /// Remote path for a push; local path for a pull.
    pub destination: String,

    pub direction: Direction,

    /// Only meaningful for pulls. See [Transfer::local_destination].
    pub append_host_suffix: bool,
}

impl Transfer {
    /// Where the copy pulled from `host` should land on the control node.
    ///
    /// Without a host suffix every host writes to `destination` itself. With one, the copies are
    /// kept apart:
    ///
    /// * `destination` is a directory: `<destination>/<basename(source)>__<host>`
    /// * `destination` is a file or does not exist: `<destination>__<host>`
    pub fn local_destination(&self, host: &str) -> String {
        if !self.append_host_suffix {
            return self.destination.clone();
        }

        let destination = Path::new(&self.destination);
        if destination.is_dir() {
            let file_name = Path::new(self.source.trim_end_matches('/'))
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut path = self.destination.clone();
            if !path.ends_with('/') {
                path.push('/');
            }
            format!("{path}{file_name}__{host}")
        } else {
            format!("{}__{host}", self.destination)
        }
    }
}

/// Generates a one-line identifier for an [Action], suitable for use in user output.
pub fn title(action: &Action) -> String {
    match action {
        Action::Command(vec) => vec.join("; "),
        Action::Mirror(Transfer {
            source,
            destination,
            ..
        }) => format!("{source} -> {destination}"),
    }
}

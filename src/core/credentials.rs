//! Passwords captured once per invocation and shared by every session.

use crate::config::Options;
use crate::core::Action;
use crate::error::Result;
use std::fmt;
use std::io;
use zeroize::Zeroizing;

/// Commands starting with this word will ask for a password on the remote host.
pub const ELEVATION_KEYWORD: &str = "sudo";

/// A password. Wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(Zeroizing::new(value.into()))
    }

    /// The actual password. Only the session writing it to a transport should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Login and elevation passwords for one invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Answers `ssh` and `rsync` password prompts.
    pub login: Option<Secret>,

    /// Answers `sudo` prompts on the remote host.
    pub elevation: Option<Secret>,
}

/// Reads a password from the operator.
pub trait AskPassword {
    fn ask_password(&mut self, prompt: &str) -> io::Result<String>;
}

/// Production [AskPassword]. Reads from the controlling terminal without echo.
#[derive(Clone, Debug, Default)]
pub struct Terminal;

impl AskPassword for Terminal {
    fn ask_password(&mut self, prompt: &str) -> io::Result<String> {
        rpassword::prompt_password(prompt)
    }
}

impl Credentials {
    /// Resolves the credentials for a batch.
    ///
    /// Values already present in `explicit` win. Otherwise the login password is asked for when
    /// `prompt_login_password` is set, and the elevation password when `prompt_sudo_password` is
    /// set or the first command starts with `sudo`.
    pub fn resolve(
        explicit: Credentials,
        options: &Options,
        action: &Action,
        asker: &mut impl AskPassword,
    ) -> Result<Self> {
        let login = match explicit.login {
            Some(login) => Some(login),
            None if options.prompt_login_password => Some(Secret::new(
                asker.ask_password("Enter a password for ssh authentication: ")?,
            )),
            None => None,
        };

        let elevation = match explicit.elevation {
            Some(elevation) => Some(elevation),
            None if options.prompt_sudo_password || starts_with_elevation(action) => Some(
                Secret::new(asker.ask_password("Enter a password for sudo: ")?),
            ),
            None => None,
        };

        Ok(Credentials { login, elevation })
    }
}

fn starts_with_elevation(action: &Action) -> bool {
    match action {
        Action::Command(commands) => commands.first().is_some_and(|command| {
            command.split_whitespace().next() == Some(ELEVATION_KEYWORD)
        }),
        Action::Mirror(_) => false,
    }
}

//! Loads the list of hosts a batch targets.

use crate::config::Options;
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Splits a comma-separated host list. Order and duplicates are kept; empty entries are not.
pub fn parse_host_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Reads hosts from files, one per line, in file order. Blank lines and `#` comments are skipped.
pub fn load_hosts_files(files: &[impl AsRef<Path>]) -> Result<Vec<String>> {
    let mut hosts = vec![];
    for file in files {
        let file = file.as_ref();
        let text = fs::read_to_string(file).map_err(|err| {
            Error::config(format!("cannot read hosts file {}: {err}", file.display()))
        })?;
        hosts.extend(
            text.lines()
                .map(|line| line.split('#').next().unwrap_or("").trim())
                .filter(|line| !line.is_empty())
                .map(str::to_owned),
        );
    }
    Ok(hosts)
}

/// Every host `options` names: `hosts` first, then the contents of `hosts_files`.
pub fn resolve(options: &Options) -> Result<Vec<String>> {
    let mut hosts = options.hosts.clone();
    hosts.extend(load_hosts_files(&options.hosts_files)?);
    Ok(hosts)
}

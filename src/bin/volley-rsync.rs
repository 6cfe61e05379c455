//! Mirrors files between this machine and many hosts with rsync.

use anyhow::Context;
use clap::Parser;
use std::process::ExitCode;
use volley::cli::{self, RsyncArgs};
use volley::core::hosts;
use volley::{logger, Batch};

#[tokio::main]
async fn main() -> ExitCode {
    let args = RsyncArgs::parse();
    match run(args).await {
        Ok(0) => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RsyncArgs) -> anyhow::Result<i32> {
    let options = args.options().context("cannot load options")?;
    logger::init(options.debug);

    let hosts = hosts::resolve(&options)?;
    let action = args.action(&options);
    tracing::debug!(?action, hosts = hosts.len(), "mirroring");
    if !cli::confirm_production(&action, hosts.len()).context("cannot read confirmation")? {
        return Ok(1);
    }

    let batch = Batch::from_options(options, hosts, &action)?;
    Ok(batch.execute(&action).await?)
}

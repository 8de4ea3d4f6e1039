//! Map parsed arguments to the action the binary runs.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{arbiter, discovery, identity, replication, ARG_PORT, ARG_RPC_PORT};
use anyhow::{bail, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let rpc_port = matches.get_one::<u16>(ARG_RPC_PORT).copied().unwrap_or(9090);

    if port == rpc_port && port != 0 {
        bail!("--{ARG_PORT} and --{ARG_RPC_PORT} must differ (both are {port})");
    }

    Ok(Action::Server(Args {
        port,
        rpc_port,
        arbiter: arbiter::Options::parse(matches)?,
        discovery: discovery::Options::parse(matches)?,
        identity: identity::Options::parse(matches),
        replication: replication::Options::parse(matches),
    }))
}

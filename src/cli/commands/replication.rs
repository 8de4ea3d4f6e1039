use crate::propagation::RetryPolicy;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::time::Duration;

pub const ARG_BOOTSTRAP_RETRIES: &str = "bootstrap-retries";
pub const ARG_BOOTSTRAP_DELAY_SECONDS: &str = "bootstrap-delay-seconds";
pub const ARG_BOOTSTRAP_REQUIRED: &str = "bootstrap-required";
pub const ARG_RPC_TIMEOUT_SECONDS: &str = "rpc-timeout-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub retry: RetryPolicy,
    pub required: bool,
    pub rpc_timeout: Duration,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        let retries = matches
            .get_one::<u32>(ARG_BOOTSTRAP_RETRIES)
            .copied()
            .unwrap_or(10);
        let delay = matches
            .get_one::<u64>(ARG_BOOTSTRAP_DELAY_SECONDS)
            .copied()
            .unwrap_or(10);
        let rpc_timeout = matches
            .get_one::<u64>(ARG_RPC_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(5);

        Self {
            retry: RetryPolicy::new(retries, Duration::from_secs(delay)),
            required: matches.get_flag(ARG_BOOTSTRAP_REQUIRED),
            rpc_timeout: Duration::from_secs(rpc_timeout),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BOOTSTRAP_RETRIES)
                .long(ARG_BOOTSTRAP_RETRIES)
                .help("Attempts to reach the bootstrap peer")
                .env("AUTHMESH_BOOTSTRAP_RETRIES")
                .default_value("10")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_BOOTSTRAP_DELAY_SECONDS)
                .long(ARG_BOOTSTRAP_DELAY_SECONDS)
                .help("Seconds between bootstrap attempts")
                .env("AUTHMESH_BOOTSTRAP_DELAY_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_BOOTSTRAP_REQUIRED)
                .long(ARG_BOOTSTRAP_REQUIRED)
                .help("Abort startup if the auth cache cannot be bootstrapped from a peer")
                .env("AUTHMESH_BOOTSTRAP_REQUIRED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_RPC_TIMEOUT_SECONDS)
                .long(ARG_RPC_TIMEOUT_SECONDS)
                .help("Timeout for calls to peers and to the discovery agent")
                .env("AUTHMESH_RPC_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

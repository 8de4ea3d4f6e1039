use crate::arbiter::{ArbiterConfig, Timeouts};
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::time::Duration;

pub const ARG_MAX_REQUESTS: &str = "max-requests";
pub const ARG_REQUEST_READ_TIMEOUT_MS: &str = "request-read-timeout-ms";
pub const ARG_RESPONSE_TIMEOUT_MS: &str = "response-timeout-ms";
pub const ARG_RESPONSE_WRITE_TIMEOUT_MS: &str = "response-write-timeout-ms";
pub const ARG_SWEEP_INTERVAL_SECONDS: &str = "sweep-interval-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub max_requests: usize,
    pub timeouts: Timeouts,
    pub sweep_interval: Duration,
}

impl Options {
    /// Parse admission arbiter arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a value does not fit the platform.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get = |id: &str, default: u64| matches.get_one::<u64>(id).copied().unwrap_or(default);

        let max_requests = usize::try_from(get(ARG_MAX_REQUESTS, 2))
            .with_context(|| format!("--{ARG_MAX_REQUESTS} is too large"))?;

        Ok(Self {
            max_requests,
            timeouts: Timeouts::from_millis(
                get(ARG_REQUEST_READ_TIMEOUT_MS, 40),
                get(ARG_RESPONSE_TIMEOUT_MS, 2000),
                get(ARG_RESPONSE_WRITE_TIMEOUT_MS, 1000),
            ),
            sweep_interval: Duration::from_secs(get(ARG_SWEEP_INTERVAL_SECONDS, 120)),
        })
    }

    #[must_use]
    pub fn config(&self) -> ArbiterConfig {
        ArbiterConfig::new()
            .with_pool_size(self.max_requests)
            .with_timeouts(self.timeouts)
            .with_sweep_interval(self.sweep_interval)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAX_REQUESTS)
                .long(ARG_MAX_REQUESTS)
                .help("Requests allowed to hold a slot at the same time")
                .long_help(
                    "Requests allowed to hold a slot at the same time.\n\nRequests arriving while every slot is leased are rejected with 429, never queued.",
                )
                .env("AUTHMESH_MAX_REQUESTS")
                .default_value("2")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REQUEST_READ_TIMEOUT_MS)
                .long(ARG_REQUEST_READ_TIMEOUT_MS)
                .help("Request read allowance in milliseconds, counted toward the lease budget")
                .long_help(
                    "Request read allowance in milliseconds.\n\nOnly added to the slot lease budget (read + response + write). The HTTP listener does not enforce it as a header read deadline.",
                )
                .env("AUTHMESH_REQUEST_READ_TIMEOUT_MS")
                .default_value("40")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_RESPONSE_TIMEOUT_MS)
                .long(ARG_RESPONSE_TIMEOUT_MS)
                .help("Handler response timeout in milliseconds")
                .env("AUTHMESH_RESPONSE_TIMEOUT_MS")
                .default_value("2000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RESPONSE_WRITE_TIMEOUT_MS)
                .long(ARG_RESPONSE_WRITE_TIMEOUT_MS)
                .help("Response write timeout in milliseconds")
                .long_help(
                    "Response write timeout in milliseconds.\n\nA slot leased longer than read + response + write timeouts is reclaimed by the sweep.",
                )
                .env("AUTHMESH_RESPONSE_WRITE_TIMEOUT_MS")
                .default_value("1000")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL_SECONDS)
                .long(ARG_SWEEP_INTERVAL_SECONDS)
                .help("Seconds between sweeps of expired slot leases")
                .env("AUTHMESH_SWEEP_INTERVAL_SECONDS")
                .default_value("120")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

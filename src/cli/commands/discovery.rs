use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_DISCOVERY_URL: &str = "discovery-url";
pub const ARG_DISCOVERY_TOKEN: &str = "discovery-token";
pub const ARG_DISCOVERY_REQUIRED: &str = "discovery-required";
pub const ARG_SERVICE_NAME: &str = "service-name";
pub const ARG_ADVERTISE_ADDRESS: &str = "advertise-address";

#[derive(Debug, Clone)]
pub struct Options {
    pub url: String,
    pub token: Option<SecretString>,
    pub required: bool,
    pub service_name: String,
    pub advertise_address: Option<String>,
}

impl Options {
    /// Parse discovery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the service name is empty.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        // clap passes "" through when an env var is set but empty
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let Some(service_name) = get_non_empty(ARG_SERVICE_NAME) else {
            anyhow::bail!("missing required argument: --{ARG_SERVICE_NAME}");
        };

        Ok(Self {
            url: get_non_empty(ARG_DISCOVERY_URL)
                .unwrap_or_else(|| "http://127.0.0.1:8500".to_string()),
            token: get_non_empty(ARG_DISCOVERY_TOKEN).map(SecretString::from),
            required: matches.get_flag(ARG_DISCOVERY_REQUIRED),
            service_name,
            advertise_address: get_non_empty(ARG_ADVERTISE_ADDRESS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_DISCOVERY_URL)
                .long(ARG_DISCOVERY_URL)
                .help("Consul agent URL")
                .env("AUTHMESH_DISCOVERY_URL")
                .default_value("http://127.0.0.1:8500"),
        )
        .arg(
            Arg::new(ARG_DISCOVERY_TOKEN)
                .long(ARG_DISCOVERY_TOKEN)
                .help("Consul ACL token")
                .env("AUTHMESH_DISCOVERY_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_DISCOVERY_REQUIRED)
                .long(ARG_DISCOVERY_REQUIRED)
                .help("Abort startup if the services cannot be registered")
                .long_help(
                    "Abort startup if the services cannot be registered.\n\nBy default the node logs the failure and keeps running without peers.",
                )
                .env("AUTHMESH_DISCOVERY_REQUIRED")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_SERVICE_NAME)
                .long(ARG_SERVICE_NAME)
                .help("Service name to register; the RPC service is <name>-rpc")
                .env("AUTHMESH_SERVICE_NAME")
                .default_value("authmesh"),
        )
        .arg(
            Arg::new(ARG_ADVERTISE_ADDRESS)
                .long(ARG_ADVERTISE_ADDRESS)
                .help("Address peers should use to reach this node (default: the agent's)")
                .env("AUTHMESH_ADVERTISE_ADDRESS"),
        )
}

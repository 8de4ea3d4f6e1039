use crate::auth::{DisabledVerifier, PrincipalVerifier, UserInfoVerifier};
use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use std::{sync::Arc, time::Duration};

pub const ARG_USERINFO_URL: &str = "userinfo-url";
pub const ARG_AUTH_AGENT: &str = "auth-agent";
pub const ARG_USERINFO_TIMEOUT_SECONDS: &str = "userinfo-timeout-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub userinfo_url: Option<String>,
    pub agent: String,
    pub timeout: Duration,
}

impl Options {
    #[must_use]
    pub fn parse(matches: &ArgMatches) -> Self {
        Self {
            userinfo_url: matches
                .get_one::<String>(ARG_USERINFO_URL)
                .cloned()
                .filter(|v| !v.trim().is_empty()),
            agent: matches
                .get_one::<String>(ARG_AUTH_AGENT)
                .cloned()
                .unwrap_or_else(|| "oauth".to_string()),
            timeout: Duration::from_secs(
                matches
                    .get_one::<u64>(ARG_USERINFO_TIMEOUT_SECONDS)
                    .copied()
                    .unwrap_or(5),
            ),
        }
    }

    /// Verifier for `POST /v1/auth/login`. Without a userinfo URL every login
    /// is refused.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid.
    pub fn verifier(&self) -> anyhow::Result<Arc<dyn PrincipalVerifier>> {
        match &self.userinfo_url {
            Some(url) => Ok(Arc::new(
                UserInfoVerifier::new(url, self.agent.clone(), self.timeout)
                    .with_context(|| format!("Invalid --{ARG_USERINFO_URL}"))?,
            )),
            None => Ok(Arc::new(DisabledVerifier)),
        }
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_USERINFO_URL)
                .long(ARG_USERINFO_URL)
                .help("OAuth userinfo endpoint used to verify login tokens")
                .long_help(
                    "OAuth userinfo endpoint used to verify login tokens, e.g. https://openidconnect.googleapis.com/v1/userinfo\n\nWhen unset, POST /v1/auth/login answers 503.",
                )
                .env("AUTHMESH_USERINFO_URL"),
        )
        .arg(
            Arg::new(ARG_AUTH_AGENT)
                .long(ARG_AUTH_AGENT)
                .help("Agent name recorded on users logged in through the userinfo endpoint")
                .env("AUTHMESH_AUTH_AGENT")
                .default_value("oauth"),
        )
        .arg(
            Arg::new(ARG_USERINFO_TIMEOUT_SECONDS)
                .long(ARG_USERINFO_TIMEOUT_SECONDS)
                .help("Timeout for userinfo requests in seconds")
                .env("AUTHMESH_USERINFO_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

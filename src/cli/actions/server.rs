use crate::{
    api, arbiter,
    auth::AuthCache,
    cli::{
        commands::{
            arbiter as arbiter_args, discovery as discovery_args, identity as identity_args,
            replication,
        },
        globals::GlobalArgs,
        telemetry,
    },
    discovery::{ConsulDirectory, ServiceIdentity},
    node::Node,
    propagation::{Bootstrap, BootstrapOutcome, Broadcaster},
    rpc::{self, HttpPeerClient},
};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tokio::{net::TcpListener, sync::watch};
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub rpc_port: u16,
    pub arbiter: arbiter_args::Options,
    pub discovery: discovery_args::Options,
    pub identity: identity_args::Options,
    pub replication: replication::Options,
}

/// Execute the server action.
///
/// Startup order: bind both listeners, register with discovery, serve RPC,
/// bootstrap the auth cache from a peer, start the arbiter, serve HTTP.
/// On shutdown both services are deregistered.
///
/// # Errors
/// Returns an error if a listener cannot be bound, or if registration or
/// bootstrap fail while marked as required.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    if args.discovery.required && args.discovery.token.is_none() {
        return Err(anyhow!(
            "--discovery-required is set but no discovery token was provided"
        ));
    }

    let verifier = args.identity.verifier()?;
    if args.identity.userinfo_url.is_none() {
        warn!("no --userinfo-url configured, logins will be refused");
    }

    let mut globals = GlobalArgs::new(args.discovery.url.clone());
    if let Some(token) = args.discovery.token.clone() {
        globals.set_token(token);
    }
    debug!("Global args: {:?}", globals);

    let directory = Arc::new(
        ConsulDirectory::new(
            &globals.discovery_url,
            globals.discovery_token.clone(),
            args.replication.rpc_timeout,
        )
        .context("Failed to build discovery client")?,
    );

    let http_listener = TcpListener::bind(format!("::0:{}", args.port))
        .await
        .with_context(|| format!("Failed to bind HTTP port {}", args.port))?;
    let rpc_listener = TcpListener::bind(format!("::0:{}", args.rpc_port))
        .await
        .with_context(|| format!("Failed to bind RPC port {}", args.rpc_port))?;

    let identity = ServiceIdentity::new(args.discovery.service_name.clone());
    let registered = register(
        &directory,
        &identity,
        http_listener.local_addr()?.port(),
        rpc_listener.local_addr()?.port(),
        &args.discovery,
    )
    .await?;

    let cache = AuthCache::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let rpc_task = tokio::spawn(rpc::serve(
        rpc_listener,
        cache.clone(),
        wait_for_shutdown(shutdown_rx.clone()),
    ));

    let client = Arc::new(HttpPeerClient::new(args.replication.rpc_timeout)?);

    let bootstrap = Bootstrap::new(
        cache.clone(),
        Arc::clone(&directory),
        Arc::clone(&client),
        identity.rpc_id(),
        identity.rpc_name(),
    )
    .with_retry_policy(args.replication.retry);

    match bootstrap.run().await {
        Ok(BootstrapOutcome::Synced { peer, principals }) => {
            info!(peer = %peer, principals, "auth cache synchronized");
        }
        Ok(outcome) => info!(?outcome, "bootstrap finished"),
        Err(err) if args.replication.required => {
            let _ = shutdown_tx.send(true);
            if registered {
                deregister(&directory, &identity).await;
            }
            return Err(err).context("Failed to bootstrap the auth cache");
        }
        Err(err) => warn!(error = %err, "bootstrap failed, starting with an empty auth cache"),
    }

    let (arbiter, _arbiter_task) = arbiter::spawn(&args.arbiter.config());
    let _sweeper = arbiter::spawn_sweeper(arbiter.clone(), args.arbiter.sweep_interval);

    let broadcaster = Arc::new(Broadcaster::new(
        cache.clone(),
        Arc::clone(&directory),
        client,
        identity.rpc_id(),
    ));
    let node = Node::new(cache, arbiter, broadcaster).with_verifier(verifier);
    let app = api::router(node, args.arbiter.timeouts.response);

    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Gracefully shutdown");
        let _ = signal_tx.send(true);
    });

    let served = api::serve(http_listener, app, wait_for_shutdown(shutdown_rx)).await;

    // HTTP may have stopped on its own; take RPC down with it
    let _ = shutdown_tx.send(true);
    match rpc_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!("RPC server failed: {err}"),
        Err(err) => error!("RPC server task failed: {err}"),
    }

    if registered {
        deregister(&directory, &identity).await;
    }
    telemetry::shutdown_tracer();

    served
}

/// Register the HTTP and RPC services. `Ok(false)` means discovery is
/// unavailable and the node runs alone.
async fn register(
    directory: &ConsulDirectory,
    identity: &ServiceIdentity,
    http_port: u16,
    rpc_port: u16,
    options: &discovery_args::Options,
) -> Result<bool> {
    for registration in identity.registrations(http_port, rpc_port, options.advertise_address.as_deref()) {
        if let Err(err) = directory.register(&registration).await {
            if options.required {
                return Err(err)
                    .with_context(|| format!("Failed to register service {}", registration.id));
            }
            warn!(
                service.id = %registration.id,
                error = %err,
                "discovery registration failed, running without peers"
            );
            return Ok(false);
        }
        info!(service.id = %registration.id, port = registration.port, "service registered");
    }
    Ok(true)
}

async fn deregister(directory: &ConsulDirectory, identity: &ServiceIdentity) {
    for id in [identity.http_id(), identity.rpc_id()] {
        match directory.deregister(&id).await {
            Ok(()) => debug!(service.id = %id, "service deregistered"),
            Err(err) => warn!(service.id = %id, error = %err, "failed to deregister service"),
        }
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stop| *stop).await;
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn log_startup_args(args: &Args) {
    let mode = if args.discovery.required {
        "required"
    } else {
        "best effort"
    };
    let entries = [
        ("http_port", args.port.to_string()),
        ("rpc_port", args.rpc_port.to_string()),
        ("max_requests", args.arbiter.max_requests.to_string()),
        (
            "timeouts_ms",
            format!(
                "read={} response={} write={}",
                args.arbiter.timeouts.request_read.as_millis(),
                args.arbiter.timeouts.response.as_millis(),
                args.arbiter.timeouts.response_write.as_millis()
            ),
        ),
        (
            "sweep_interval",
            format!("{}s", args.arbiter.sweep_interval.as_secs()),
        ),
        ("discovery_url", redact_url(&args.discovery.url)),
        (
            "discovery_token_set",
            args.discovery.token.is_some().to_string(),
        ),
        ("service_name", args.discovery.service_name.clone()),
        (
            "userinfo_url",
            args.identity
                .userinfo_url
                .as_deref()
                .map_or_else(|| "none (logins refused)".to_string(), redact_url),
        ),
        ("auth_agent", args.identity.agent.clone()),
        (
            "advertise_address",
            args.discovery
                .advertise_address
                .clone()
                .unwrap_or_else(|| "agent default".to_string()),
        ),
        (
            "bootstrap",
            format!(
                "attempts={} delay={}s required={}",
                args.replication.retry.attempts(),
                args.replication.retry.delay().as_secs(),
                args.replication.required
            ),
        ),
        (
            "rpc_timeout",
            format!("{}s", args.replication.rpc_timeout.as_secs()),
        ),
    ];
    log_entries("Startup configuration", &entries, mode);
}

fn redact_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-url".to_string(),
    }
}

fn log_entries(title: &str, entries: &[(&str, String)], mode: &str) {
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!("{}\n\nDiscovery: {mode}\n\n{title}:", banner());
    for (key, value) in entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn banner() -> String {
    let short_hash = short_commit(crate::GIT_COMMIT_HASH);
    AUTHMESH_BANNER.replace(
        "{VERSION}",
        &format!(" - {} - {}", env!("CARGO_PKG_VERSION"), short_hash),
    )
}

fn short_commit(hash: &str) -> String {
    let trimmed = hash.trim();
    if trimmed.len() > 7 {
        trimmed[..7].to_string()
    } else {
        trimmed.to_string()
    }
}

const AUTHMESH_BANNER: &str = r"
    o-----o
    |\   /|
    | \ / |
    |  o  |   A U T H M E S H {VERSION}
    | / \ |
    |/   \|
    o-----o";

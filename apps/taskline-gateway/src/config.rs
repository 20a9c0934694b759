use anyhow::{Context, Result};
use axum::http::HeaderValue;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(
    name = "taskline-gateway",
    author,
    version,
    about = "Taskline realtime notification and presence gateway"
)]
pub struct Cli {
    /// Address to bind the HTTP/WebSocket listener to.
    #[arg(
        long,
        env = "TASKLINE_GATEWAY_LISTEN_ADDR",
        default_value = "127.0.0.1:8080"
    )]
    pub listen_addr: String,

    /// Shared secret used by the JWT credential verifier.
    #[arg(long, env = "TASKLINE_GATEWAY_AUTH_SECRET")]
    pub auth_secret: String,

    /// Comma-separated list of origins allowed by the browser transport.
    #[arg(
        long,
        env = "TASKLINE_GATEWAY_ALLOWED_ORIGINS",
        default_value = "http://localhost:3000",
        value_delimiter = ','
    )]
    pub allowed_origins: Vec<String>,

    /// Maximum time the credential check may take during the handshake.
    #[arg(
        long,
        env = "TASKLINE_GATEWAY_HANDSHAKE_TIMEOUT_SECS",
        default_value_t = 5
    )]
    pub handshake_timeout_secs: u64,

    /// How often the registry sweeps for dead peers.
    #[arg(
        long,
        env = "TASKLINE_GATEWAY_HEARTBEAT_SWEEP_SECS",
        default_value_t = 30
    )]
    pub heartbeat_sweep_secs: u64,

    /// Sessions with no inbound frame for this long are evicted.
    #[arg(long, env = "TASKLINE_GATEWAY_IDLE_TIMEOUT_SECS", default_value_t = 90)]
    pub idle_timeout_secs: u64,

    /// Malformed frames tolerated per session before it is closed.
    #[arg(
        long,
        env = "TASKLINE_GATEWAY_MALFORMED_FRAME_LIMIT",
        default_value_t = 8
    )]
    pub malformed_frame_limit: u32,

    /// Grace period applied during shutdown.
    #[arg(
        long,
        env = "TASKLINE_GATEWAY_SHUTDOWN_GRACE_SECS",
        default_value_t = 5
    )]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_addr: SocketAddr,
    pub auth_secret: String,
    pub allowed_origins: Vec<HeaderValue>,
    pub handshake_timeout: Duration,
    pub heartbeat_sweep_interval: Duration,
    pub idle_timeout: Duration,
    pub malformed_frame_limit: u32,
    pub shutdown_grace: Duration,
}

impl TryFrom<Cli> for GatewayConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;

        let allowed_origins = cli
            .allowed_origins
            .iter()
            .map(|origin| {
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("invalid allowed origin: {origin}"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GatewayConfig {
            listen_addr,
            auth_secret: cli.auth_secret,
            allowed_origins,
            handshake_timeout: Duration::from_secs(cli.handshake_timeout_secs),
            heartbeat_sweep_interval: Duration::from_secs(cli.heartbeat_sweep_secs),
            idle_timeout: Duration::from_secs(cli.idle_timeout_secs),
            malformed_frame_limit: cli.malformed_frame_limit,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
        })
    }
}

impl GatewayConfig {
    /// Config with test-friendly defaults; the listener address is expected
    /// to be rebound to an ephemeral port by the caller.
    pub fn for_tests(auth_secret: &str) -> Self {
        Self {
            listen_addr: "127.0.0.1:0".parse().expect("static addr"),
            auth_secret: auth_secret.to_string(),
            allowed_origins: Vec::new(),
            handshake_timeout: Duration::from_secs(5),
            heartbeat_sweep_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            malformed_frame_limit: 3,
            shutdown_grace: Duration::from_millis(10),
        }
    }
}

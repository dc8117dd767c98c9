//! CLI command implementations

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, Instant};

use clap::{Args, Subcommand};
use lossy_core::overhead::HeaderOverhead;
use lossy_core::transport::{UdpEndpoint, UdpStream};
use lossy_core::{
    DatagramTransport, ImpairmentConfig, ImpairmentProfile, LossyDatagram, LossyError,
    LossyStream, Result, StreamTransport,
};
use rand::Rng;
use tokio::sync::watch;

/// Largest datagram the relay forwards.
const MAX_DATAGRAM: usize = 65_535;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Send messages of growing size through an impaired loopback socket and report what arrived
    Demo {
        #[command(flatten)]
        profile: ProfileArgs,
        /// Number of messages to send
        #[arg(long, default_value = "32")]
        messages: usize,
        /// Stop reading once nothing arrived for this long
        #[arg(long, default_value = "5000")]
        idle_timeout_ms: u64,
    },
    /// Forward UDP datagrams to an upstream address, impairing both directions
    Relay {
        /// Address clients send to
        #[arg(long)]
        listen: SocketAddr,
        /// Address datagrams are forwarded to
        #[arg(long)]
        upstream: SocketAddr,
        #[command(flatten)]
        profile: ProfileArgs,
    },
    /// Print the header overhead presets
    Overheads {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Impairment flags, layered over `LOSSY_*` environment variables
#[derive(Args, Debug, Default)]
pub struct ProfileArgs {
    /// Bandwidth in bytes per second (0 or negative = unlimited)
    #[arg(long, allow_negative_numbers = true)]
    bandwidth: Option<i64>,
    /// Minimum one-way latency in milliseconds
    #[arg(long)]
    min_latency_ms: Option<u64>,
    /// Maximum one-way latency in milliseconds
    #[arg(long)]
    max_latency_ms: Option<u64>,
    /// Probability of dropping a packet (0.0 to 1.0)
    #[arg(long)]
    loss: Option<f64>,
    /// Header overhead preset (ipv4-min, ipv4-max, ipv6, udpv4-min, udpv4-max, udpv6)
    #[arg(long, conflicts_with = "overhead_bytes")]
    overhead: Option<HeaderOverhead>,
    /// Header overhead in bytes
    #[arg(long)]
    overhead_bytes: Option<usize>,
    /// Seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,
}

impl ProfileArgs {
    fn apply(&self, mut config: ImpairmentConfig) -> ImpairmentConfig {
        if let Some(bandwidth) = self.bandwidth {
            config.bandwidth = bandwidth;
        }
        if let Some(min) = self.min_latency_ms {
            config.min_latency_ms = min;
        }
        if let Some(max) = self.max_latency_ms {
            config.max_latency_ms = max;
        }
        if let Some(loss) = self.loss {
            config.loss_probability = loss;
        }
        if let Some(preset) = self.overhead {
            config.header_overhead = preset.bytes();
        }
        if let Some(bytes) = self.overhead_bytes {
            config.header_overhead = bytes;
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        config
    }

    /// Builds the profile from environment defaults and flags.
    ///
    /// # Errors
    /// - `LossyError::Profile` - Invalid latency range or loss probability
    fn to_profile(&self) -> Result<ImpairmentProfile> {
        Ok(self.apply(ImpairmentConfig::from_env()).to_profile()?)
    }
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> Result<()> {
    match command {
        Commands::Demo {
            profile,
            messages,
            idle_timeout_ms,
        } => {
            run_demo(
                profile.to_profile()?,
                messages,
                Duration::from_millis(idle_timeout_ms),
            )
            .await
        }
        Commands::Relay {
            listen,
            upstream,
            profile,
        } => run_relay(listen, upstream, profile.to_profile()?).await,
        Commands::Overheads { json } => print_overheads(json),
    }
}

fn describe(profile: &ImpairmentProfile) -> String {
    let bandwidth = match profile.bandwidth() {
        Some(bandwidth) => format!("{bandwidth} B/s"),
        None => "unlimited".to_string(),
    };
    format!(
        "bandwidth {bandwidth}, latency {:?}..{:?}, loss {:.1}%, overhead {} B",
        profile.min_latency(),
        profile.max_latency(),
        profile.loss_probability() * 100.0,
        profile.header_overhead()
    )
}

/// Sends messages of size `i * 64` through an impaired connected UDP socket
/// and counts what reaches the other end.
///
/// # Errors
/// - `LossyError::Io` - Socket setup or a synchronous send failed
pub async fn run_demo(profile: ImpairmentProfile, messages: usize, idle: Duration) -> Result<()> {
    let receiver = UdpEndpoint::bind("127.0.0.1:0").await?;
    let receiver_addr = receiver.local_addr()?;
    let sender = LossyStream::new(
        UdpStream::connect("127.0.0.1:0", receiver_addr).await?,
        profile,
    );
    let sender_addr = sender.local_addr()?;

    println!("Impairment: {}", describe(&profile));

    let started = Instant::now();
    let mut bytes_sent = 0;
    for i in 0..messages {
        let mut message = vec![0u8; i * 64];
        rand::rng().fill(&mut message[..]);
        bytes_sent += message.len();
        sender.write(&message).await?;
    }
    println!("Sent {messages} messages with total size of {bytes_sent} bytes");

    let mut buffer = vec![0u8; messages.max(1) * 64];
    let mut received = 0;
    let mut bytes_received = 0;
    let mut last_arrival = started;
    loop {
        receiver
            .set_read_deadline(Some(Instant::now() + idle))
            .await?;
        match receiver.recv_from(&mut buffer).await {
            Ok((n, from)) if from == sender_addr => {
                received += 1;
                bytes_received += n;
                last_arrival = Instant::now();
            }
            Ok((_, from)) => {
                tracing::warn!(%from, "Ignoring datagram from unexpected sender");
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e.into()),
        }
    }

    println!(
        "Received {received} messages with total size of {bytes_received} bytes in {:.3} seconds",
        last_arrival.duration_since(started).as_secs_f64()
    );

    sender.close().await?;
    receiver.close().await?;
    Ok(())
}

/// UDP forwarder impairing both directions with the same profile.
///
/// Datagrams from the most recent client go to `upstream`; datagrams from
/// `upstream` go back to that client.
pub struct Relay {
    downstream: LossyDatagram<UdpEndpoint>,
    upstream_socket: LossyDatagram<UdpEndpoint>,
    upstream: SocketAddr,
}

impl Relay {
    /// Binds the listening socket and an ephemeral socket facing upstream.
    ///
    /// # Errors
    /// - `LossyError::Io` - Binding either socket failed
    pub async fn bind(
        listen: SocketAddr,
        upstream: SocketAddr,
        profile: ImpairmentProfile,
    ) -> Result<Self> {
        let upstream_bind = if upstream.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };

        Ok(Self {
            downstream: LossyDatagram::new(UdpEndpoint::bind(listen).await?, profile),
            upstream_socket: LossyDatagram::new(UdpEndpoint::bind(upstream_bind).await?, profile),
            upstream,
        })
    }

    /// Address clients send to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.downstream.local_addr()?)
    }

    /// Forwards in both directions until a socket fails.
    ///
    /// # Errors
    /// - `LossyError::Io` - Receiving or a synchronous send failed
    pub async fn forward(self) -> Result<()> {
        let (client_tx, client_rx) = watch::channel(None);
        tokio::select! {
            result = forward_to_upstream(&self.downstream, &self.upstream_socket, self.upstream, client_tx) => result,
            result = forward_to_client(&self.upstream_socket, &self.downstream, self.upstream, client_rx) => result,
        }
    }
}

/// Relays datagrams between the most recent client and `upstream` until
/// Ctrl-C.
///
/// # Errors
/// - `LossyError::Io` - Binding failed or a socket error occurred while relaying
pub async fn run_relay(
    listen: SocketAddr,
    upstream: SocketAddr,
    profile: ImpairmentProfile,
) -> Result<()> {
    let relay = Relay::bind(listen, upstream, profile).await?;
    let listen_addr = relay.local_addr()?;

    tracing::info!(
        listen = %listen_addr,
        %upstream,
        "Relay started: {}",
        describe(&profile)
    );

    tokio::select! {
        result = relay.forward() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down relay");
            Ok(())
        }
    }
}

async fn forward_to_upstream(
    downstream: &LossyDatagram<UdpEndpoint>,
    upstream_socket: &LossyDatagram<UdpEndpoint>,
    upstream: SocketAddr,
    client: watch::Sender<Option<SocketAddr>>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = downstream.recv_from(&mut buf).await?;
        if *client.borrow() != Some(from) {
            tracing::info!(client = %from, "Relaying for new client");
            client.send_replace(Some(from));
        }
        upstream_socket.send_to(&buf[..n], upstream).await?;
    }
}

async fn forward_to_client(
    upstream_socket: &LossyDatagram<UdpEndpoint>,
    downstream: &LossyDatagram<UdpEndpoint>,
    upstream: SocketAddr,
    client: watch::Receiver<Option<SocketAddr>>,
) -> Result<()> {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = upstream_socket.recv_from(&mut buf).await?;
        if from != upstream {
            tracing::debug!(%from, "Ignoring datagram from unknown upstream");
            continue;
        }
        let target = *client.borrow();
        match target {
            Some(target) => {
                downstream.send_to(&buf[..n], target).await?;
            }
            None => tracing::debug!("Reply before any client, discarding"),
        }
    }
}

/// Prints the header overhead presets.
///
/// # Errors
/// - `LossyError::Configuration` - JSON rendering failed
pub fn print_overheads(json: bool) -> Result<()> {
    if json {
        let rows: Vec<serde_json::Value> = HeaderOverhead::ALL
            .iter()
            .map(|preset| {
                serde_json::json!({
                    "name": preset,
                    "bytes": preset.bytes(),
                    "composition": preset.composition(),
                })
            })
            .collect();
        let rendered =
            serde_json::to_string_pretty(&rows).map_err(|e| LossyError::Configuration {
                reason: format!("Failed to render overheads: {e}"),
            })?;
        println!("{rendered}");
        return Ok(());
    }

    println!("{:<10} {:>5}  Composition", "Preset", "Bytes");
    println!("{:-<50}", "");
    for preset in HeaderOverhead::ALL {
        println!(
            "{:<10} {:>5}  {}",
            preset.to_string(),
            preset.bytes(),
            preset.composition()
        );
    }
    Ok(())
}

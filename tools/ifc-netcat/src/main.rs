// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ifc-netcat - TCP/UDP echo, send and connect-probe tool
//!
//! Exercises the ifc-net servers, clients and connector pool from the shell.

use clap::{Parser, Subcommand};
use colored::*;
use ifc_net::{
    resolve_peer, ConnectorCallback, ConnectorPool, ConnectorPoolConfig, PeerAddr, TcpClient,
    TcpConnection, TcpServer, TcpServerConfig, UdpEndpoint, UdpServer, UdpServerConfig,
};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Polling cadence of the idle loops
const IDLE_TICK: Duration = Duration::from_millis(10);

/// TCP/UDP test tool
#[derive(Parser, Debug)]
#[command(name = "ifc-netcat")]
#[command(version = "0.1.0")]
#[command(about = "TCP/UDP echo servers, senders and connect probes")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Interface to bind servers on
    #[arg(short, long, default_value = "0.0.0.0", global = true)]
    bind: Ipv4Addr,

    /// Set SO_REUSEADDR before binding
    #[arg(long, global = true)]
    force_bind: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Echo every TCP connection's bytes back to it
    TcpEcho {
        /// Port to listen on
        #[arg(short, long)]
        port: u16,
    },
    /// Connect, send a message and print the echo
    TcpSend {
        /// Target host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Target port
        #[arg(short, long)]
        port: u16,

        /// Message to send
        #[arg(short, long, default_value = "ping")]
        message: String,

        /// Connect and receive timeout in milliseconds
        #[arg(short, long, default_value = "2000")]
        timeout_ms: u64,
    },
    /// Echo every UDP datagram back to its sender
    UdpEcho {
        /// Port to listen on
        #[arg(short, long)]
        port: u16,

        /// Listener threads (defaults to IFC_UDP_THREADS or 2)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Send a datagram and wait for a reply
    UdpSend {
        /// Target host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Target port
        #[arg(short, long)]
        port: u16,

        /// Message to send
        #[arg(short, long, default_value = "ping")]
        message: String,

        /// Send the datagram this many times
        #[arg(long, default_value = "1")]
        times: u32,

        /// How long to wait for a reply in milliseconds (0 = do not wait)
        #[arg(short, long, default_value = "1000")]
        wait_ms: u64,
    },
    /// Connect to many host:port targets through the connector pool
    Probe {
        /// Targets as host:port
        #[arg(required = true)]
        targets: Vec<String>,

        /// Per-target timeout in milliseconds (defaults to IFC_CONNECT_TIMEOUT_MS or 5000)
        #[arg(short, long)]
        timeout_ms: Option<u64>,
    },
}

fn main() {
    // Initialize logger for RUST_LOG-based debug output
    env_logger::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    match &args.mode {
        Mode::TcpEcho { port } => run_tcp_echo(args, *port, running),
        Mode::TcpSend {
            host,
            port,
            message,
            timeout_ms,
        } => run_tcp_send(host, *port, message, Duration::from_millis(*timeout_ms)),
        Mode::UdpEcho { port, threads } => run_udp_echo(args, *port, *threads, running),
        Mode::UdpSend {
            host,
            port,
            message,
            times,
            wait_ms,
        } => run_udp_send(host, *port, message, *times, Duration::from_millis(*wait_ms)),
        Mode::Probe {
            targets,
            timeout_ms,
        } => run_probe(targets, timeout_ms.map(Duration::from_millis), running),
    }
}

fn wait_for_ctrlc(running: &AtomicBool) {
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }
}

// ============================================================================
// TCP
// ============================================================================

fn run_tcp_echo(
    args: &Args,
    port: u16,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = TcpServerConfig::new(port)
        .with_bind_address(args.bind)
        .with_force_bind(args.force_bind)
        .with_nodelay(true);
    let mut server = TcpServer::new(config);

    let conn_running = running.clone();
    server.on_accepted(Arc::new(move |conn: TcpConnection| {
        let running = conn_running.clone();
        let spawned = thread::Builder::new()
            .name(format!("echo-{}", conn.id()))
            .spawn(move || echo_connection(conn, &running));
        if let Err(e) = spawned {
            log::warn!("cannot spawn echo thread: {}", e);
        }
    }));
    server.open()?;

    eprintln!("{} TCP echo on {}:{}", ">>>".green().bold(), args.bind, port);
    eprintln!("{}", "    Press Ctrl+C to stop".dimmed());
    wait_for_ctrlc(&running);

    server.close();
    let metrics = server.metrics();
    eprintln!(
        "\n{} {} connections accepted",
        "---".dimmed(),
        metrics.accepted
    );
    Ok(())
}

fn echo_connection(mut conn: TcpConnection, running: &AtomicBool) {
    let peer = conn.peer_addr();
    eprintln!("{} {} connected", "+".green(), peer);

    let mut buf = vec![0u8; 16 * 1024];
    let mut total = 0usize;
    while running.load(Ordering::SeqCst) {
        match conn.recv_async(&mut buf) {
            Ok(0) => thread::sleep(IDLE_TICK),
            Ok(n) => match conn.send_sync(&buf[..n], Some(Duration::from_secs(5))) {
                Ok(sent) => total += sent,
                Err(_) => break,
            },
            Err(_) => break,
        }
    }

    conn.disconnect();
    eprintln!("{} {} closed ({} bytes echoed)", "-".yellow(), peer, total);
}

fn run_tcp_send(
    host: &str,
    port: u16,
    message: &str,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = TcpClient::new()?;
    let start = Instant::now();
    client.connect_timeout(host, port, timeout)?;
    eprintln!(
        "{} connected to {} in {:?}",
        ">>>".green().bold(),
        client.peer_addr(),
        start.elapsed()
    );

    let sent = client.send_sync(message.as_bytes(), Some(timeout))?;
    let mut reply = vec![0u8; sent];
    let received = client.recv_sync(&mut reply, Some(timeout))?;
    client.disconnect();

    if received == 0 {
        eprintln!("{}", "    no reply".yellow());
    } else {
        println!("{}", String::from_utf8_lossy(&reply[..received]));
    }
    Ok(())
}

// ============================================================================
// UDP
// ============================================================================

fn run_udp_echo(
    args: &Args,
    port: u16,
    threads: Option<usize>,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = UdpServerConfig::from_env()
        .with_port(port)
        .with_bind_address(args.bind)
        .with_force_bind(args.force_bind);
    if let Some(threads) = threads {
        config = config.with_thread_count(threads);
    }

    // Replies leave from a separate socket; senders accept any source.
    let mut reply = UdpEndpoint::new()?;
    reply.open()?;
    let reply = Arc::new(reply);

    let mut server = UdpServer::new(config);
    let replier = reply.clone();
    server.on_receive(Arc::new(move |data: &[u8], peer: PeerAddr| {
        if let Err(e) = replier.send_buffer(data, peer, 1) {
            log::debug!("reply to {} failed: {}", peer, e);
        }
    }));
    server.open()?;

    eprintln!(
        "{} UDP echo on {} with {} threads",
        ">>>".green().bold(),
        server.local_addr()?,
        server.max_thread_count()
    );
    eprintln!("{}", "    Press Ctrl+C to stop".dimmed());
    wait_for_ctrlc(&running);

    server.close();
    let metrics = server.metrics();
    eprintln!(
        "\n{} Echoed {} datagrams ({} bytes, {:.1}/s)",
        "---".dimmed(),
        metrics.datagrams_received,
        metrics.bytes_received,
        metrics.datagram_rate()
    );
    Ok(())
}

fn run_udp_send(
    host: &str,
    port: u16,
    message: &str,
    times: u32,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let peer = resolve_peer(host, port)?;

    let mut endpoint = UdpEndpoint::new()?;
    endpoint.set_block_mode(false)?;
    endpoint.open()?;
    endpoint.bind(0, false)?;

    let sent = endpoint.send_buffer(message.as_bytes(), peer, times)?;
    eprintln!("{} sent {} bytes x{} to {}", ">>>".green().bold(), sent, times.max(1), peer);

    if wait.is_zero() {
        return Ok(());
    }

    let deadline = Instant::now() + wait;
    let mut buf = vec![0u8; 64 * 1024];
    while Instant::now() < deadline {
        if let Some((n, from)) = endpoint.recv_buffer_from(&mut buf)? {
            eprintln!("    reply from {}", from);
            println!("{}", String::from_utf8_lossy(&buf[..n]));
            return Ok(());
        }
        thread::sleep(IDLE_TICK);
    }
    eprintln!("{}", "    no reply".yellow());
    Ok(())
}

// ============================================================================
// Connector probe
// ============================================================================

fn parse_target(target: &str) -> Result<(String, u16), String> {
    let (host, port) = target
        .rsplit_once(':')
        .ok_or_else(|| format!("target '{}' is not host:port", target))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| format!("invalid port in '{}'", target))?;
    Ok((host.to_string(), port))
}

fn run_probe(
    targets: &[String],
    timeout: Option<Duration>,
    running: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = ConnectorPool::new(ConnectorPoolConfig::from_env());
    pool.start()?;

    let (tx, rx) = mpsc::channel();
    let tx = std::sync::Mutex::new(tx);
    let on_done: ConnectorCallback = Arc::new(move |client: TcpClient, ok: bool| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send((client.id(), client.peer_addr(), ok));
        }
    });

    let mut labels = Vec::new();
    for target in targets {
        let (host, port) = parse_target(target)?;
        let id = pool.add_task(TcpClient::new()?, &host, port, on_done.clone(), timeout)?;
        labels.push((id, target.clone()));
    }

    let start = Instant::now();
    let mut done = 0;
    while done < labels.len() && running.load(Ordering::SeqCst) {
        let Ok((id, peer, ok)) = rx.recv_timeout(Duration::from_millis(100)) else {
            continue;
        };
        done += 1;
        let label = labels
            .iter()
            .find(|(task, _)| *task == id)
            .map_or("?", |(_, label)| label.as_str());
        if ok {
            println!("{} {} ({}) {:?}", "open  ".green().bold(), label, peer, start.elapsed());
        } else {
            println!("{} {} {:?}", "closed".red().bold(), label, start.elapsed());
        }
    }

    if done < labels.len() {
        let cancelled = pool.remove_tasks(&on_done);
        eprintln!(
            "{} {} probes interrupted ({} still queued)",
            "---".dimmed(),
            labels.len() - done,
            cancelled.len()
        );
    }
    pool.stop();

    let metrics = pool.metrics();
    eprintln!(
        "{} {} open, {} closed ({} timed out)",
        "---".dimmed(),
        metrics.connected,
        metrics.failed,
        metrics.timed_out
    );
    Ok(())
}

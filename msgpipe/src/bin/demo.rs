//! Message pipe demo.
//!
//! Creates one device, then runs reader and writer threads against it until
//! the configured duration elapses. Writers send random uppercase messages
//! sized between a third of the capacity and the full capacity; readers drain
//! with a 16-byte buffer. At the end every session is interrupted and the
//! pipe's counters are printed.
//!
//! # Usage
//!
//! ```sh
//! msgpipe-demo --capacity 64 --readers 2 --writers 2 --duration 3
//! RUST_LOG=msgpipe=trace cargo run --features tracing --bin msgpipe-demo
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::Rng;
use thiserror::Error;

use msgpipe::{CancelToken, OpenMode, PipeConfig, Registry, RegistryError};

/// Device name used by the demo.
const DEVICE: &str = "/shofer";

/// Default run time in seconds.
const DEFAULT_DURATION_SECS: u64 = 2;

/// Reader buffer size, as in the classic lab client.
const READ_CHUNK: usize = 16;

#[derive(Debug, Error)]
enum DemoError {
    #[error("{0}")]
    Args(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to spawn client thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("a client thread panicked")]
    Panicked,
    #[error("byte counters do not balance")]
    Unbalanced,
}

struct DemoConfig {
    pipe: PipeConfig,
    readers: usize,
    writers: usize,
    duration: Duration,
}

/// What one client thread moved through the pipe.
#[derive(Debug, Default)]
struct ClientReport {
    bytes: u64,
    operations: u64,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("msgpipe-demo: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), DemoError> {
    let args: Vec<String> = std::env::args().collect();
    let config = parse_args(&args)?;

    msgpipe::init_tracing();

    let registry = Registry::new();
    let pipe = registry.create_device(DEVICE, config.pipe)?;
    eprintln!(
        "msgpipe-demo: {DEVICE} capacity={} max_sessions={} readers={} writers={}",
        config.pipe.capacity, config.pipe.max_sessions, config.readers, config.writers
    );

    let stop = Arc::new(AtomicBool::new(false));
    let mut tokens = Vec::new();
    let mut readers = Vec::new();
    let mut writers = Vec::new();

    for id in 0..config.readers {
        let session = registry.open(DEVICE, OpenMode::ReadOnly)?;
        tokens.push(session.cancel_token());
        readers.push(spawn_client(format!("reader-{id}"), move || {
            let mut report = ClientReport::default();
            let mut buf = [0u8; READ_CHUNK];
            while let Ok(n) = session.read(&mut buf) {
                report.bytes += n as u64;
                report.operations += 1;
            }
            report
        })?);
    }

    let capacity = config.pipe.capacity;
    for id in 0..config.writers {
        let session = registry.open(DEVICE, OpenMode::WriteOnly)?;
        tokens.push(session.cancel_token());
        let stop = Arc::clone(&stop);
        writers.push(spawn_client(format!("writer-{id}"), move || {
            let mut report = ClientReport::default();
            let mut rng = rand::rng();
            while !stop.load(Ordering::Relaxed) {
                let message = random_message(&mut rng, capacity);
                let Ok(n) = session.write(&message) else {
                    break;
                };
                report.bytes += n as u64;
                report.operations += 1;
                thread::sleep(Duration::from_millis(rng.random_range(1..20)));
            }
            report
        })?);
    }

    thread::sleep(config.duration);
    stop.store(true, Ordering::Relaxed);
    interrupt_all(&tokens);

    let written = join_all(writers)?;
    let read = join_all(readers)?;

    let stats = pipe.stats();
    registry.shutdown();

    eprintln!(
        "msgpipe-demo: writers sent {} bytes in {} messages",
        written.bytes, written.operations
    );
    eprintln!(
        "msgpipe-demo: readers got {} bytes in {} reads",
        read.bytes, read.operations
    );
    eprintln!("msgpipe-demo: {stats:#?}");

    if !stats.is_conserved()
        || stats.bytes_written != written.bytes
        || stats.bytes_read != read.bytes
    {
        return Err(DemoError::Unbalanced);
    }
    Ok(())
}

/// Uppercase text of random length in `capacity/3 ..= capacity`.
fn random_message(rng: &mut impl Rng, capacity: usize) -> Vec<u8> {
    let len = rng.random_range((capacity / 3).max(1)..=capacity);
    (0..len).map(|_| rng.random_range(b'A'..=b'Z')).collect()
}

fn spawn_client<F>(name: String, f: F) -> Result<JoinHandle<ClientReport>, DemoError>
where
    F: FnOnce() -> ClientReport + Send + 'static,
{
    Ok(thread::Builder::new().name(name).spawn(f)?)
}

/// Interrupts every client's current or next blocking wait.
///
/// Writers also watch the stop flag, since a writer that never has to wait
/// would not notice a pending cancellation. Readers always end up blocking
/// once writers are gone.
fn interrupt_all(tokens: &[CancelToken]) {
    for token in tokens {
        token.cancel();
    }
}

fn join_all(handles: Vec<JoinHandle<ClientReport>>) -> Result<ClientReport, DemoError> {
    let mut total = ClientReport::default();
    for handle in handles {
        let report = handle.join().map_err(|_| DemoError::Panicked)?;
        total.bytes += report.bytes;
        total.operations += report.operations;
    }
    Ok(total)
}

/// Parses command line arguments into a DemoConfig.
fn parse_args(args: &[String]) -> Result<DemoConfig, DemoError> {
    let mut pipe = PipeConfig::default();
    let mut readers: usize = 1;
    let mut writers = 1;
    let mut duration_secs = DEFAULT_DURATION_SECS;

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--capacity" | "-c" => pipe.capacity = parse_value(args, &mut i, flag)?,
            "--max-sessions" | "-m" => pipe.max_sessions = parse_value(args, &mut i, flag)?,
            "--readers" | "-r" => readers = parse_value(args, &mut i, flag)?,
            "--writers" | "-w" => writers = parse_value(args, &mut i, flag)?,
            "--duration" | "-d" => duration_secs = parse_value(args, &mut i, flag)?,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            arg => return Err(DemoError::Args(format!("unknown argument: {arg}"))),
        }
        i += 1;
    }

    if readers.saturating_add(writers) > pipe.max_sessions {
        return Err(DemoError::Args(format!(
            "{readers} readers and {writers} writers exceed --max-sessions {}",
            pipe.max_sessions
        )));
    }

    Ok(DemoConfig {
        pipe,
        readers,
        writers,
        duration: Duration::from_secs(duration_secs),
    })
}

/// Advances past `flag` and parses the value that follows it.
fn parse_value<T>(args: &[String], i: &mut usize, flag: &str) -> Result<T, DemoError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    *i += 1;
    let Some(raw) = args.get(*i) else {
        return Err(DemoError::Args(format!("missing value for {flag}")));
    };
    raw.parse()
        .map_err(|e| DemoError::Args(format!("invalid value for {flag}: {e}")))
}

fn print_usage() {
    eprintln!(
        r#"msgpipe-demo - bounded message pipe demo

USAGE:
    msgpipe-demo [OPTIONS]

OPTIONS:
    -c, --capacity <BYTES>      Pipe capacity (default: 64)
    -m, --max-sessions <N>      Simultaneous sessions allowed (default: 5)
    -r, --readers <N>           Reader threads (default: 1)
    -w, --writers <N>           Writer threads (default: 1)
    -d, --duration <SECS>       Run time before interrupting clients (default: 2)
    -h, --help                  Print this help message

EXAMPLE:
    msgpipe-demo --capacity 64 --readers 2 --writers 3 --duration 5
"#
    );
}

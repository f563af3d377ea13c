//! strand-bench: consumer throughput benchmark
//!
//! Produces a batch of messages to partition 0 of an embedded engine, then
//! repeatedly assigns the partition at its first offset and times how long
//! it takes to read everything back.
//!
//! # Usage
//!
//! ```text
//! strand-bench --messages 1000000 --msg-size 100 --runs 3 --mode consume
//! strand-bench --headers 2 --mode poll
//! strand-bench --mode stream --config consumer.toml
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, ValueEnum};
use strand_client::{
    ClientConfig, ClientError, Consumer, ConsumerStream, Result, StreamConfig,
};
use strand_core::{Engine, Offset, TopicPartitionOffset};
use strand_engine::MemoryEngine;
use tracing::{error, info, warn};

/// How records are read during the timed section
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// One engine event per call
    Poll,
    /// Block until a record arrives
    Consume,
    /// Async channel fed by a polling thread
    Stream,
}

/// strand consumer throughput benchmark
#[derive(Parser, Debug, Clone)]
#[command(name = "strand-bench", about = "Consumer throughput benchmark for strand")]
struct Args {
    /// Topic to produce to and consume from
    #[arg(long, short = 't', default_value = "bench-topic")]
    topic: String,

    /// Number of messages produced and consumed per run
    #[arg(long, short = 'n', default_value = "100000")]
    messages: usize,

    /// Message payload size in bytes
    #[arg(long, short = 's', default_value = "100")]
    msg_size: usize,

    /// Headers attached to every message; 0 also disables header delivery
    #[arg(long, default_value = "0")]
    headers: usize,

    /// Offset of the first message
    #[arg(long, default_value = "0")]
    first_offset: i64,

    /// Number of timed runs
    #[arg(long, short = 'r', default_value = "3")]
    runs: usize,

    /// Read mode
    #[arg(long, short = 'm', value_enum, default_value = "consume")]
    mode: Mode,

    /// Client properties file (TOML or JSON)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Give up on a run after this many seconds
    #[arg(long, default_value = "60")]
    timeout: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!("Benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn consumer_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::new(),
    };
    if config.get("group.id").is_none() {
        config = config.group_id("benchmark-consumer-group");
    }
    Ok(config
        .session_timeout(Duration::from_secs(6))
        .enable_partition_eof(false)
        .set("strand.consumer.enable.headers", args.headers != 0)
        .set("strand.consumer.enable.timestamps", false))
}

async fn run(args: Args) -> Result<()> {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_topic_at(&args.topic, 1, args.first_offset);
    let payload = vec![0xA5u8; args.msg_size];
    let names: Vec<String> = (0..args.headers).map(|i| format!("header-{i}")).collect();
    let headers: Vec<(&str, &[u8])> = names.iter().map(|n| (n.as_str(), n.as_bytes())).collect();
    for _ in 0..args.messages {
        engine
            .produce_with_headers(&args.topic, 0, None, &payload, &headers)
            .map_err(|code| ClientError::Engine {
                code,
                reason: "produce".to_string(),
            })?;
    }

    let dyn_engine: Arc<dyn Engine> = engine.clone();
    let mut consumer = Consumer::new(dyn_engine, &consumer_config(&args)?)?;
    let start = [TopicPartitionOffset::new(
        args.topic.clone(),
        0,
        Offset::Offset(args.first_offset),
    )];

    info!("strand-bench");
    info!("  topic:     {}", args.topic);
    info!("  messages:  {}", args.messages);
    info!("  msg size:  {} bytes", args.msg_size);
    info!("  headers:   {}", args.headers);
    info!("  runs:      {}", args.runs);
    info!("  mode:      {:?}", args.mode);

    let budget = Duration::from_secs(args.timeout);
    let target = args.messages.saturating_sub(1);

    for run in 1..=args.runs {
        info!("{} consuming from {} [{:?}] run {run}", consumer.name(), args.topic, args.mode);
        consumer.assign(&start)?;

        // Read one message before timing to leave out one-off startup costs
        if consumer.consume(Duration::from_secs(10))?.is_none() {
            warn!("No warm-up message within 10s");
        }

        let started = Instant::now();
        let (returned, count) = match args.mode {
            Mode::Stream => stream_run(consumer, target, budget).await?,
            mode => tokio::task::spawn_blocking(move || blocking_run(consumer, mode, target, budget))
                .await
                .map_err(|e| ClientError::IoError(std::io::Error::other(e)))??,
        };
        consumer = returned;
        report(count, started.elapsed());
        if count < target {
            warn!("Run {run} timed out after {count} of {target} messages");
        }
    }

    consumer.close()?;
    Ok(())
}

fn blocking_run(
    mut consumer: Consumer,
    mode: Mode,
    target: usize,
    budget: Duration,
) -> Result<(Consumer, usize)> {
    let deadline = Instant::now() + budget;
    let mut count = 0;
    while count < target && Instant::now() < deadline {
        let record = match mode {
            Mode::Poll => consumer.poll(Duration::from_secs(1))?,
            _ => consumer.consume(Duration::from_secs(1))?,
        };
        if record.is_some_and(|r| r.is_data()) {
            count += 1;
        }
    }
    Ok((consumer, count))
}

async fn stream_run(consumer: Consumer, target: usize, budget: Duration) -> Result<(Consumer, usize)> {
    let mut stream = ConsumerStream::spawn(consumer, StreamConfig::default());
    let mut count = 0;
    let counted = tokio::time::timeout(budget, async {
        while count < target {
            match stream.recv().await {
                Some(Ok(record)) if record.is_data() => count += 1,
                Some(Ok(_)) => {},
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        Ok(())
    })
    .await;
    if let Ok(Err(e)) = counted {
        return Err(e);
    }
    Ok((stream.stop().await?, count))
}

#[allow(clippy::cast_precision_loss)]
fn report(count: usize, elapsed: Duration) {
    let ms = elapsed.as_secs_f64() * 1000.0;
    info!("Consumed {count} messages in {ms:.0}ms");
    if ms > 0.0 {
        info!("{:.0}k msg/s", count as f64 / ms);
    }
}

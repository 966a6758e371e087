// src/lib.rs

pub mod bot;
pub mod broker;
pub mod chain;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod handler;
pub mod logging;
pub mod metrics;
pub mod nonce;
pub mod state;
pub mod trigger;
pub mod types;
pub mod worker;

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};

pub use crate::bot::{Bot, BotBuilder};
pub use crate::engine::{HaltReason, RunReport, Runtime, RuntimeBuilder};
pub use crate::handler::{EventFilter, HandlerContext, HandlerError, MetricFilter};
pub use crate::metrics::{Datapoint, Measurement};
pub use crate::trigger::{TriggerPayload, TriggerSources};

use crate::broker::{Broker, DistributedBroker, InMemoryBroker, LoopbackQueue, MessageQueue};
use crate::chain::{NonceSource, Signer};
use crate::cli::{CliArgs, Command};
use crate::handler::Dependencies;
use crate::state::SharedState;
use crate::worker::WorkerPool;
use crate::config::{load_or_default, BotConfig};
use crate::nonce::NonceManager;
use crate::types::BrokerKind;

/// Signing account for bots that send transactions.
pub struct ChainAccess {
    pub signer: Arc<dyn Signer>,
    pub nonce_source: Arc<dyn NonceSource>,
}

/// High-level entry point used by `main.rs`.
///
/// Loads config (CLI overrides applied), picks the broker and seeds the
/// nonce manager, then runs the bot until it halts. Returns `None` for
/// `--dry-run`.
///
/// `queue` is the message queue client for `broker.kind = "distributed"`.
/// Without one the work only reaches this process's own workers, so at least
/// one local worker is required.
pub async fn run(
    args: CliArgs,
    bot: Bot,
    sources: TriggerSources,
    account: Option<ChainAccess>,
    queue: Option<Arc<dyn MessageQueue>>,
) -> Result<Option<RunReport>> {
    let cfg = load_config(&args)?;

    if args.dry_run {
        print_dry_run(&cfg, &bot);
        return Ok(None);
    }

    let broker: Arc<dyn Broker> = match (cfg.broker.kind, queue) {
        (BrokerKind::Memory, queue) => {
            if queue.is_some() {
                warn!("message queue client ignored by the memory broker");
            }
            Arc::new(InMemoryBroker::new())
        }
        (BrokerKind::Distributed, Some(queue)) => {
            Arc::new(DistributedBroker::new(queue, &cfg.broker.queue))
        }
        (BrokerKind::Distributed, None) => {
            if cfg.broker.workers == 0 {
                bail!(
                    "broker.kind = \"distributed\" with broker.workers = 0 needs a message \
                     queue client; nothing would ever execute queued work"
                );
            }
            warn!(
                queue = %cfg.broker.queue,
                "no message queue client supplied; using in-process loopback queue"
            );
            Arc::new(DistributedBroker::new(
                Arc::new(LoopbackQueue::new()),
                &cfg.broker.queue,
            ))
        }
    };

    let mut builder = Runtime::builder(bot, cfg.clone())
        .broker(broker)
        .sources(sources)
        .handle_signals(true);

    if let Some(account) = account {
        let nonce = NonceManager::from_chain(account.nonce_source, cfg.nonce).await?;
        info!(address = %account.signer.address(), "signing account loaded");
        builder = builder.signer(account.signer, Arc::new(nonce));
    }

    let report = builder.build().run().await?;
    Ok(Some(report))
}

/// Worker-process entry point: pull work for `bot` from `queue` until a
/// termination signal arrives.
pub async fn run_worker(
    args: CliArgs,
    bot: Bot,
    queue: Arc<dyn MessageQueue>,
    account: Option<ChainAccess>,
) -> Result<()> {
    run_worker_until(args, bot, queue, account, async {
        if let Err(e) = engine::signals::wait_for_shutdown_signal().await {
            warn!(error = %e, "failed to listen for shutdown signals");
        }
    })
    .await
}

/// [`run_worker`] with an explicit stop condition.
///
/// Workers start, run their `WORKER_STARTUP` hooks and then serve the
/// distributed queue named by `[broker].queue` until `shutdown` completes.
/// There is no lifecycle loop here: the runtime process owns triggers,
/// failure counting and halting.
pub async fn run_worker_until<F>(
    args: CliArgs,
    bot: Bot,
    queue: Arc<dyn MessageQueue>,
    account: Option<ChainAccess>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let cfg = load_config(&args)?;
    let (workers, shutdown_timeout) = match args.command {
        Some(Command::Worker {
            workers,
            shutdown_timeout,
        }) => (
            workers.unwrap_or(cfg.broker.workers),
            shutdown_timeout.unwrap_or(cfg.drain_timeout),
        ),
        _ => (cfg.broker.workers, cfg.drain_timeout),
    };
    if workers == 0 {
        bail!("worker process needs at least one worker");
    }
    if cfg.broker.kind != BrokerKind::Distributed {
        warn!("[broker].kind is not \"distributed\"; serving the queue anyway");
    }

    let mut deps = Dependencies::new(SharedState::new());
    if let Some(account) = account {
        let nonce = NonceManager::from_chain(account.nonce_source, cfg.nonce).await?;
        info!(address = %account.signer.address(), "signing account loaded");
        deps = deps.with_signer(account.signer, Arc::new(nonce));
    }

    let broker: Arc<dyn Broker> = Arc::new(DistributedBroker::new(queue, &cfg.broker.queue));
    info!(
        bot = %bot.name(),
        workers,
        queue = %cfg.broker.queue,
        fingerprint = %bot.registry().fingerprint(),
        "worker process starting"
    );

    let mut pool = WorkerPool::spawn(workers, Arc::clone(bot.registry()), Arc::clone(&broker), deps);
    let ready = pool.wait_ready(cfg.startup_timeout).await;
    if ready.is_ok() {
        shutdown.await;
        info!("worker process stopping");
    }
    broker.close();
    pool.shutdown(shutdown_timeout).await;
    ready?;
    Ok(())
}

fn load_config(args: &CliArgs) -> Result<BotConfig> {
    let mut cfg = load_or_default(&args.config)?;
    if let Some(limit) = args.max_exceptions {
        if limit == 0 {
            bail!("--max-exceptions must be at least 1");
        }
        cfg.max_exceptions = limit;
    }
    Ok(cfg)
}

/// Print config and handlers without running anything.
fn print_dry_run(cfg: &BotConfig, bot: &Bot) {
    println!("chainbot dry-run");
    println!("  bot.name = {}", bot.name());
    println!("  bot.max_exceptions = {}", cfg.max_exceptions);
    println!("  bot.failure_window = {:?}", cfg.failure_window);
    println!("  bot.drain_timeout = {:?}", cfg.drain_timeout);
    println!("  bot.startup_timeout = {:?}", cfg.startup_timeout);
    println!(
        "  broker = {:?} (workers = {}, queue = {})",
        cfg.broker.kind, cfg.broker.workers, cfg.broker.queue
    );
    println!("  nonce = {:?}", cfg.nonce);
    println!("  metrics.history = {}", cfg.metric_history);
    if let Some(path) = &cfg.snapshot_path {
        println!("  state.snapshot = {}", path.display());
    }
    println!("  registry fingerprint = {}", bot.registry().fingerprint());
    println!();

    for reg in bot.registry().iter() {
        println!("[{}] {} ({})", reg.id, reg.name, reg.task_type());
        match &reg.filter {
            handler::TriggerFilter::EventLog(filter) => {
                println!("  signature = {}", filter.signature);
                if let Some(contract) = &filter.contract_address {
                    println!("  contract = {contract}");
                }
                for (name, value) in &filter.args {
                    println!("  where {name} == {value}");
                }
            }
            handler::TriggerFilter::Cron(schedule) => {
                println!("  cron = {}", schedule.expression());
            }
            handler::TriggerFilter::MetricCallback(filter) => {
                let preds: Vec<String> = filter
                    .predicates
                    .iter()
                    .map(|p| format!("{} {}", p.op.symbol(), p.threshold))
                    .collect();
                println!("  metric = {} [{}]", filter.metric, preds.join(" && "));
            }
            _ => {}
        }
    }

    for (name, default) in bot.parameters() {
        println!("parameter {name} = {default}");
    }
}

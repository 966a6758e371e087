// src/main.rs

//! Demo bot on a local dev chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chainbot::broker::{LoopbackQueue, MessageQueue};
use chainbot::chain::{DevChain, DevSigner, TransactionRequest, ZERO_ADDRESS};
use chainbot::cli::Command;
use chainbot::handler::HandlerOutcome;
use chainbot::{
    cli, logging, run, run_worker, Bot, ChainAccess, HandlerContext, HandlerError, Measurement,
    MetricFilter, TriggerPayload, TriggerSources,
};
use tracing::info;

#[tokio::main]
async fn main() {
    match run_main().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("chainbot error: {err:?}");
            std::process::exit(1);
        }
    }
}

async fn run_main() -> anyhow::Result<i32> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;

    let bot = demo_bot()?;
    let signer = Arc::new(DevSigner::new("0x00000000000000000000000000000000000000b0", 0));
    let account = ChainAccess {
        signer: signer.clone(),
        nonce_source: signer,
    };

    if matches!(args.command, Some(Command::Worker { .. })) {
        // The demo has no external queue client; a loopback queue only
        // reaches workers inside this process.
        let queue: Arc<dyn MessageQueue> = Arc::new(LoopbackQueue::new());
        run_worker(args, bot, queue, Some(account)).await?;
        return Ok(0);
    }

    let (blocks, _producer) = DevChain::new(Duration::from_secs(2), 1).spawn();
    let sources = TriggerSources::new().with_blocks(blocks);
    let report = run(args, bot, sources, Some(account), None).await?;
    Ok(report.map_or(0, |r| r.exit_code()))
}

/// Tasks processed by one worker.
struct Processed(AtomicU64);

fn demo_bot() -> anyhow::Result<Bot> {
    let bot = Bot::builder("demo")
        .parameter("payout_every", 10)
        .on_startup("restore", |_ctx, payload| async move {
            if let TriggerPayload::Startup(snapshot) = payload {
                info!(last_block = ?snapshot.last_block_processed, "resuming");
            }
            Ok(Measurement::None)
        })
        .on_worker_startup("init_counter", |ctx, _| async move {
            ctx.worker.insert(Processed(AtomicU64::new(0)));
            Ok(Measurement::None)
        })
        .on_block("count_blocks", count_blocks)
        .on_metric("payout", MetricFilter::new("payout_due").eq(1.0), payout)
        .cron("heartbeat", "*/30 * * * * *", |_ctx, payload| async move {
            if let TriggerPayload::CronTick { scheduled_at } = payload {
                info!(%scheduled_at, "heartbeat");
            }
            Ok(Measurement::single(true))
        })
        .on_worker_shutdown("report_counter", |ctx, _| async move {
            if let Some(processed) = ctx.worker.get::<Processed>() {
                info!(
                    worker = ctx.worker.worker_id(),
                    processed = processed.0.load(Ordering::Relaxed),
                    "worker done"
                );
            }
            Ok(Measurement::None)
        })
        .on_shutdown("goodbye", |_ctx, _| async move {
            info!("demo bot shutting down");
            Ok(Measurement::None)
        })
        .build()?;
    Ok(bot)
}

async fn count_blocks(ctx: HandlerContext, payload: TriggerPayload) -> HandlerOutcome {
    let block = payload
        .as_block()
        .ok_or_else(|| HandlerError::ordinary("expected a block"))?;
    if let Some(processed) = ctx.worker.get::<Processed>() {
        processed.0.fetch_add(1, Ordering::Relaxed);
    }
    let every = ctx.shared.get::<u64>("payout_every").unwrap_or(10).max(1);
    Ok(Measurement::named([
        ("count", 1),
        ("payout_due", i32::from(block.number % every == 0)),
    ]))
}

async fn payout(ctx: HandlerContext, _payload: TriggerPayload) -> HandlerOutcome {
    let receipt = ctx
        .send_transaction(TransactionRequest {
            to: ZERO_ADDRESS.to_string(),
            value: 1,
            data: Vec::new(),
        })
        .await?;
    info!(nonce = receipt.nonce, tx = %receipt.transaction_hash, "payout sent");
    Ok(Measurement::single(receipt.nonce))
}

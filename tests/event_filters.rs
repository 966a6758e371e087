// tests/event_filters.rs

mod common;
use crate::common::fixtures::{transfer_log, TRANSFER};
use crate::common::{init_tracing, run_bot, BotConfigBuilder, TestResult};

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use chainbot::chain::ZERO_ADDRESS;
use chainbot::trigger::{InboundEvent, TriggerAdapter};
use chainbot::types::TaskType;
use chainbot::{Bot, EventFilter, Measurement, TriggerSources};

const TOKEN: &str = "0x00000000000000000000000000000000000000aa";
const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const BOB: &str = "0x00000000000000000000000000000000000000b2";

fn burn_bot(burns: Arc<Mutex<Vec<u64>>>) -> Bot {
    Bot::builder("burns")
        .on_event(
            "burn",
            EventFilter::new(TRANSFER).with_arg("to", ZERO_ADDRESS),
            move |_, payload| {
                let burns = Arc::clone(&burns);
                async move {
                    if let Some(log) = payload.as_log() {
                        burns.lock().unwrap().push(log.block_number);
                    }
                    Ok(Measurement::None)
                }
            },
        )
        .build()
        .expect("valid bot")
}

#[test]
fn zero_address_filter_yields_exactly_one_trigger() {
    let bot = burn_bot(Arc::default());
    let adapter = TriggerAdapter::new(bot.registry());

    let matching = transfer_log(TOKEN, ALICE, ZERO_ADDRESS, 10, 0);
    let other = transfer_log(TOKEN, ALICE, BOB, 10, 1);

    let triggers: Vec<_> = [matching, other]
        .into_iter()
        .filter_map(|log| adapter.trigger_for(InboundEvent::NewLog(log)))
        .collect();

    assert_eq!(triggers.len(), 1);
    assert_eq!(triggers[0].kind, TaskType::EventLog);
    assert_eq!(triggers[0].payload.log_index(), Some(0));
    assert_eq!(triggers[0].handlers.len(), 1);
}

#[test]
fn contract_filter_ignores_address_case() {
    let bot = Bot::builder("token_watch")
        .on_event(
            "token_transfers",
            EventFilter::new(TRANSFER).at(TOKEN.to_uppercase().replace("0X", "0x")),
            |_, _| async { Ok(Measurement::None) },
        )
        .build()
        .expect("valid bot");
    let adapter = TriggerAdapter::new(bot.registry());

    let ours = transfer_log(TOKEN, ALICE, BOB, 1, 0);
    let theirs = transfer_log(BOB, ALICE, BOB, 1, 1);

    assert!(adapter.trigger_for(InboundEvent::NewLog(ours)).is_some());
    assert!(adapter.trigger_for(InboundEvent::NewLog(theirs)).is_none());
}

#[tokio::test]
async fn log_source_delivers_only_matching_logs() -> TestResult {
    init_tracing();

    let burns = Arc::new(Mutex::new(Vec::new()));
    let bot = burn_bot(Arc::clone(&burns));

    let (tx, rx) = mpsc::channel(8);
    tx.send(transfer_log(TOKEN, ALICE, ZERO_ADDRESS, 5, 0)).await?;
    tx.send(transfer_log(TOKEN, ALICE, BOB, 6, 0)).await?;
    tx.send(transfer_log(TOKEN, BOB, ZERO_ADDRESS, 7, 3)).await?;
    drop(tx);

    let finished = run_bot(
        bot,
        BotConfigBuilder::new().build(),
        TriggerSources::new().with_logs(rx),
        None,
    )
    .await?;

    let mut seen = burns.lock().unwrap().clone();
    seen.sort_unstable();
    assert_eq!(seen, vec![5, 7]);
    assert_eq!(finished.recorder.results().len(), 2);
    Ok(())
}

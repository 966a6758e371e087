#![allow(dead_code)]

use std::error::Error;
use std::sync::Arc;

use chainbot::broker::Broker;
use chainbot::config::BotConfig;
use chainbot::metrics::MemoryRecorder;
use chainbot::state::MemorySnapshotStore;
use chainbot::{Bot, RunReport, Runtime, TriggerSources};

pub use chainbot_test_utils::builders::BotConfigBuilder;
pub use chainbot_test_utils::fixtures;
pub use chainbot_test_utils::{init_tracing, with_timeout};

pub type TestResult = Result<(), Box<dyn Error>>;

/// Everything a finished run leaves behind for assertions.
pub struct Finished {
    pub report: RunReport,
    pub recorder: Arc<MemoryRecorder>,
    pub snapshots: Arc<MemorySnapshotStore>,
}

/// Run `bot` to completion on the given sources with an in-memory recorder
/// and snapshot store.
pub async fn run_bot(
    bot: Bot,
    config: BotConfig,
    sources: TriggerSources,
    broker: Option<Arc<dyn Broker>>,
) -> Result<Finished, Box<dyn Error>> {
    let recorder = Arc::new(MemoryRecorder::new());
    let snapshots = Arc::new(MemorySnapshotStore::new());
    let mut builder = Runtime::builder(bot, config)
        .sources(sources)
        .recorder(recorder.clone())
        .snapshots(snapshots.clone());
    if let Some(broker) = broker {
        builder = builder.broker(broker);
    }
    let report = with_timeout(builder.build().run()).await?;
    Ok(Finished {
        report,
        recorder,
        snapshots,
    })
}

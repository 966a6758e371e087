// src/trigger/adapter.rs

use std::collections::BTreeMap;

use super::{CronSchedule, InboundEvent, Trigger, TriggerPayload};
use crate::handler::{EventFilter, HandlerId, HandlerRegistry, TriggerFilter};
use crate::types::TaskType;

/// Maps inbound events to the runtime handlers bound to them.
///
/// Built once from the registry; lookups never allocate beyond the
/// resulting trigger.
#[derive(Debug, Clone, Default)]
pub struct TriggerAdapter {
    blocks: Vec<HandlerId>,
    events: Vec<(HandlerId, EventFilter)>,
    cron: BTreeMap<String, (CronSchedule, Vec<HandlerId>)>,
}

impl TriggerAdapter {
    pub fn new(registry: &HandlerRegistry) -> Self {
        let mut adapter = Self::default();
        for reg in registry.iter() {
            match &reg.filter {
                TriggerFilter::NewBlock => adapter.blocks.push(reg.id),
                TriggerFilter::EventLog(filter) => adapter.events.push((reg.id, filter.clone())),
                TriggerFilter::Cron(schedule) => {
                    adapter
                        .cron
                        .entry(schedule.expression().to_string())
                        .or_insert_with(|| (schedule.clone(), Vec::new()))
                        .1
                        .push(reg.id);
                }
                _ => {}
            }
        }
        adapter
    }

    /// Distinct cron schedules, one ticker each.
    pub fn schedules(&self) -> impl Iterator<Item = &CronSchedule> {
        self.cron.values().map(|(schedule, _)| schedule)
    }

    pub fn wants_blocks(&self) -> bool {
        !self.blocks.is_empty()
    }

    pub fn wants_logs(&self) -> bool {
        !self.events.is_empty()
    }

    /// `None` when no handler is interested.
    pub fn trigger_for(&self, event: InboundEvent) -> Option<Trigger> {
        let (kind, handlers, payload) = match event {
            InboundEvent::NewBlock(header) => (
                TaskType::NewBlock,
                self.blocks.clone(),
                TriggerPayload::Block(header),
            ),
            InboundEvent::NewLog(log) => {
                let handlers = self
                    .events
                    .iter()
                    .filter(|(_, filter)| filter.matches(&log))
                    .map(|(id, _)| *id)
                    .collect();
                (TaskType::EventLog, handlers, TriggerPayload::Log(log))
            }
            InboundEvent::CronTick {
                expression,
                scheduled_at,
            } => {
                let handlers = self
                    .cron
                    .get(&expression)
                    .map(|(_, ids)| ids.clone())
                    .unwrap_or_default();
                (
                    TaskType::Cron,
                    handlers,
                    TriggerPayload::CronTick { scheduled_at },
                )
            }
        };

        if handlers.is_empty() && kind != TaskType::NewBlock {
            return None;
        }
        Some(Trigger {
            kind,
            payload,
            handlers,
        })
    }
}

// src/handler/registration.rs

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use super::{HandlerFn, HandlerId};
use crate::chain::{Address, ContractLog};
use crate::metrics::{CompareOp, Comparison, Datapoint};
use crate::trigger::cron::CronSchedule;
use crate::types::TaskType;

/// Constraint on which contract logs reach an `EVENT_LOG` handler.
///
/// Argument values are compared as JSON, addresses case-insensitively.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFilter {
    pub signature: String,
    pub contract_address: Option<Address>,
    pub args: BTreeMap<String, Value>,
}

impl EventFilter {
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
            contract_address: None,
            args: BTreeMap::new(),
        }
    }

    pub fn at(mut self, contract: impl Into<Address>) -> Self {
        self.contract_address = Some(contract.into());
        self
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn matches(&self, log: &ContractLog) -> bool {
        if log.event_signature != self.signature {
            return false;
        }
        if let Some(contract) = &self.contract_address {
            if !contract.eq_ignore_ascii_case(&log.contract_address) {
                return false;
            }
        }
        self.args.iter().all(|(name, expected)| {
            log.arg(name)
                .is_some_and(|actual| arg_matches(expected, actual))
        })
    }
}

fn arg_matches(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::String(e), Value::String(a)) if e.starts_with("0x") => e.eq_ignore_ascii_case(a),
        _ => expected == actual,
    }
}

/// Metric name plus threshold predicates, AND-combined.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFilter {
    pub metric: String,
    pub predicates: Vec<Comparison>,
}

impl MetricFilter {
    pub fn new(metric: impl Into<String>) -> Self {
        Self {
            metric: metric.into(),
            predicates: Vec::new(),
        }
    }

    pub fn gt(self, threshold: impl Into<Datapoint>) -> Self {
        self.when(CompareOp::Gt, threshold)
    }

    pub fn ge(self, threshold: impl Into<Datapoint>) -> Self {
        self.when(CompareOp::Ge, threshold)
    }

    pub fn lt(self, threshold: impl Into<Datapoint>) -> Self {
        self.when(CompareOp::Lt, threshold)
    }

    pub fn le(self, threshold: impl Into<Datapoint>) -> Self {
        self.when(CompareOp::Le, threshold)
    }

    pub fn eq(self, threshold: impl Into<Datapoint>) -> Self {
        self.when(CompareOp::Eq, threshold)
    }

    pub fn ne(self, threshold: impl Into<Datapoint>) -> Self {
        self.when(CompareOp::Ne, threshold)
    }

    pub fn when(mut self, op: CompareOp, threshold: impl Into<Datapoint>) -> Self {
        self.predicates.push(Comparison {
            op,
            threshold: threshold.into(),
        });
        self
    }
}

/// What a registration is bound to.
#[derive(Debug, Clone)]
pub enum TriggerFilter {
    NewBlock,
    EventLog(EventFilter),
    Cron(CronSchedule),
    MetricCallback(MetricFilter),
    Startup,
    Shutdown,
    WorkerStartup,
    WorkerShutdown,
}

impl TriggerFilter {
    pub fn task_type(&self) -> TaskType {
        match self {
            TriggerFilter::NewBlock => TaskType::NewBlock,
            TriggerFilter::EventLog(_) => TaskType::EventLog,
            TriggerFilter::Cron(_) => TaskType::Cron,
            TriggerFilter::MetricCallback(_) => TaskType::MetricCallback,
            TriggerFilter::Startup => TaskType::Startup,
            TriggerFilter::Shutdown => TaskType::Shutdown,
            TriggerFilter::WorkerStartup => TaskType::WorkerStartup,
            TriggerFilter::WorkerShutdown => TaskType::WorkerShutdown,
        }
    }

    /// Stable textual form, fed into the registry fingerprint.
    pub(crate) fn describe(&self) -> String {
        match self {
            TriggerFilter::EventLog(filter) => {
                let mut out = format!("event:{}", filter.signature);
                if let Some(contract) = &filter.contract_address {
                    out.push('@');
                    out.push_str(&contract.to_lowercase());
                }
                for (name, value) in &filter.args {
                    out.push_str(&format!(";{name}={value}"));
                }
                out
            }
            TriggerFilter::Cron(schedule) => format!("cron:{}", schedule.expression()),
            TriggerFilter::MetricCallback(filter) => {
                let mut out = format!("metric:{}", filter.metric);
                for p in &filter.predicates {
                    out.push_str(&format!(";{}{}", p.op.symbol(), p.threshold));
                }
                out
            }
            other => other.task_type().to_string(),
        }
    }
}

/// A handler bound to a trigger filter.
#[derive(Clone)]
pub struct HandlerRegistration {
    pub id: HandlerId,
    pub name: String,
    pub filter: TriggerFilter,
    pub(crate) logic: HandlerFn,
}

impl HandlerRegistration {
    pub fn task_type(&self) -> TaskType {
        self.filter.task_type()
    }

    pub fn logic(&self) -> HandlerFn {
        self.logic.clone()
    }
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

// src/metrics/aggregator.rs

//! Bounded per-metric timeseries plus the threshold watches that turn new
//! datapoints into `METRIC_CALLBACK` triggers.

use std::cmp::Ordering;
use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Datapoint, Measurement};
use crate::handler::{HandlerId, HandlerRegistry, TriggerFilter};
use crate::trigger::{MetricUpdate, Trigger, TriggerPayload};
use crate::types::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub op: CompareOp,
    pub threshold: Datapoint,
}

impl Comparison {
    /// Exact for integer values. NaN on either side only satisfies `Ne`.
    pub fn evaluate(&self, value: &Datapoint) -> bool {
        let Some(ord) = value.compare(&self.threshold) else {
            return self.op == CompareOp::Ne;
        };
        match self.op {
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
        }
    }
}

/// One appended datapoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric: String,
    pub timestamp: DateTime<Utc>,
    pub value: Datapoint,
}

/// Ordered `(timestamp, value)` pairs, oldest evicted first.
#[derive(Debug, Clone)]
pub struct MetricSeries {
    points: VecDeque<(DateTime<Utc>, Datapoint)>,
    capacity: usize,
}

impl MetricSeries {
    fn new(capacity: usize) -> Self {
        Self {
            points: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    /// Append at `ts`, moved forward past the newest point if needed so
    /// timestamps stay strictly increasing. Returns the stamp used.
    fn push(&mut self, ts: DateTime<Utc>, value: Datapoint) -> DateTime<Utc> {
        let ts = match self.points.back() {
            Some((last, _)) if ts <= *last => *last + TimeDelta::nanoseconds(1),
            _ => ts,
        };
        if self.points.len() == self.capacity {
            self.points.pop_front();
        }
        self.points.push_back((ts, value));
        ts
    }

    pub fn latest(&self) -> Option<&(DateTime<Utc>, Datapoint)> {
        self.points.back()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(DateTime<Utc>, Datapoint)> {
        self.points.iter()
    }

    pub fn values(&self) -> Vec<Datapoint> {
        self.points.iter().map(|(_, v)| *v).collect()
    }
}

#[derive(Debug, Clone)]
struct MetricWatch {
    handler: HandlerId,
    metric: String,
    predicates: Vec<Comparison>,
}

impl MetricWatch {
    fn fires(&self, value: &Datapoint) -> bool {
        self.predicates.iter().all(|p| p.evaluate(value))
    }
}

/// Result of folding one task result into the aggregator.
#[derive(Debug, Default)]
pub struct Recorded {
    pub samples: Vec<MetricSample>,
    pub triggers: Vec<Trigger>,
}

#[derive(Debug, Clone)]
pub struct MetricAggregator {
    series: BTreeMap<String, MetricSeries>,
    watches: Vec<MetricWatch>,
    history: usize,
}

impl MetricAggregator {
    pub fn new(registry: &HandlerRegistry, history: usize) -> Self {
        let watches = registry
            .of_type(TaskType::MetricCallback)
            .filter_map(|reg| match &reg.filter {
                TriggerFilter::MetricCallback(filter) => Some(MetricWatch {
                    handler: reg.id,
                    metric: filter.metric.clone(),
                    predicates: filter.predicates.clone(),
                }),
                _ => None,
            })
            .collect();

        Self {
            series: BTreeMap::new(),
            watches,
            history,
        }
    }

    /// Append every datapoint in `measurement` and evaluate watches against
    /// each new value. A predicate that matches on consecutive updates fires
    /// every time. `timestamp` is the runtime's processing time; a stamp not
    /// after a series' newest point is bumped forward.
    pub fn record(
        &mut self,
        handler: &str,
        measurement: &Measurement,
        timestamp: DateTime<Utc>,
    ) -> Recorded {
        let mut out = Recorded::default();

        for (metric, value) in measurement.datapoints(handler) {
            let history = self.history;
            let timestamp = self
                .series
                .entry(metric.to_string())
                .or_insert_with(|| MetricSeries::new(history))
                .push(timestamp, value);

            let handlers: Vec<HandlerId> = self
                .watches
                .iter()
                .filter(|w| w.metric == metric && w.fires(&value))
                .map(|w| w.handler)
                .collect();

            if !handlers.is_empty() {
                debug!(metric, %value, handlers = handlers.len(), "metric predicate matched");
                out.triggers.push(Trigger {
                    kind: TaskType::MetricCallback,
                    payload: TriggerPayload::Metric(MetricUpdate {
                        metric: metric.to_string(),
                        value,
                        timestamp,
                    }),
                    handlers,
                });
            }

            out.samples.push(MetricSample {
                metric: metric.to_string(),
                timestamp,
                value,
            });
        }

        out
    }

    pub fn series(&self, metric: &str) -> Option<&MetricSeries> {
        self.series.get(metric)
    }

    pub fn latest(&self, metric: &str) -> Option<Datapoint> {
        self.series(metric).and_then(|s| s.latest()).map(|(_, v)| *v)
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, MetricFilter};

    fn registry(filter: MetricFilter) -> HandlerRegistry {
        HandlerRegistry::new(vec![(
            "on_price".to_string(),
            TriggerFilter::MetricCallback(filter),
            handler_fn(|_, _| async { Ok(Measurement::None) }),
        )])
        .unwrap()
    }

    #[test]
    fn window_predicate_fires_only_inside_range() {
        let reg = registry(MetricFilter::new("price").gt(3.0).lt(10.0));
        let mut agg = MetricAggregator::new(&reg, 16);
        let now = Utc::now();

        let fired: Vec<bool> = [2.0, 5.0, 12.0, 9.99]
            .into_iter()
            .map(|p| {
                !agg.record("pricer", &Measurement::named([("price", p)]), now)
                    .triggers
                    .is_empty()
            })
            .collect();

        assert_eq!(fired, vec![false, true, false, true]);
        assert_eq!(agg.series("price").map(MetricSeries::len), Some(4));
    }

    #[test]
    fn history_is_bounded() {
        let reg = HandlerRegistry::default();
        let mut agg = MetricAggregator::new(&reg, 2);
        let now = Utc::now();
        for i in 0..5 {
            agg.record("count", &Measurement::single(i), now);
        }
        let series = agg.series("count").unwrap();
        assert_eq!(series.values(), vec![Datapoint::Int(3), Datapoint::Int(4)]);
    }

    #[test]
    fn integer_thresholds_compare_exactly() {
        let reg = registry(MetricFilter::new("bal").gt(9_007_199_254_740_992i64));
        let mut agg = MetricAggregator::new(&reg, 16);
        let now = Utc::now();
        let above = agg.record("b", &Measurement::named([("bal", 9_007_199_254_740_993i64)]), now);
        let equal = agg.record("b", &Measurement::named([("bal", 9_007_199_254_740_992i64)]), now);
        assert_eq!(above.triggers.len(), 1);
        assert!(equal.triggers.is_empty());

        let reg = registry(MetricFilter::new("bal").gt(9_007_199_254_740_992.0));
        let mut agg = MetricAggregator::new(&reg, 16);
        let fired = agg.record("b", &Measurement::named([("bal", 9_007_199_254_740_993i64)]), now);
        assert_eq!(fired.triggers.len(), 1);
    }

    #[test]
    fn late_stamps_are_moved_after_the_newest_point() {
        let reg = HandlerRegistry::default();
        let mut agg = MetricAggregator::new(&reg, 16);
        let now = Utc::now();
        agg.record("count", &Measurement::single(1), now);
        let late = agg.record("count", &Measurement::single(2), now - TimeDelta::seconds(5));
        agg.record("count", &Measurement::single(3), now);

        let stamps: Vec<_> = agg.series("count").unwrap().iter().map(|(ts, _)| *ts).collect();
        assert!(stamps.windows(2).all(|w| w[0] < w[1]), "{stamps:?}");
        assert_eq!(late.samples[0].timestamp, stamps[1]);
    }

    #[test]
    fn repeated_match_fires_each_time() {
        let reg = registry(MetricFilter::new("price").gt(1.0));
        let mut agg = MetricAggregator::new(&reg, 16);
        let now = Utc::now();
        let a = agg.record("p", &Measurement::named([("price", 2.0)]), now);
        let b = agg.record("p", &Measurement::named([("price", 2.0)]), now);
        assert_eq!(a.triggers.len(), 1);
        assert_eq!(b.triggers.len(), 1);
        assert_eq!(b.triggers[0].handlers, vec![HandlerId(0)]);
    }
}

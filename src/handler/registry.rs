// src/handler/registry.rs

//! Immutable, indexed view over a bot's registrations.
//!
//! Every process that executes handlers (the runtime and each worker) builds
//! the same registry from the same bot definition. The fingerprint lets a
//! worker refuse work items that were planned against a different one.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use super::{HandlerFn, HandlerId, HandlerRegistration, TriggerFilter};
use crate::errors::{BotError, Result};
use crate::types::TaskType;

/// `Name(type,type,...)`, as used in canonical event signatures.
static EVENT_SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\(([A-Za-z0-9_\[\]]+(,[A-Za-z0-9_\[\]]+)*)?\)$")
        .unwrap_or_else(|e| panic!("event signature regex is invalid: {e}"))
});

#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    registrations: Vec<HandlerRegistration>,
    by_name: HashMap<String, HandlerId>,
    fingerprint: String,
}

impl HandlerRegistry {
    /// Validate and index `(name, filter, logic)` triples in registration order.
    pub fn new(entries: Vec<(String, TriggerFilter, HandlerFn)>) -> Result<Self> {
        let mut registrations = Vec::with_capacity(entries.len());
        let mut by_name = HashMap::new();
        let mut seen = HashSet::new();

        for (index, (name, filter, logic)) in entries.into_iter().enumerate() {
            if name.trim().is_empty() {
                return Err(BotError::Registration(format!(
                    "handler #{index} has an empty name"
                )));
            }
            if !seen.insert(name.clone()) {
                return Err(BotError::Registration(format!(
                    "handler name '{name}' registered twice"
                )));
            }
            validate_filter(&name, &filter)?;

            let id = HandlerId(index);
            by_name.insert(name.clone(), id);
            registrations.push(HandlerRegistration {
                id,
                name,
                filter,
                logic,
            });
        }

        let fingerprint = fingerprint(&registrations);
        Ok(Self {
            registrations,
            by_name,
            fingerprint,
        })
    }

    pub fn get(&self, id: HandlerId) -> Option<&HandlerRegistration> {
        self.registrations.get(id.0)
    }

    pub fn by_name(&self, name: &str) -> Option<&HandlerRegistration> {
        self.by_name.get(name).and_then(|id| self.get(*id))
    }

    /// Look up `id` and check it still carries `name`.
    pub fn resolve(&self, id: HandlerId, name: &str) -> Result<&HandlerRegistration> {
        match self.get(id) {
            Some(reg) if reg.name == name => Ok(reg),
            _ => Err(BotError::UnknownHandler(format!("{name} ({id})"))),
        }
    }

    /// Registrations of one kind, in registration order.
    pub fn of_type(&self, kind: TaskType) -> impl Iterator<Item = &HandlerRegistration> {
        self.registrations
            .iter()
            .filter(move |reg| reg.task_type() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HandlerRegistration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// blake3 over names and filter descriptions, in order.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

fn validate_filter(name: &str, filter: &TriggerFilter) -> Result<()> {
    match filter {
        TriggerFilter::EventLog(event) => {
            if !EVENT_SIGNATURE.is_match(&event.signature) {
                return Err(BotError::Registration(format!(
                    "handler '{name}': malformed event signature '{}'",
                    event.signature
                )));
            }
        }
        TriggerFilter::MetricCallback(metric) => {
            if metric.metric.trim().is_empty() {
                return Err(BotError::Registration(format!(
                    "handler '{name}': metric callback needs a metric name"
                )));
            }
            if metric.predicates.iter().any(|p| p.threshold.is_nan()) {
                return Err(BotError::Registration(format!(
                    "handler '{name}': NaN threshold on '{}'",
                    metric.metric
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

fn fingerprint(registrations: &[HandlerRegistration]) -> String {
    let mut hasher = blake3::Hasher::new();
    for reg in registrations {
        hasher.update(reg.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(reg.filter.describe().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{handler_fn, EventFilter, MetricFilter};
    use crate::metrics::Measurement;

    fn noop() -> HandlerFn {
        handler_fn(|_, _| async { Ok(Measurement::None) })
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = HandlerRegistry::new(vec![
            ("a".into(), TriggerFilter::NewBlock, noop()),
            ("a".into(), TriggerFilter::Startup, noop()),
        ])
        .unwrap_err();
        assert!(matches!(err, BotError::Registration(_)));
    }

    #[test]
    fn rejects_malformed_signature() {
        let bad = EventFilter::new("Transfer(address,,uint256)");
        assert!(HandlerRegistry::new(vec![("t".into(), TriggerFilter::EventLog(bad), noop())]).is_err());

        let good = EventFilter::new("Transfer(address,address,uint256)");
        assert!(HandlerRegistry::new(vec![("t".into(), TriggerFilter::EventLog(good), noop())]).is_ok());

        let no_args = EventFilter::new("Paused()");
        assert!(HandlerRegistry::new(vec![("p".into(), TriggerFilter::EventLog(no_args), noop())]).is_ok());
    }

    #[test]
    fn fingerprint_tracks_filters() {
        let a = HandlerRegistry::new(vec![(
            "watch".into(),
            TriggerFilter::MetricCallback(MetricFilter::new("price").gt(3.0)),
            noop(),
        )])
        .unwrap();
        let b = HandlerRegistry::new(vec![(
            "watch".into(),
            TriggerFilter::MetricCallback(MetricFilter::new("price").gt(4.0)),
            noop(),
        )])
        .unwrap();
        let a2 = HandlerRegistry::new(vec![(
            "watch".into(),
            TriggerFilter::MetricCallback(MetricFilter::new("price").gt(3.0)),
            noop(),
        )])
        .unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), a2.fingerprint());
    }

    #[test]
    fn resolve_checks_name() {
        let registry =
            HandlerRegistry::new(vec![("tick".into(), TriggerFilter::NewBlock, noop())]).unwrap();
        assert!(registry.resolve(HandlerId(0), "tick").is_ok());
        assert!(registry.resolve(HandlerId(0), "tock").is_err());
        assert!(registry.resolve(HandlerId(3), "tick").is_err());
    }
}

//! Introspection side table.
//!
//! # Responsibilities
//! - Attach descriptive metadata (name, kind, options) to policy instances
//! - Number instances per construction site (`retry#1`, `retry#2`, ...)
//! - Describe whole pipelines as a tree for diagnostics tooling
//!
//! # Design Decisions
//! - Metadata lives outside the policy, keyed by the `Arc` allocation, so
//!   tagging can never change how a policy executes
//! - Entries hold a weak reference to the tagged value; dead entries are purged lazily
//! - Options are typed per policy kind with an open map for anything else

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Broad category of an inspected component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Transport,
    Predicate,
    Strategy,
    Policy,
    Other,
}

/// Snapshot of the arguments a component was constructed with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyOptions {
    Retry {
        max_attempts: u32,
        fallback_delay_ms: u64,
        budgeted: bool,
    },
    CircuitBreaker {
        failure_threshold: u32,
        reset_timeout_ms: u64,
    },
    Throttle {
        limit: u32,
        interval_ms: u64,
    },
    Dedupe {
        ttl_ms: u64,
        methods: Vec<String>,
        max_size: usize,
    },
    RetryAfter {
        header: String,
        statuses: Vec<u16>,
        max_wait_ms: Option<u64>,
    },
    Backoff {
        base_ms: u64,
        max_ms: u64,
        factor: f64,
    },
    FixedDelay {
        delay_ms: u64,
    },
    HttpPredicate {
        methods: Vec<String>,
        statuses: Vec<u16>,
        max_body_bytes: usize,
    },
    Timeout {
        timeout_ms: u64,
    },
    Other(Map<String, Value>),
    None,
}

/// Metadata describing one component, and its children for composites.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    pub id: String,
    pub name: String,
    pub kind: Kind,
    pub options: PolicyOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Metadata>,
}

impl Metadata {
    /// Metadata for something that was never tagged.
    pub fn anonymous(kind: Kind) -> Self {
        Self {
            id: "anonymous".to_string(),
            name: "anonymous".to_string(),
            kind,
            options: PolicyOptions::None,
            children: Vec::new(),
        }
    }
}

struct Entry {
    alive: Box<dyn Fn() -> bool + Send + Sync>,
    meta: Metadata,
}

#[derive(Default)]
struct Registry {
    entries: DashMap<usize, Entry>,
    counters: DashMap<&'static str, AtomicU64>,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::default)
}

fn identity<T: ?Sized>(target: &Arc<T>) -> usize {
    Arc::as_ptr(target) as *const () as usize
}

fn next_id(name: &'static str) -> String {
    let reg = registry();
    let n = reg
        .counters
        .entry(name)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed)
        + 1;
    format!("{}#{}", name, n)
}

/// Attach metadata to `target`. Tagging the same instance again replaces it.
pub fn tag<T>(
    target: &Arc<T>,
    name: &'static str,
    kind: Kind,
    options: PolicyOptions,
) -> Metadata
where
    T: ?Sized + Send + Sync + 'static,
{
    tag_with_children(target, name, kind, options, Vec::new())
}

/// Like [`tag`], for composites that wrap other inspectable parts.
pub fn tag_with_children<T>(
    target: &Arc<T>,
    name: &'static str,
    kind: Kind,
    options: PolicyOptions,
    children: Vec<Metadata>,
) -> Metadata
where
    T: ?Sized + Send + Sync + 'static,
{
    let reg = registry();
    reg.entries.retain(|_, e| (e.alive)());

    let weak: Weak<T> = Arc::downgrade(target);
    let meta = Metadata {
        id: next_id(name),
        name: name.to_string(),
        kind,
        options,
        children,
    };
    reg.entries.insert(
        identity(target),
        Entry {
            alive: Box::new(move || weak.strong_count() > 0),
            meta: meta.clone(),
        },
    );
    meta
}

/// Metadata previously attached to `target`, if any.
pub fn describe<T>(target: &Arc<T>) -> Option<Metadata>
where
    T: ?Sized,
{
    let reg = registry();
    let key = identity(target);
    let found = reg.entries.get(&key).map(|e| ((e.alive)(), e.meta.clone()));
    match found {
        Some((true, meta)) => Some(meta),
        Some((false, _)) => {
            reg.entries.remove(&key);
            None
        }
        None => None,
    }
}

/// Like [`describe`], falling back to an anonymous entry of `kind`.
pub fn describe_or_anonymous<T>(target: &Arc<T>, kind: Kind) -> Metadata
where
    T: ?Sized,
{
    describe(target).unwrap_or_else(|| Metadata::anonymous(kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Probe;

    #[test]
    fn ids_are_numbered_per_construction_site() {
        let a = Arc::new(Probe);
        let b = Arc::new(Probe);
        let ma = tag(&a, "inspect-test-site", Kind::Other, PolicyOptions::None);
        let mb = tag(&b, "inspect-test-site", Kind::Other, PolicyOptions::None);

        let na: u64 = ma.id.rsplit('#').next().unwrap().parse().unwrap();
        let nb: u64 = mb.id.rsplit('#').next().unwrap().parse().unwrap();
        assert!(nb > na);
        assert_eq!(describe(&a).unwrap().id, ma.id);
        assert_eq!(describe(&b).unwrap().id, mb.id);
    }

    #[test]
    fn untagged_instances_have_no_metadata() {
        let a = Arc::new(Probe);
        assert!(describe(&a).is_none());
        assert_eq!(describe_or_anonymous(&a, Kind::Policy).name, "anonymous");
    }

    #[test]
    fn metadata_follows_the_allocation_through_coercion() {
        let a: Arc<Probe> = Arc::new(Probe);
        tag(
            &a,
            "inspect-coerce",
            Kind::Strategy,
            PolicyOptions::FixedDelay { delay_ms: 10 },
        );
        let erased: Arc<dyn Send + Sync> = a.clone();
        let meta = describe(&erased).unwrap();
        assert_eq!(meta.kind, Kind::Strategy);
        assert_eq!(meta.options, PolicyOptions::FixedDelay { delay_ms: 10 });
    }

    #[test]
    fn options_serialize_with_a_type_tag() {
        let json = serde_json::to_value(PolicyOptions::Throttle {
            limit: 5,
            interval_ms: 1000,
        })
        .unwrap();
        assert_eq!(json["type"], "throttle");
        assert_eq!(json["limit"], 5);
    }
}

use std::fmt;

use indexmap::IndexMap;
use ppl_core::errors::ErrorInfo;
use ppl_core::{Address, DistributionRef, PplError, SampleContinuation, Store, Value};

/// Record of one random choice.
#[derive(Clone)]
pub struct TraceEntry {
    /// Address of the choice site.
    pub address: Address,
    /// Distribution the value was drawn from.
    pub dist: DistributionRef,
    /// Parameters of the distribution at this execution.
    pub params: Vec<Value>,
    /// Cumulative log-joint immediately before this choice.
    pub score_before: f64,
    /// Log-probability contributed by this choice.
    pub choice_score: f64,
    /// Chosen value.
    pub value: Value,
    /// Whether the value was reused from a previous trace.
    pub reused: bool,
    /// Number of factors the execution had passed before this choice.
    pub factors_before: usize,
    /// Continuation resuming forward execution from this choice.
    pub k: SampleContinuation,
    /// Store at the time of the choice.
    pub store: Store,
}

impl fmt::Debug for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceEntry")
            .field("address", &self.address)
            .field("dist", &self.dist.name())
            .field("score_before", &self.score_before)
            .field("choice_score", &self.choice_score)
            .field("value", &self.value)
            .field("reused", &self.reused)
            .field("factors_before", &self.factors_before)
            .finish_non_exhaustive()
    }
}

/// Ordered record of the choices of one execution, keyed by address.
///
/// Order and index live in one map, so truncating to a prefix drops the index
/// entries of the removed suffix as well. Cloning deep-copies every entry.
#[derive(Debug, Clone, Default)]
pub struct Trace {
    entries: IndexMap<Address, TraceEntry>,
}

impl Trace {
    /// Creates an empty trace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded choices.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no choices have been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry recorded for `address`.
    pub fn get(&self, address: &Address) -> Option<&TraceEntry> {
        self.entries.get(address)
    }

    /// Whether `address` was visited.
    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    /// Entry at position `index`.
    pub fn entry(&self, index: usize) -> Option<&TraceEntry> {
        self.entries.get_index(index).map(|(_, entry)| entry)
    }

    /// Appends an entry. An address may be visited at most once per execution.
    pub fn push(&mut self, entry: TraceEntry) -> Result<(), PplError> {
        if self.entries.contains_key(&entry.address) {
            return Err(PplError::Trace(
                ErrorInfo::new("duplicate-address", "choice site visited twice in one execution")
                    .with_context("address", &entry.address)
                    .with_context("position", self.entries.len())
                    .with_hint("addresses must be unique per syntactic choice site"),
            ));
        }
        self.entries.insert(entry.address.clone(), entry);
        Ok(())
    }

    /// Keeps the first `len` entries.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Copy of the entries from position `from` onward.
    pub fn suffix(&self, from: usize) -> Trace {
        Trace {
            entries: self
                .entries
                .iter()
                .skip(from)
                .map(|(address, entry)| (address.clone(), entry.clone()))
                .collect(),
        }
    }

    /// Copy of the first `len` entries followed by every entry of `tail`.
    pub fn spliced(&self, len: usize, tail: &Trace) -> Result<Trace, PplError> {
        let mut out = Trace {
            entries: self
                .entries
                .iter()
                .take(len)
                .map(|(address, entry)| (address.clone(), entry.clone()))
                .collect(),
        };
        for entry in tail.iter() {
            out.push(entry.clone())?;
        }
        Ok(out)
    }

    /// Iterates over entries in execution order.
    pub fn iter(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.values()
    }

    /// Addresses in execution order.
    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.entries.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ppl_core::dist::bernoulli;
    use ppl_core::{exit, SampleContinuation};

    fn entry(site: &str, score_before: f64) -> TraceEntry {
        TraceEntry {
            address: Address::new(site),
            dist: bernoulli(),
            params: vec![Value::Real(0.5)],
            score_before,
            choice_score: 0.5f64.ln(),
            value: Value::Bool(true),
            reused: false,
            factors_before: 0,
            k: SampleContinuation::new(|store, value| exit(store, value)),
            store: Store::new(),
        }
    }

    #[test]
    fn truncation_drops_index_entries() {
        let mut trace = Trace::new();
        trace.push(entry("a", 0.0)).unwrap();
        trace.push(entry("b", -0.69)).unwrap();
        trace.push(entry("c", -1.38)).unwrap();
        trace.truncate(1);
        assert_eq!(trace.len(), 1);
        assert!(trace.contains(&Address::new("a")));
        assert!(!trace.contains(&Address::new("b")));
        assert!(trace.get(&Address::new("c")).is_none());
    }

    #[test]
    fn duplicate_addresses_are_rejected() {
        let mut trace = Trace::new();
        trace.push(entry("a", 0.0)).unwrap();
        let err = trace.push(entry("a", 0.0)).unwrap_err();
        assert_eq!(err.code(), "duplicate-address");
    }

    #[test]
    fn suffix_and_splice_preserve_order() {
        let mut trace = Trace::new();
        for site in ["a", "b", "c"] {
            trace.push(entry(site, 0.0)).unwrap();
        }
        let tail = trace.suffix(1);
        let names: Vec<_> = tail.addresses().map(|a| a.as_str().to_string()).collect();
        assert_eq!(names, vec!["b", "c"]);

        let mut replacement = Trace::new();
        replacement.push(entry("d", 0.0)).unwrap();
        let joined = trace.spliced(1, &replacement).unwrap();
        let names: Vec<_> = joined.addresses().map(|a| a.as_str().to_string()).collect();
        assert_eq!(names, vec!["a", "d"]);
    }
}

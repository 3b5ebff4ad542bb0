use std::collections::{HashSet, VecDeque};

use crate::data::types::{Direction, Signal};

pub const DEFAULT_MAX_SIGNALS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    ConvictionDesc,
    Newest,
    Symbol,
}

/// Predicates for the read view. The default hides signals still waiting on
/// a rationale.
#[derive(Debug, Clone)]
pub struct ViewFilter {
    pub direction: Option<Direction>,
    pub min_conviction: f64,
    pub require_rationale: bool,
    pub symbols: Option<HashSet<String>>,
    pub exclude_ids: HashSet<String>,
}

impl Default for ViewFilter {
    fn default() -> Self {
        Self {
            direction: None,
            min_conviction: 0.0,
            require_rationale: true,
            symbols: None,
            exclude_ids: HashSet::new(),
        }
    }
}

impl ViewFilter {
    fn accepts(&self, signal: &Signal) -> bool {
        if let Some(direction) = self.direction {
            if signal.direction != direction {
                return false;
            }
        }
        if signal.conviction < self.min_conviction {
            return false;
        }
        if self.require_rationale && !signal.has_rationale() {
            return false;
        }
        if let Some(symbols) = &self.symbols {
            if !symbols.contains(&signal.symbol) {
                return false;
            }
        }
        !self.exclude_ids.contains(&signal.id)
    }
}

/// Single source of truth for live signals.
///
/// Entries are kept most-recent-first. At most one entry per symbol; a new
/// signal for a known symbol replaces the old one and moves to the front.
/// Past the cap, entries are evicted from the back (oldest arrival).
#[derive(Debug, Clone)]
pub struct ReconciliationStore {
    signals: VecDeque<Signal>,
    max_signals: usize,
}

impl ReconciliationStore {
    pub fn new(max_signals: usize) -> Self {
        let max_signals = max_signals.max(1);
        Self {
            signals: VecDeque::with_capacity(max_signals),
            max_signals,
        }
    }

    /// Wholesale replace from a snapshot. The snapshot is taken as already
    /// most-recent-first, so for a repeated symbol the first occurrence wins.
    pub fn hydrate(&mut self, signals: Vec<Signal>) {
        let mut seen = HashSet::new();
        self.signals = signals
            .into_iter()
            .filter(|s| seen.insert(s.symbol.clone()))
            .take(self.max_signals)
            .collect();
        tracing::debug!("Store hydrated with {} signals", self.signals.len());
    }

    /// Last write wins per symbol, then enforce the cap.
    pub fn upsert(&mut self, signal: Signal) {
        if let Some(pos) = self.signals.iter().position(|s| s.symbol == signal.symbol) {
            self.signals.remove(pos);
        }
        self.signals.push_front(signal);

        // The new entry sits at the front; truncating from the back can't reach it.
        if self.signals.len() > self.max_signals {
            let evicted = self.signals.len() - self.max_signals;
            self.signals.truncate(self.max_signals);
            tracing::debug!("Evicted {} oldest signals", evicted);
        }
    }

    pub fn get(&self, symbol: &str) -> Option<&Signal> {
        self.signals.iter().find(|s| s.symbol == symbol)
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.max_signals
    }

    /// Everything retained, most recent first, unfiltered.
    pub fn recent(&self) -> impl Iterator<Item = &Signal> {
        self.signals.iter()
    }

    /// Filtered, sorted projection. Ties keep recency order; under
    /// `Newest`, signals without a timestamp go last.
    pub fn view(&self, filter: &ViewFilter, sort: SortKey) -> Vec<Signal> {
        let mut out: Vec<Signal> = self
            .signals
            .iter()
            .filter(|s| filter.accepts(s))
            .cloned()
            .collect();

        match sort {
            SortKey::ConvictionDesc => out.sort_by(|a, b| b.conviction.total_cmp(&a.conviction)),
            SortKey::Newest => out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            SortKey::Symbol => out.sort_by(|a, b| a.symbol.cmp(&b.symbol)),
        }
        out
    }
}

impl Default for ReconciliationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIGNALS)
    }
}

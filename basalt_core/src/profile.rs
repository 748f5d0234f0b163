//! Advisory profiling input handed to the JIT with a compile request.
//!
//! The profiler that fills this in lives in the interpreter; the baseline
//! tier only reads it for diagnostics.

use rustc_hash::FxHashMap;

/// Call and loop counts observed for one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfilingData {
    /// Number of interpreted calls.
    call_count: u64,
    /// Back-edge position → iterations observed.
    back_edges: FxHashMap<u32, u64>,
}

impl ProfilingData {
    /// Create profile data with a call count.
    pub fn new(call_count: u64) -> Self {
        ProfilingData {
            call_count,
            back_edges: FxHashMap::default(),
        }
    }

    /// Record one interpreted call.
    #[inline]
    pub fn record_call(&mut self) -> u64 {
        self.call_count = self.call_count.saturating_add(1);
        self.call_count
    }

    /// Record one iteration of the loop closed by the back-edge at `position`.
    #[inline]
    pub fn record_back_edge(&mut self, position: u32) -> u64 {
        let count = self.back_edges.entry(position).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Interpreted call count.
    #[inline]
    pub fn call_count(&self) -> u64 {
        self.call_count
    }

    /// Iterations observed at a back-edge.
    #[inline]
    pub fn back_edge_count(&self, position: u32) -> u64 {
        self.back_edges.get(&position).copied().unwrap_or(0)
    }

    /// The back-edge with the highest iteration count, if any.
    ///
    /// Ties break towards the lower position so the answer is stable.
    pub fn hottest_back_edge(&self) -> Option<(u32, u64)> {
        self.back_edges
            .iter()
            .map(|(&pos, &count)| (pos, count))
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_call() {
        let mut profile = ProfilingData::new(998);
        assert_eq!(profile.record_call(), 999);
        assert_eq!(profile.call_count(), 999);
    }

    #[test]
    fn test_back_edges() {
        let mut profile = ProfilingData::default();
        for _ in 0..10 {
            profile.record_back_edge(7);
        }
        profile.record_back_edge(3);

        assert_eq!(profile.back_edge_count(7), 10);
        assert_eq!(profile.back_edge_count(99), 0);
        assert_eq!(profile.hottest_back_edge(), Some((7, 10)));
    }

    #[test]
    fn test_hottest_back_edge_tie_breaks_low() {
        let mut profile = ProfilingData::default();
        profile.record_back_edge(9);
        profile.record_back_edge(4);
        assert_eq!(profile.hottest_back_edge(), Some((4, 1)));
    }
}

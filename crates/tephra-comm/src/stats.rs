//! Cross-rank timer statistics.
//!
//! Every rank contributes one elapsed-time sample; a single collector rank
//! receives all of them through one gather and reduces them to
//! [`TimerStats`]. The reduction is collective: every rank must call it
//! with the same collector in the same step or the gather deadlocks.

use tephra_core::comm::Communicator;
use tephra_core::error::CommError;

/// Min, max, mean, and population standard deviation of a timer.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TimerStats {
    /// Fastest rank.
    pub min: f64,
    /// Slowest rank.
    pub max: f64,
    /// Arithmetic mean.
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
}

impl TimerStats {
    /// Reduce a set of samples. Returns `None` for an empty set.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = samples.iter().sum::<f64>() / n;
        let var = samples.iter().map(|s| (s - mean) * (s - mean)).sum::<f64>() / n;
        Some(Self {
            min,
            max,
            mean,
            std: var.sqrt(),
        })
    }

    /// Gather `sample` from every rank at `collector` and reduce it there.
    ///
    /// Returns `Some` on the collector, `None` on every other rank.
    pub fn reduce(
        comm: &dyn Communicator,
        sample: f64,
        collector: usize,
    ) -> Result<Option<Self>, CommError> {
        Ok(comm
            .gather_f64(sample, collector)?
            .and_then(|samples| Self::from_samples(&samples)))
    }
}

/// Keeps the most recent [`TimerStats`] for progress reporting.
#[derive(Clone, Debug)]
pub struct StatsAggregator {
    collector: usize,
    latest: Option<TimerStats>,
}

impl StatsAggregator {
    /// Aggregator reducing at `collector`.
    pub fn new(collector: usize) -> Self {
        Self {
            collector,
            latest: None,
        }
    }

    /// The collecting rank.
    pub fn collector(&self) -> usize {
        self.collector
    }

    /// Contribute this rank's sample; the collector stores the result.
    pub fn record(
        &mut self,
        comm: &dyn Communicator,
        sample: f64,
    ) -> Result<Option<TimerStats>, CommError> {
        let stats = TimerStats::reduce(comm, sample, self.collector)?;
        if stats.is_some() {
            self.latest = stats;
        }
        Ok(stats)
    }

    /// Most recent stats on the collector; `None` elsewhere or before the
    /// first [`record`](Self::record).
    pub fn latest(&self) -> Option<&TimerStats> {
        self.latest.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalUniverse;
    use proptest::prelude::*;

    #[test]
    fn four_rank_reduction() {
        let out = LocalUniverse::new(4).run(|comm| {
            TimerStats::reduce(&comm, comm.rank() as f64 + 1.0, 0).unwrap()
        });
        let stats = out[0].expect("collector gets stats");
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert!((stats.std - 1.25f64.sqrt()).abs() < 1e-12);
        assert!(out[1..].iter().all(Option::is_none));
    }

    #[test]
    fn aggregator_keeps_latest_on_collector_only() {
        let out = LocalUniverse::new(3).run(|comm| {
            let mut agg = StatsAggregator::new(1);
            agg.record(&comm, 2.0).unwrap();
            agg.record(&comm, comm.rank() as f64).unwrap();
            agg.latest().copied()
        });
        assert_eq!(out[0], None);
        assert_eq!(out[2], None);
        let stats = out[1].unwrap();
        assert_eq!((stats.min, stats.max, stats.mean), (0.0, 2.0, 1.0));
    }

    #[test]
    fn invalid_collector_is_an_error() {
        let out = LocalUniverse::new(2).run(|comm| TimerStats::reduce(&comm, 1.0, 5));
        assert!(out.iter().all(|r| matches!(r, Err(CommError::InvalidRank { .. }))));
    }

    #[test]
    fn empty_samples() {
        assert_eq!(TimerStats::from_samples(&[]), None);
    }

    proptest! {
        #[test]
        fn stats_bracket_the_mean(samples in prop::collection::vec(0.0f64..1e3, 1..32)) {
            let s = TimerStats::from_samples(&samples).unwrap();
            prop_assert!(s.min <= s.mean + 1e-9);
            prop_assert!(s.mean <= s.max + 1e-9);
            prop_assert!(s.std >= 0.0);
            prop_assert!(s.std <= (s.max - s.min) + 1e-9);
        }
    }
}

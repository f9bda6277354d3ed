//! Opt-in timing hooks for the tick pipeline.
//!
//! Timing is only collected when the `engine_metrics` feature is enabled and
//! the target is not WASM (`std::time::Instant` is unavailable there). In every
//! other build the calls compile down to running the closure.
//!
//! ```ignore
//! let mut metrics = EngineMetrics::default();
//! metrics.begin();
//! let table = metrics.time(TimingBucket::ArcLength, || spline.rebuild(up));
//! if let Some(report) = metrics.end() {
//!     log::debug!("arc length: {} ns", report.arc_length_ns);
//! }
//! ```

use serde::Serialize;

/// Phases of a tick that accumulate time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimingBucket {
    /// Monitor queries and connector propagation.
    ChangeDetection,
    /// Arc-length table rebuilds.
    ArcLength,
    /// Frame table rebuilds and follower placement.
    Frames,
    /// Batch assembly and the parallel kernel.
    Dispatch,
    /// Copying results into instance meshes and recomputing normals.
    WriteBack,
    /// Origin buffer lookups.
    Cache,
}

/// Cumulative nanoseconds per bucket.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct EngineTimingReport {
    pub change_detection_ns: u64,
    pub arc_length_ns: u64,
    pub frames_ns: u64,
    pub dispatch_ns: u64,
    pub write_back_ns: u64,
    pub cache_ns: u64,
}

impl EngineTimingReport {
    #[must_use]
    pub fn total_ns(&self) -> u64 {
        self.change_detection_ns
            .saturating_add(self.arc_length_ns)
            .saturating_add(self.frames_ns)
            .saturating_add(self.dispatch_ns)
            .saturating_add(self.write_back_ns)
            .saturating_add(self.cache_ns)
    }

    #[must_use]
    pub fn total_ms(&self) -> f64 {
        self.total_ns() as f64 / 1_000_000.0
    }
}

/// Accumulator for one tick. [`end`](Self::end) returns `None` when metrics
/// are compiled out.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    #[cfg(all(feature = "engine_metrics", not(target_arch = "wasm32")))]
    report: EngineTimingReport,
}

impl EngineMetrics {
    pub fn begin(&mut self) {
        #[cfg(all(feature = "engine_metrics", not(target_arch = "wasm32")))]
        {
            self.report = EngineTimingReport::default();
        }
    }

    #[must_use]
    pub fn end(&self) -> Option<EngineTimingReport> {
        #[cfg(all(feature = "engine_metrics", not(target_arch = "wasm32")))]
        {
            Some(self.report.clone())
        }
        #[cfg(not(all(feature = "engine_metrics", not(target_arch = "wasm32"))))]
        {
            None
        }
    }

    /// Runs `f`, adding its elapsed time to `bucket`.
    pub fn time<R>(&mut self, bucket: TimingBucket, f: impl FnOnce() -> R) -> R {
        #[cfg(all(feature = "engine_metrics", not(target_arch = "wasm32")))]
        {
            let start = std::time::Instant::now();
            let result = f();
            let nanos = start.elapsed().as_nanos().min(u128::from(u64::MAX)) as u64;
            self.add_to_bucket(bucket, nanos);
            result
        }

        #[cfg(not(all(feature = "engine_metrics", not(target_arch = "wasm32"))))]
        {
            let _ = bucket;
            f()
        }
    }

    #[cfg(all(feature = "engine_metrics", not(target_arch = "wasm32")))]
    fn add_to_bucket(&mut self, bucket: TimingBucket, nanos: u64) {
        let slot = match bucket {
            TimingBucket::ChangeDetection => &mut self.report.change_detection_ns,
            TimingBucket::ArcLength => &mut self.report.arc_length_ns,
            TimingBucket::Frames => &mut self.report.frames_ns,
            TimingBucket::Dispatch => &mut self.report.dispatch_ns,
            TimingBucket::WriteBack => &mut self.report.write_back_ns,
            TimingBucket::Cache => &mut self.report.cache_ns,
        };
        *slot = slot.saturating_add(nanos);
    }
}

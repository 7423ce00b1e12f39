//! Simple profiling utility for measuring frame phases.
//!
//! The simulation records its extract, pipeline, write-back and maintenance
//! phases here when built with the `profile` feature. The demo logs the
//! summary at the end of its run:
//! ```bash
//! cargo run --example battle_demo --features profile
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Collects timing data for named sections and provides aggregated
/// statistics.
#[derive(Debug, Default)]
pub struct Profiler {
    /// Accumulated time per section
    sections: HashMap<&'static str, SectionStats>,
    /// Current section being timed (if any)
    current_section: Option<(&'static str, Instant)>,
    /// Total ticks profiled
    tick_count: u64,
}

/// Statistics for a profiled section
#[derive(Debug, Default, Clone)]
pub struct SectionStats {
    pub total_time: Duration,
    pub call_count: u64,
    pub min_time: Option<Duration>,
    pub max_time: Option<Duration>,
}

impl SectionStats {
    pub fn avg_time(&self) -> Duration {
        if self.call_count == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.call_count as u32
        }
    }

    fn record(&mut self, elapsed: Duration) {
        self.total_time += elapsed;
        self.call_count += 1;
        self.min_time = Some(self.min_time.map_or(elapsed, |m| m.min(elapsed)));
        self.max_time = Some(self.max_time.map_or(elapsed, |m| m.max(elapsed)));
    }
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a named section. Ends any section still open.
    pub fn begin_section(&mut self, name: &'static str) {
        self.end_section();
        self.current_section = Some((name, Instant::now()));
    }

    /// End the current section and record its duration.
    pub fn end_section(&mut self) {
        if let Some((name, start)) = self.current_section.take() {
            self.sections.entry(name).or_default().record(start.elapsed());
        }
    }

    /// Increment the tick counter.
    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn get_section(&self, name: &str) -> Option<&SectionStats> {
        self.sections.get(name)
    }

    pub fn section_names(&self) -> Vec<&'static str> {
        self.sections.keys().copied().collect()
    }

    /// Emit one `info` event per section, slowest first.
    pub fn log_summary(&self) {
        let mut sections: Vec<_> = self.sections.iter().collect();
        sections.sort_by(|a, b| b.1.total_time.cmp(&a.1.total_time));
        let total: Duration = sections.iter().map(|(_, s)| s.total_time).sum();

        for (name, stats) in &sections {
            let share = if total.as_nanos() > 0 {
                stats.total_time.as_nanos() as f64 / total.as_nanos() as f64 * 100.0
            } else {
                0.0
            };
            tracing::info!(
                section = *name,
                total = ?stats.total_time,
                avg = ?stats.avg_time(),
                min = ?stats.min_time.unwrap_or_default(),
                max = ?stats.max_time.unwrap_or_default(),
                share = format_args!("{share:.1}%"),
                "profile"
            );
        }
        if self.tick_count > 0 {
            let per_tick = total / self.tick_count as u32;
            tracing::info!(ticks = self.tick_count, per_tick = ?per_tick, "profile total");
        }
    }

    /// Reset all profiling data.
    pub fn reset(&mut self) {
        self.sections.clear();
        self.current_section = None;
        self.tick_count = 0;
    }
}

//! Simple profiling utility for measuring pass performance.
//!
//! Lightweight timing for the per-tick passes, used by the demo and by
//! stress tests to find the dominant pass at a given population size.
//!
//! ## Usage
//!
//! Enable profiling with the `profile` feature:
//! ```bash
//! cargo test --release --features profile
//! ```
//! or drive a `Profiler` directly around `SimWorld::step`.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A simple profiler for measuring named sections of code.
#[derive(Default)]
pub struct Profiler {
    /// Accumulated time per section
    sections: HashMap<String, SectionStats>,
    /// Current section being timed (if any)
    current_section: Option<(String, Instant)>,
    /// Total ticks profiled
    tick_count: u64,
}

/// Statistics for a profiled section
#[derive(Default, Clone)]
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
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start timing a named section.
    /// Call `end_section` to stop timing.
    pub fn begin_section(&mut self, name: &str) {
        self.current_section = Some((name.to_string(), Instant::now()));
    }

    /// End the current section and record its duration.
    pub fn end_section(&mut self) {
        if let Some((name, start)) = self.current_section.take() {
            let elapsed = start.elapsed();
            let stats = self.sections.entry(name).or_default();
            stats.total_time += elapsed;
            stats.call_count += 1;
            stats.min_time = Some(stats.min_time.map_or(elapsed, |m| m.min(elapsed)));
            stats.max_time = Some(stats.max_time.map_or(elapsed, |m| m.max(elapsed)));
        }
    }

    /// Time a section using a closure.
    pub fn time_section<F, R>(&mut self, name: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.begin_section(name);
        let result = f();
        self.end_section();
        result
    }

    /// Increment the tick counter.
    pub fn tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Get statistics for a specific section.
    pub fn get_section(&self, name: &str) -> Option<&SectionStats> {
        self.sections.get(name)
    }

    /// Print a summary of all profiled sections, slowest first.
    pub fn print_summary(&self) {
        println!("\n=== Profiler Summary ({} ticks) ===", self.tick_count);

        let mut sections: Vec<_> = self.sections.iter().collect();
        sections.sort_by(|a, b| b.1.total_time.cmp(&a.1.total_time));

        let total: Duration = sections.iter().map(|(_, s)| s.total_time).sum();

        println!(
            "{:<25} {:>10} {:>10} {:>10} {:>10} {:>8}",
            "Section", "Total", "Avg/tick", "Min", "Max", "% Time"
        );
        println!("{}", "-".repeat(78));

        for (name, stats) in &sections {
            let avg_per_tick = if self.tick_count > 0 {
                stats.total_time / self.tick_count as u32
            } else {
                Duration::ZERO
            };
            let pct = if total.as_nanos() > 0 {
                (stats.total_time.as_nanos() as f64 / total.as_nanos() as f64) * 100.0
            } else {
                0.0
            };
            println!(
                "{:<25} {:>10.2?} {:>10.2?} {:>10.2?} {:>10.2?} {:>7.1}%",
                name,
                stats.total_time,
                avg_per_tick,
                stats.min_time.unwrap_or(Duration::ZERO),
                stats.max_time.unwrap_or(Duration::ZERO),
                pct
            );
        }

        println!("{}", "-".repeat(78));
        println!("{:<25} {:>10.2?}", "TOTAL", total);

        if self.tick_count > 0 {
            let avg_tick = total / self.tick_count as u32;
            let effective_fps = if avg_tick.as_secs_f64() > 0.0 {
                1.0 / avg_tick.as_secs_f64()
            } else {
                0.0
            };
            println!(
                "{:<25} {:>10.2?} ({:.1} ticks/s)",
                "Avg per tick", avg_tick, effective_fps
            );
        }
        println!();
    }

    /// Reset all profiling data.
    pub fn reset(&mut self) {
        self.sections.clear();
        self.current_section = None;
        self.tick_count = 0;
    }
}

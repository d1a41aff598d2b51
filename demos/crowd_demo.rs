//! Basic demonstration of the crowd simulation core.
//!
//! Run with: cargo run --example crowd_demo

use crowd_sim::profiler::Profiler;
use crowd_sim::{SimConfig, SimWorld};

fn main() {
    println!("=== Crowd Simulation - Demo ===\n");

    let config = SimConfig {
        field_size: 100,
        unit_count: 500,
        units_per_second: 5.0,
        resolve_collisions: true,
        cell_size: 10.0,
        seed: None,
    };
    let mut sim = SimWorld::start(config);

    println!(
        "Spawned {} units and {} paired targets on a 100x100 field.\n",
        sim.unit_count(),
        sim.target_count()
    );

    let mut profiler = Profiler::new();
    let mut total_arrivals = 0usize;

    // 600 ticks at 20 ticks/sec = 30 seconds of simulated time.
    for tick in 0..600 {
        profiler.time_section("step", || {
            if let Err(err) = sim.step(0.05) {
                eprintln!("tick aborted: {err}");
            }
        });
        profiler.tick();

        let arrivals = profiler.time_section("drain_arrivals", || sim.drain_arrivals());
        total_arrivals += arrivals.len();

        if (tick + 1) % 100 == 0 {
            let snapshot = sim.snapshot();
            let idle = snapshot.units.iter().filter(|u| u.reached).count();
            let colliding = snapshot.units.iter().filter(|u| u.colliding).count();
            println!(
                "tick {:>4} (t={:>5.1}s): {} arrivals so far, {} idle, {} colliding",
                sim.current_tick(),
                sim.current_time(),
                total_arrivals,
                idle,
                colliding
            );
        }
    }

    profiler.print_summary();

    println!("=== Final state (first 5 units, JSON) ===\n");
    let mut snapshot = sim.snapshot();
    snapshot.units.truncate(5);
    snapshot.targets.truncate(5);
    match snapshot.to_json_pretty() {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("snapshot serialization failed: {err}"),
    }
}

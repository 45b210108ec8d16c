//! `wattprobe merge` — fuse a feature run with host power data.

use std::path::Path;

use wattprobe_core::dataset;
use wattprobe_core::fusion::{self, MergeConfig, MergeStats, PowerZone};

/// Run the merge command.
pub fn run(
    features_path: &str,
    power_path: &str,
    output: &str,
    tolerance: f64,
    zone: &str,
    min_power: f64,
) {
    let zone: PowerZone = match zone.parse() {
        Ok(z) => z,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let config = MergeConfig {
        tolerance_secs: tolerance,
        zone,
        min_power_watts: min_power,
    };

    println!("Merging datasets");
    println!("  Features:      {features_path}");
    println!("  Power:         {power_path}");
    println!("  Tolerance:     {tolerance}s");
    println!("  Zone:          {zone}");
    println!("  Min power:     {min_power}W");
    println!();

    let features = match dataset::load_features(Path::new(features_path)) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error loading features: {e}");
            std::process::exit(1);
        }
    };
    println!("Loaded {} feature points", features.len());

    let power = match dataset::load_power_csv(Path::new(power_path)) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Error loading power data: {e}");
            std::process::exit(1);
        }
    };
    println!("Loaded {} power points", power.len());

    let (rows, stats) = fusion::merge(&features, &power, &config);

    let out = Path::new(output);
    let sidecar = match dataset::save_merged(out, &rows, &stats, &config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error writing merged dataset: {e}");
            std::process::exit(1);
        }
    };
    println!("Wrote {} rows to {}", rows.len(), out.display());
    println!("  Stats sidecar: {}", sidecar.display());

    print_summary(&stats, &config);

    if stats.matched_points == 0 {
        eprintln!("No rows matched; the merged table carries features only");
        std::process::exit(1);
    }
}

fn print_summary(stats: &MergeStats, config: &MergeConfig) {
    println!();
    println!("{}", "=".repeat(60));
    println!("MERGE SUMMARY");
    println!("{}", "=".repeat(60));
    println!("Feature points:   {}", stats.feature_points);
    println!("Power points:     {}", stats.power_points);
    println!("Matched:          {}", stats.matched_points);
    println!("Unmatched:        {}", stats.unmatched_points);
    println!("Match rate:       {:.1}%", stats.match_rate * 100.0);

    if let Some(mean) = stats.mean_time_diff {
        println!("Mean time diff:   {mean:.3}s");
    }
    if let Some(max) = stats.max_time_diff {
        println!("Max time diff:    {max:.3}s");
    }
    if let Some((lo, hi)) = stats.power_range {
        println!("Power range:      {lo:.6}W - {hi:.6}W");
    }

    let quality = stats.match_rate * 100.0;
    let rating = if quality >= 90.0 {
        "Excellent"
    } else if quality >= 80.0 {
        "Good"
    } else if quality >= 60.0 {
        "Fair"
    } else {
        "Poor"
    };
    println!("Quality:          {rating} ({quality:.1}% match rate)");

    if quality < 80.0 {
        println!();
        println!("Recommendations:");
        if stats
            .mean_time_diff
            .is_some_and(|mean| mean > config.tolerance_secs * 0.5)
        {
            println!(
                "  - matched pairs sit close to the tolerance edge; consider raising --tolerance (currently {}s)",
                config.tolerance_secs
            );
        }
        if let (Some((f_lo, f_hi)), Some((p_lo, p_hi))) =
            (stats.feature_time_range, stats.power_time_range)
        {
            if p_lo > f_hi || f_lo > p_hi {
                println!("  - the two captures do not overlap in time; check clock sync between VM and host");
            }
        }
        if stats
            .power_range
            .is_some_and(|(_, hi)| hi < 0.01)
        {
            println!("  - matched power values are very low; consider lowering --min-power");
        }
    }
}

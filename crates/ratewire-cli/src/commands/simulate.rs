use std::process::ExitCode;
use std::time::Duration;

use ratewire_core::{RatewireConfig, UtcDateTime};
use ratewire_sim::StochasticRateEngine;

use crate::cli::SimulateArgs;
use crate::error::CliError;

/// Drive the engine offline for a fixed number of cycles and print each
/// quote as one NDJSON line.
pub fn execute(args: SimulateArgs) -> Result<ExitCode, CliError> {
    let config = RatewireConfig::load(&args.config)?;
    let mut engine = match args.seed {
        Some(seed) => StochasticRateEngine::with_seed(&config, seed),
        None => StochasticRateEngine::from_config(&config),
    };

    let interval = config.update_interval();
    let start = UtcDateTime::now().into_inner();

    for cycle in 0..args.cycles {
        let at = start + interval_times(interval, cycle);
        let now = UtcDateTime::from_offset_datetime(at)?;

        for quote in engine.step(now) {
            let line = serde_json::json!({
                "symbol": quote.symbol.as_str(),
                "bid": quote.bid,
                "ask": quote.ask,
                "ts": quote.ts,
            });
            println!("{line}");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn interval_times(interval: Duration, cycles: u64) -> Duration {
    Duration::from_secs_f64(interval.as_secs_f64() * cycles as f64)
}

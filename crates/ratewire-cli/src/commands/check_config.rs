use std::process::ExitCode;

use ratewire_core::RatewireConfig;

use crate::cli::CheckConfigArgs;
use crate::error::CliError;

/// Load, validate, and summarize a configuration file.
pub fn execute(args: CheckConfigArgs) -> Result<ExitCode, CliError> {
    let config = RatewireConfig::load(&args.config)?;
    let calcs = config.build_calc_set()?;

    println!("configuration ok: {}", args.config.display());
    println!("  instruments:     {}", config.instruments.len());
    println!("  derived rates:   {}", calcs.len());
    println!("  subscribers:     {}", config.subscribers.len());
    for spec in &config.subscribers {
        println!("    - {} ({})", spec.platform, spec.kind);
    }
    println!("  server bind:     {}", config.server.bind);
    println!("  max connections: {}", config.server.max_connections);
    println!(
        "  update interval: {}ms{}",
        config.update_interval_ms,
        if config.max_updates > 0 {
            format!(", max {} updates", config.max_updates)
        } else {
            String::new()
        }
    );

    Ok(ExitCode::SUCCESS)
}

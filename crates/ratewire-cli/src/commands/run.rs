use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ratewire_core::coordinator::Coordinator;
use ratewire_core::publisher::{BroadcastPublisher, RatePublisher, TracingPublisher};
use ratewire_core::subscriber::RateListener;
use ratewire_core::supervisor::SubscriberSupervisor;
use ratewire_core::{ConfigWatcher, RatewireConfig, SubscriberRegistry};
use ratewire_server::DistributionServer;
use ratewire_sim::SimFeed;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::error::CliError;

/// Run the full pipeline: subscribers feeding the coordinator, derived
/// rate recalculation, and the TCP distribution server.
pub async fn execute(args: RunArgs) -> Result<ExitCode, CliError> {
    let config = Arc::new(RatewireConfig::load(&args.config)?);
    let calcs = config.build_calc_set()?;

    // The subscribable universe: simulated symbols, remote feed symbols,
    // and derived rate names.
    let mut known: Vec<String> = config
        .simulated_symbols()
        .iter()
        .map(|symbol| symbol.as_str().to_owned())
        .collect();
    for spec in &config.subscribers {
        for symbol in &spec.symbols {
            known.push(symbol.as_str().to_owned());
        }
    }
    for calc in calcs.iter() {
        known.push(calc.name().to_owned());
    }

    let server = DistributionServer::bind(&config.server, known).await?;
    info!(addr = %server.local_addr(), "distribution server bound");

    let bus = BroadcastPublisher::default();
    let sinks: Vec<Arc<dyn RatePublisher>> = vec![
        Arc::new(server.sink()),
        Arc::new(bus.clone()),
        Arc::new(TracingPublisher),
    ];
    let coordinator = Arc::new(Coordinator::new(calcs, sinks));
    let listener: Arc<dyn RateListener> = coordinator.clone();

    // Adapter registry: remote kinds from core, plus the simulation
    // feed. Simulation feed handles are retained for config hot reload.
    let sim_feeds: Arc<Mutex<Vec<Arc<SimFeed>>>> = Arc::new(Mutex::new(Vec::new()));
    let mut registry = SubscriberRegistry::with_core_kinds();
    {
        let config = Arc::clone(&config);
        let sim_feeds = Arc::clone(&sim_feeds);
        registry.register("simulation", move |spec, listener| {
            let feed = Arc::new(SimFeed::new(spec.platform.clone(), &config, listener));
            sim_feeds
                .lock()
                .expect("sim feed list lock is not poisoned")
                .push(Arc::clone(&feed));
            Ok(feed as Arc<dyn ratewire_core::RateSubscriber>)
        });
    }

    let adapters = registry.build_all(&config.subscribers, listener)?;

    let mut supervisor = SubscriberSupervisor::new(config.supervisor.check_interval());
    for adapter in adapters {
        supervisor.add(adapter, config.supervisor.breaker());
    }
    let supervisor = Arc::new(supervisor);

    // Initial connect pass so the pipeline starts without waiting one
    // supervision interval.
    supervisor.check_once().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor_task = tokio::spawn(Arc::clone(&supervisor).run(shutdown_rx.clone()));
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    let watcher_task = if args.watch_config {
        let watcher = ConfigWatcher::new(&args.config, Duration::from_secs(2));
        let (mut config_rx, handle) = watcher.spawn(Arc::clone(&config), shutdown_rx.clone());

        let sim_feeds = Arc::clone(&sim_feeds);
        let apply_task = tokio::spawn(async move {
            while config_rx.changed().await.is_ok() {
                let updated = config_rx.borrow_and_update().clone();
                let feeds: Vec<Arc<SimFeed>> = sim_feeds
                    .lock()
                    .expect("sim feed list lock is not poisoned")
                    .clone();
                for feed in feeds {
                    feed.apply_config(&updated).await;
                }
                info!("engine configuration updated");
            }
        });
        Some((handle, apply_task))
    } else {
        None
    };

    info!("ratewire running, press ctrl-c to stop");
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "ctrl-c handler failed, shutting down");
    }

    info!("shutting down");
    let _ = shutdown_tx.send(true);

    let _ = supervisor_task.await;
    let _ = server_task.await;
    if let Some((watcher, apply)) = watcher_task {
        let _ = watcher.await;
        apply.abort();
        let _ = apply.await;
    }

    Ok(ExitCode::SUCCESS)
}

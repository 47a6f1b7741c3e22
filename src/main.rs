use axum::{Extension, Router, routing::get};
use gossip_membership::config::Config;
use gossip_membership::membership::types::MembershipEvent;
use gossip_membership::simulation::Cluster;
use gossip_membership::simulation::handlers::{
    ENDPOINT_NODE_MEMBERS, ENDPOINT_NODES, handle_list_nodes, handle_node_members,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

fn usage(program: &str) {
    eprintln!("Usage: {} [--config <file.json>] [options]", program);
    eprintln!("  --nodes <n>          number of simulated nodes");
    eprintln!("  --ticks <n>          logical ticks to run");
    eprintln!("  --drop-rate <p>      message loss probability (0.0..=1.0)");
    eprintln!("  --fail-at <tick>     tick at which nodes crash");
    eprintln!("  --fail-count <n>     nodes to crash (0 disables)");
    eprintln!("  --tick-millis <ms>   wall-clock length of a tick");
    eprintln!("  --fanout <k>         gossip fan-out target");
    eprintln!("  --t-suspect <ticks>  silence before suspicion");
    eprintln!("  --t-fail <ticks>     further silence before eviction");
    eprintln!("  --heartbeat <ticks>  heartbeat interval");
    eprintln!("  --http <addr:port>   serve membership snapshots over HTTP");
    eprintln!("Example: {} --nodes 10 --drop-rate 0.05 --http 127.0.0.1:8080", program);
}

fn parse_args(args: &[String]) -> anyhow::Result<Option<Config>> {
    if args.iter().any(|a| a == "--help" || a == "-h") {
        return Ok(None);
    }

    let mut config = match args.iter().position(|a| a == "--config") {
        Some(i) => {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("--config needs a path"))?;
            Config::from_file(path)?
        }
        None => Config::default(),
    };

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("{} needs a value", flag))
        };

        match flag {
            "--config" => {}
            "--nodes" => config.simulation.nodes = value()?.parse()?,
            "--ticks" => config.simulation.total_ticks = value()?.parse()?,
            "--drop-rate" => config.simulation.drop_rate = value()?.parse()?,
            "--fail-at" => config.simulation.fail_at = value()?.parse()?,
            "--fail-count" => config.simulation.fail_count = value()?.parse()?,
            "--tick-millis" => config.simulation.tick_millis = value()?.parse()?,
            "--http" => config.simulation.http = Some(value()?.parse()?),
            "--fanout" => config.protocol.fanout = value()?.parse()?,
            "--t-suspect" => config.protocol.t_suspect = value()?.parse()?,
            "--t-fail" => config.protocol.t_fail = value()?.parse()?,
            "--heartbeat" => config.protocol.heartbeat_interval = value()?.parse()?,
            other => anyhow::bail!("unknown argument '{}'", other),
        }
        i += 2;
    }

    config.validate()?;
    Ok(Some(config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(config) = parse_args(&args)? else {
        usage(&args[0]);
        return Ok(());
    };

    tracing::info!(
        "Simulating {} nodes for {} ticks (drop rate {}, K={}, T_suspect={}, T_fail={}, H={})",
        config.simulation.nodes,
        config.simulation.total_ticks,
        config.simulation.drop_rate,
        config.protocol.fanout,
        config.protocol.t_suspect,
        config.protocol.t_fail,
        config.protocol.heartbeat_interval,
    );

    let cluster = Arc::new(RwLock::new(Cluster::new(
        config.protocol.clone(),
        config.simulation.clone(),
    )?));

    // 1. HTTP inspection:
    if let Some(http_addr) = config.simulation.http {
        let app = Router::new()
            .route(ENDPOINT_NODES, get(handle_list_nodes))
            .route(ENDPOINT_NODE_MEMBERS, get(handle_node_members))
            .layer(Extension(cluster.clone()));

        let listener = tokio::net::TcpListener::bind(http_addr).await?;
        tracing::info!("HTTP server listening on {}", http_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("HTTP server stopped: {}", e);
            }
        });
    }

    // 2. Stats reporter:
    let stats_cluster = cluster.clone();
    let reporter = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        loop {
            interval.tick().await;
            let cluster = stats_cluster.read().await;
            let stats = cluster.network_stats();
            tracing::info!(
                "Tick {}: {} live nodes, converged={}, sent={} dropped={}",
                cluster.now(),
                cluster.live_peers().len(),
                cluster.converged(),
                stats.sent,
                stats.dropped
            );
        }
    });

    // 3. Tick loop:
    let mut interval = tokio::time::interval(Duration::from_millis(config.simulation.tick_millis));
    let (mut added, mut removed) = (0usize, 0usize);

    for _ in 0..config.simulation.total_ticks {
        interval.tick().await;
        let events = cluster.write().await.step()?;

        for (_, event) in events {
            match event {
                MembershipEvent::Added { .. } => added += 1,
                MembershipEvent::Removed { .. } => removed += 1,
                MembershipEvent::Suspected { .. } | MembershipEvent::Joined { .. } => {}
            }
        }
    }
    reporter.abort();

    // 4. Summary:
    {
        let cluster = cluster.read().await;
        let stats = cluster.network_stats();
        tracing::info!(
            "Finished at tick {}: {} adds, {} removals, converged={}",
            cluster.now(),
            added,
            removed,
            cluster.converged()
        );
        tracing::info!(
            "Network: sent={} delivered={} dropped={} malformed={}",
            stats.sent,
            stats.delivered,
            stats.dropped,
            cluster.malformed_messages()
        );
        for failed in cluster.failed_peers() {
            tracing::info!("  - {} crashed", failed);
        }
        for view in cluster.views().iter().filter(|v| !v.failed) {
            tracing::info!("  - {} knows {} members", view.peer, view.members.len());
        }
    }

    if config.simulation.http.is_some() {
        tracing::info!("Press Ctrl+C to shutdown");
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

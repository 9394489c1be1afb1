// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! robogate: hardware-control gateway between remote agents and a mobile
//! manipulator (7-DoF arm, holonomic base, gripper, cameras).

pub mod aggregator;
pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod executor;
pub mod lease;
pub mod rewind;
pub mod safety;
pub mod state;
pub mod supervisor;
pub mod trajectory;
pub mod transport;

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::backend::Backends;
use crate::config::GatewayConfig;
use crate::state::GatewayState;
use crate::supervisor::health::spawn_health_loop;
use crate::supervisor::Supervisor;
use crate::transport::build_router;

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    // TLS-capable backends need a process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let backends = if config.dry_run {
        tracing::info!("running with simulated backends");
        Backends::simulated(&shutdown)
    } else {
        Backends::connect(&config, &shutdown)
    };

    let supervisor = if config.no_service_manager {
        None
    } else {
        match &config.services_config {
            Some(path) => {
                let defs = Supervisor::load_definitions(path)?;
                let pid_file = config.state_dir().join("services.pid.json");
                let sup = Supervisor::new(defs, pid_file, config.log_ring_lines)?;
                sup.adopt_persisted().await;
                spawn_health_loop(Arc::clone(&sup), config.health_interval(), shutdown.clone());
                if config.auto_start_services {
                    let sup = Arc::clone(&sup);
                    tokio::spawn(async move { sup.start_all().await });
                }
                Some(sup)
            }
            None => None,
        }
    };

    let state = GatewayState::build(config, backends, supervisor, shutdown.clone());

    // Orchestrated shutdown: revoke the lease, stop the rewind and any
    // execution, cancel background tasks and WebSocket sessions, then stop
    // supervised services in reverse dependency order.
    {
        let state = Arc::clone(&state);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            tracing::info!("shutdown signal received");
            state.lease.revoke_all();
            state.rewind.stop();
            state.executor.stop();
            shutdown.cancel();
        });
    }

    let router = build_router(Arc::clone(&state));
    let listener =
        TcpListener::bind(&addr).await.with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!("robogate listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    if let Some(sup) = &state.supervisor {
        sup.shutdown_all().await;
    }

    Ok(())
}

//! `corral-cell` binary entrypoint.
//!
//! Parses configuration, builds the HTTP clients, wires the agent
//! components, and supervises them until exit.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use corral_core::coordination::CellPresence;
use corral_core::observability::{init_logging, LogFormat};
use corral_core::{BbsClient, CoordinationStore, ExecutorClient};

use corral_cell::auction::AuctionCellRep;
use corral_cell::clients::{
    build_http_client, HttpBbsClient, HttpCoordinationStore, HttpExecutorClient, TlsConfig,
};
use corral_cell::config::Config;
use corral_cell::delegate::ContainerDelegate;
use corral_cell::evacuation::{EvacuationController, EvacuationFlag};
use corral_cell::harmonizer::{Bulker, EventConsumer};
use corral_cell::operations::{Generator, OperationQueue};
use corral_cell::presence::PresenceMaintainer;
use corral_cell::processors::{LrpProcessor, TaskProcessor};
use corral_cell::server::{AppState, Server};
use corral_cell::supervisor::Supervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    config.validate()?;

    init_logging(if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });
    corral_cell::metrics::describe_metrics();

    let exit_code = run(config).await?;
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

async fn run(config: Config) -> Result<i32> {
    let cell_id = config.cell_id();
    tracing::info!(cell_id = %cell_id, zone = %config.zone, "cell agent starting");

    let http = build_http_client(
        config.communication_timeout(),
        &TlsConfig {
            ca_cert: config.ca_cert.clone(),
            client_cert: config.client_cert.clone(),
            client_key: config.client_key.clone(),
        },
    )?;
    let bbs: Arc<dyn BbsClient> = Arc::new(HttpBbsClient::new(config.bbs_url.clone(), http.clone()));
    let executor: Arc<dyn ExecutorClient> =
        Arc::new(HttpExecutorClient::new(config.executor_url.clone(), http.clone()));
    let store: Arc<dyn CoordinationStore> = Arc::new(HttpCoordinationStore::new(
        config.coordination_cluster.clone(),
        http,
    ));

    let evacuation_flag = Arc::new(EvacuationFlag::new());
    let delegate = Arc::new(ContainerDelegate::new(executor.clone()));
    let lrp_processor = Arc::new(LrpProcessor::new(
        cell_id.clone(),
        config.effective_lrp_host(),
        config.evacuation_timeout(),
        bbs.clone(),
        delegate.clone(),
        evacuation_flag.clone(),
    ));
    let task_processor = Arc::new(TaskProcessor::new(
        cell_id.clone(),
        bbs.clone(),
        executor.clone(),
        delegate.clone(),
        evacuation_flag.clone(),
    ));
    let generator = Arc::new(Generator::new(
        cell_id.clone(),
        bbs.clone(),
        executor.clone(),
        lrp_processor,
        task_processor,
    ));
    let queue = Arc::new(OperationQueue::new());

    let (evacuation_controller, evacuation) =
        EvacuationController::new(evacuation_flag.clone(), config.evacuation_timeout());

    let root_fs_providers = config.root_fs_providers()?;
    let rep = Arc::new(AuctionCellRep::new(
        cell_id.clone(),
        config.zone.clone(),
        root_fs_providers.clone(),
        executor.clone(),
        generator.clone(),
        queue.clone(),
        evacuation_flag,
    ));

    let presence = PresenceMaintainer::new(
        store,
        executor.clone(),
        CellPresence {
            cell_id: cell_id.clone(),
            rep_address: format!("http://{}", config.listen_addr),
            zone: config.zone.clone(),
            root_fs_providers,
        },
        config.lock_ttl(),
        config.lock_retry_interval(),
    );
    let bulker = Bulker::new(
        config.polling_interval(),
        config.evacuation_polling_interval(),
        generator.clone(),
        queue.clone(),
        evacuation.clone(),
    );
    let event_consumer = EventConsumer::new(executor.clone(), generator, queue.clone());

    let app_state = Arc::new(AppState {
        cell_id,
        rep,
        bbs,
        delegate,
        queue: queue.clone(),
        evacuation,
        sim: None,
    });
    let server = Server::new(app_state, config.listen_addr.clone());

    let (exit_tx, exit_rx) = tokio::sync::mpsc::channel(1);
    let mut supervisor = Supervisor::new();

    {
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("presence", async move { presence.run(shutdown).await });
    }
    {
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("bulker", async move { bulker.run(shutdown).await });
    }
    {
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("event-consumer", async move {
            event_consumer.run(shutdown).await
        });
    }
    for _ in 0..worker_count() {
        let queue = queue.clone();
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("operation-worker", async move {
            queue.run_worker(shutdown).await;
            Ok(())
        });
    }
    {
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("evacuation-controller", async move {
            evacuation_controller.run(shutdown, exit_tx).await
        });
    }
    {
        let shutdown = supervisor.shutdown_receiver();
        supervisor.spawn("http-server", async move { server.serve(shutdown).await });
    }

    tracing::info!("cell agent started");
    let exit_code = supervisor.run(exit_rx).await;
    tracing::info!(exit_code, "cell agent stopped");
    Ok(exit_code)
}

fn worker_count() -> usize {
    std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
}

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::oneshot;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use dwal::properties::ServerProperties;
use dwal::{handle_connection, http, CommitLog, Log};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let server_properties = env::args()
        .find(|arg| arg.contains("server.properties"))
        .map(PathBuf::from)
        .context("missing required server.properties argument")?;

    let server_properties = ServerProperties::load(&server_properties)
        .await
        .with_context(|| format!("parse {server_properties:?}"))?;

    info!(?server_properties, "loaded server properties");

    let log_dir = server_properties.log_dir.clone();
    let config = server_properties.config();

    let log = task::spawn_blocking(move || Log::open(log_dir, config))
        .await
        .context("open commit log task")?
        .context("open commit log")?;

    let log = Arc::new(log);

    info!(
        dir = %log.dir().display(),
        segments = log.segment_count(),
        "opened commit log"
    );

    let http_listener = TcpListener::bind(server_properties.http_listener)
        .await
        .context("failed to bind HTTP listener")?;

    let (http_shutdown, http_shutdown_rx) = oneshot::channel::<()>();

    let http_server = task::spawn({
        let log = Arc::clone(&log) as Arc<dyn CommitLog>;
        info!(addr = %server_properties.http_listener, "serving HTTP");
        http::serve(http_listener, log, async move {
            http_shutdown_rx.await.ok();
        })
    });

    let listener = TcpListener::bind(server_properties.rpc_listener)
        .await
        .context("failed to bind RPC listener")?;

    info!(addr = %server_properties.rpc_listener, "serving RPC");

    let result = loop {
        tokio::select! {
            // handle connections
            conn = listener.accept() => match conn {
                Ok((stream, addr)) => {
                    info!(%addr, "accepted new connection");

                    if let Err(e) = stream.set_nodelay(true) {
                        warn!(%addr, error = %e, "cannot enable TCP_NODELAY on connection");
                    }

                    let log = Arc::clone(&log) as Arc<dyn CommitLog>;

                    task::spawn(async move {
                        if let Err(e) = handle_connection(stream, log).await {
                            error!(%addr, "task handling connection failed with {e:?}");
                        }
                    });
                },

                Err(e) => error!("instance cannot get client: {e:?}"),
            },

            // handle signals
            sig = signal::ctrl_c() => match sig {
                Ok(()) => {
                    info!("received SIGINT, shutting down...");
                    break Ok(());
                },
                Err(e) => {
                    error!("terminating after error: {e}");
                    break Err(e).context("failed while receiving an interrupt signal");
                },
            }
        }

        // cooperatively yield from the main loop
        task::yield_now().await;
    };

    let _ = http_shutdown.send(());

    match http_server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("HTTP server failed with {e:?}"),
        Err(e) => error!("HTTP server task failed with {e:?}"),
    }

    task::spawn_blocking(move || log.close())
        .await
        .context("close commit log task")?
        .context("close commit log")?;

    info!("commit log closed");

    result
}

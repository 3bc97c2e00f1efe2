mod admin;
pub mod bootstrap;
mod state;

pub use state::GatewayState;

use crate::proxy;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// How long a stopping gateway keeps serving requests that were already
/// in flight before it gives up on them.
const DRAIN_GRACE: Duration = Duration::from_secs(30);

/// Accept proxy traffic until `shutdown` fires, then drain.
///
/// Each accepted connection runs on its own task; an atomic counter of
/// live connections is all the drain phase needs, since hyper finishes
/// in-flight requests when the accept loop stops feeding it new ones.
pub async fn run_proxy_server(
    listen: &str,
    state: GatewayState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("gateway: accepting traffic on {}", addr);

    let live = Arc::new(AtomicUsize::new(0));

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    live.fetch_add(1, Ordering::Relaxed);
                    serve_proxy_conn(stream, peer_addr, state.clone(), live.clone());
                }
                Err(e) => error!("gateway: accept failed: {}", e),
            },
            _ = shutdown.notified() => break,
        }
    }

    info!("gateway: listener closed, letting in-flight requests finish");
    drain(&live).await;
    Ok(())
}

fn serve_proxy_conn(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: GatewayState,
    live: Arc<AtomicUsize>,
) {
    tokio::spawn(async move {
        let io = TokioIo::new(stream);
        let svc_state = state.clone();
        let svc = service_fn(move |req: Request<Incoming>| {
            let state = svc_state.clone();
            async move { proxy::handle_request(req, state, peer_addr).await }
        });

        let served = auto::Builder::new(TokioExecutor::new())
            .http1()
            .keep_alive(true)
            .http2()
            .keep_alive_interval(Some(Duration::from_secs(20)))
            .serve_connection_with_upgrades(io, svc)
            .await;

        if let Err(e) = served {
            if !e.to_string().contains("connection closed") {
                error!("gateway: connection from {} ended with error: {}", peer_addr, e);
            }
        }

        live.fetch_sub(1, Ordering::Relaxed);
    });
}

/// Poll the live-connection count until it reaches zero or the grace
/// period runs out.
async fn drain(live: &Arc<AtomicUsize>) {
    let deadline = Instant::now() + DRAIN_GRACE;
    let mut remaining = live.load(Ordering::Relaxed);
    if remaining == 0 {
        return;
    }
    info!("gateway: {} connections still open, draining", remaining);

    while remaining > 0 {
        if Instant::now() >= deadline {
            warn!(
                "gateway: drain grace of {}s elapsed with {} connections open, dropping them",
                DRAIN_GRACE.as_secs(),
                remaining
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        remaining = live.load(Ordering::Relaxed);
    }
    info!("gateway: drain finished");
}

/// Serve the admin surface: health/readiness, Prometheus metrics, and
/// tenant route-table management. Runs until the process exits.
pub async fn run_admin_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("admin: serving on {}", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let conn_state = state.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = conn_state.clone();
                async move { admin::handle_admin(req, state).await }
            });

            let served = auto::Builder::new(TokioExecutor::new())
                .http1()
                .keep_alive(true)
                .serve_connection_with_upgrades(io, svc)
                .await;

            if let Err(e) = served {
                if !e.to_string().contains("connection closed") {
                    error!("admin: connection ended with error: {}", e);
                }
            }
        });
    }
}

use crate::config::Config;
use crate::proxy::hyper_host::{HyperProxy, HyperResponder, SessionGuard};
use crate::tunnel::{Dispatch, HostCapabilities, InboundRequest, RequestContext, TunnelController};
use anyhow::Result;
use hyper::{Body, Request, Response};
use log::{debug, error, warn};
use std::net::IpAddr;
use std::sync::Arc;

/// The request ended without a response the client can be given. hyper closes the
/// connection when a service fails with this.
#[derive(Debug, thiserror::Error)]
#[error("client connection dropped without a response")]
pub struct ConnectionDropped;

/// Handle HTTP request with the specified frontend scheme, using the current global config
pub async fn handle_request_with_scheme(frontend_scheme: &str, client_ip: IpAddr, req: Request<Body>) -> Result<Response<Body>> {
    let controller = Config::get().await.build_controller()?;
    handle_request(Arc::new(controller), frontend_scheme, client_ip, req).await
}

/// Runs one request through `controller`.
///
/// The controller runs on its own task so a tunnel can keep relaying after hyper has
/// been handed the 101. If this future is dropped before any response exists, the task
/// is aborted with it.
pub async fn handle_request(controller: Arc<TunnelController>, frontend_scheme: &str, client_ip: IpAddr, mut req: Request<Body>) -> Result<Response<Body>> {
    let path = req.uri().path_and_query().map(|pq| pq.as_str()).unwrap_or("/").to_string();
    let on_upgrade = hyper::upgrade::on(&mut req);
    let (responder, head_rx, client) = HyperResponder::new(on_upgrade);

    let inbound = InboundRequest {
        method: req.method().clone(),
        path,
        version: req.version(),
        headers: req.headers().clone(),
        context: RequestContext { client_ip, scheme: frontend_scheme.to_string() },
        capabilities: HostCapabilities::full(),
        client: Some(client.acquire()),
    };
    let fallback = HyperProxy::new(client_ip, controller.remote().proxy_base(), req);

    let mut session = SessionGuard::new(tokio::spawn(async move { controller.handle(inbound, responder, fallback).await }));

    if let Ok(response) = head_rx.await {
        session.detach();
        return Ok(response);
    }

    // No head was produced; the task's result says why.
    match session.join().await {
        Ok(Ok(Dispatch::Proxied(response))) => Ok(response),
        Ok(Ok(Dispatch::Tunneled(report))) => {
            debug!("Tunnel for {} closed by {} before a response head was sent", client_ip, report.initiator);
            Err(ConnectionDropped.into())
        }
        Ok(Err(e)) => {
            warn!("Upgrade request from {} ended without a response: {}", client_ip, e);
            Err(ConnectionDropped.into())
        }
        Err(e) => {
            error!("Tunnel task for {} failed: {}", client_ip, e);
            Err(ConnectionDropped.into())
        }
    }
}

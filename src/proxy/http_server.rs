use crate::config::Config;
use crate::proxy::request_handler::{ConnectionDropped, handle_request_with_scheme};
use anyhow::Result;
use hyper::server::Builder;
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, StatusCode};
use log::{error, info};
use std::convert::Infallible;

/// Start the reverse proxy server on the configured listen address
pub async fn start_rp_server() -> Result<()> {
    loop {
        let addr = Config::get().await.listen_addr()?;

        let builder = match hyper::Server::try_bind(&addr) {
            Ok(b) => b,
            Err(e) => {
                error!("Failed to bind reverse proxy on {}: {}", addr, e);
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                continue;
            }
        };

        info!("Reverse Proxy Server running on {}", addr);

        if let Err(e) = serve(builder).await {
            error!("Server error: {}", e);
            // Loop will retry bind/start
        }
    }
}

/// Serve on an already bound listener until the server fails.
pub async fn serve_listener(listener: std::net::TcpListener) -> Result<()> {
    listener.set_nonblocking(true)?;
    Ok(serve(hyper::Server::from_tcp(listener)?).await?)
}

async fn serve(builder: Builder<AddrIncoming>) -> hyper::Result<()> {
    let make_svc = make_service_fn(move |conn: &AddrStream| {
        let remote_addr = conn.remote_addr().ip();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let client_ip = remote_addr;
                async move {
                    match handle_request_with_scheme("http", client_ip, req).await {
                        Ok(resp) => Ok(resp),
                        Err(e) if e.is::<ConnectionDropped>() => Err(e),
                        Err(e) => {
                            error!("handle_request error from {}: {}", client_ip, e);
                            let mut resp = Response::new(Body::empty());
                            *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            Ok::<_, anyhow::Error>(resp)
                        }
                    }
                }
            }))
        }
    });

    builder.serve(make_svc).await
}

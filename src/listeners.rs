use axum_server::tls_rustls::RustlsConfig;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use tokio::net::TcpListener;

// Loads the PEM certificate chain and private key used to serve HTTPS.
pub async fn load_tls_config(cert: &Path, key: &Path) -> io::Result<RustlsConfig> {
    tracing::info!("Loading TLS certificate {:?} and key {:?}", cert, key);
    RustlsConfig::from_pem_file(cert, key)
        .await
        .map_err(|e| io::Error::new(e.kind(), format!("invalid TLS certificate or key: {}", e)))
}

// Binds the HTTP listener.
// "*" means every interface: IPv6 dual-stack when available, IPv4 otherwise.
pub async fn create_listener(host: &str, port: u16) -> io::Result<(SocketAddr, TcpListener)> {
    if host == "*" {
        return bind_wildcard(port);
    }

    let addr = format!("{}:{}", host, port);
    tracing::info!("Attempting to bind server to {}...", addr);

    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    Ok((local_addr, listener))
}

fn bind_wildcard(port: u16) -> io::Result<(SocketAddr, TcpListener)> {
    let v6_addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    tracing::info!(
        "Attempting to bind server to {}... (IPv6 + IPv4 dual-stack)",
        v6_addr
    );

    match bind_socket(v6_addr, true) {
        Ok(listener) => return Ok((v6_addr, listener)),
        Err(e) => tracing::warn!("Failed to bind IPv6 listener: {}. Attempting IPv4 only.", e),
    }

    let v4_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    tracing::info!("Attempting to bind server to {}... (IPv4)", v4_addr);
    Ok((v4_addr, bind_socket(v4_addr, false)?))
}

fn bind_socket(addr: SocketAddr, dual_stack: bool) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if dual_stack {
        // Some systems refuse this; IPv6-only still serves IPv6 clients.
        if let Err(e) = socket.set_only_v6(false) {
            tracing::warn!(
                "Failed to set dual-stack mode for IPv6 socket: {}. Continuing anyway.",
                e
            );
        }
    }

    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;

    TcpListener::from_std(socket.into())
}

use std::net::SocketAddr;

use tokio::net::TcpListener;

use crate::stream::Stream;

pub trait ConnectingStream {
    type Stream: Stream;

    fn handshake(self) -> impl std::future::Future<Output = std::io::Result<Self::Stream>> + Send;

    fn peer_addr(&self) -> SocketAddr;
}

pub trait Listener {
    type ConnectingStream: ConnectingStream + Send + 'static;

    fn accept(
        &self,
    ) -> impl std::future::Future<Output = std::io::Result<Self::ConnectingStream>> + Send;
}

/// Bind a TCP socket from the std:: to be blocking (this function is not async),
/// then convert to a tokio:: listener for future use.
/// It has to be called within a tokio runtime with IO enabled.
fn bind_tcp_socket(addr: &str) -> std::io::Result<TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    TcpListener::from_std(listener)
}

pub struct TCPConnectingStream {
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
}

impl ConnectingStream for TCPConnectingStream {
    type Stream = tokio::net::TcpStream;

    async fn handshake(self) -> std::io::Result<Self::Stream> {
        Ok(self.stream)
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

pub struct TCPListener {
    listener: TcpListener,
}

impl TCPListener {
    pub fn try_new(address: &str, port: u16) -> anyhow::Result<Self> {
        let addr = format!("{address}:{port}");
        let listener = bind_tcp_socket(&addr)?;

        log::info!("listening on {addr}");
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

impl Listener for TCPListener {
    type ConnectingStream = TCPConnectingStream;

    async fn accept(&self) -> std::io::Result<Self::ConnectingStream> {
        let (stream, peer_addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;

        Ok(TCPConnectingStream { stream, peer_addr })
    }
}

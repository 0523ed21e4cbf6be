use modircd_core::{ServerRegistry, ServerState};

use crate::listener::{ConnectingStream, Listener};
use crate::session::{SessionConfig, run_session};

fn handle_client<C>(
    registry: ServerRegistry,
    server_state: ServerState,
    config: SessionConfig,
    connecting: C,
) where
    C: ConnectingStream + Send + 'static,
{
    let fut = async move {
        let peer_addr = connecting.peer_addr();
        // wait until we are in the async task to throw the error
        let stream = connecting.handshake().await?;

        run_session(
            stream,
            peer_addr.ip().to_string(),
            registry,
            server_state,
            config,
        )
        .await;
        log::info!("end of session for {peer_addr}");
        anyhow::Ok(())
    };

    tokio::spawn(async move {
        if let Err(err) = fut.await {
            log::error!("error when handling client: {err}");
        }
    });
}

pub async fn run_server<L: Listener>(
    listener: L,
    registry: ServerRegistry,
    server_state: ServerState,
    config: SessionConfig,
) -> ! {
    loop {
        match listener.accept().await {
            Ok(connecting) => {
                handle_client(registry.clone(), server_state.clone(), config, connecting);
            }
            Err(err) => log::warn!("cannot accept a connection: {err}"),
        }
    }
}

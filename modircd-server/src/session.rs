use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use modircd_core::{ServerRegistry, ServerState, handle_message};
use modircd_parser::{LendingIterator, StreamParser};

use crate::message_throttler::MessageThrottler;
use crate::stream::Stream;

const READ_BUFFER_SIZE: usize = 4096;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub messages_per_second: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            messages_per_second: 20,
        }
    }
}

pub async fn run_session(
    mut stream: impl Stream,
    hostname: String,
    registry: ServerRegistry,
    server_state: ServerState,
    config: SessionConfig,
) {
    let mut stream_parser = StreamParser::default();
    let mut message_throttler = MessageThrottler::new(config.messages_per_second);
    let mut read_buf = vec![0u8; READ_BUFFER_SIZE];

    let (user_id, mut mailbox) = server_state.new_user(&hostname);
    log::info!("{user_id}: connected from {hostname}");
    let mut reason = "Connection closed";

    loop {
        tokio::select! {
            result = stream.read(&mut read_buf) => {
                let received = match result {
                    Ok(0) => break,
                    Ok(received) => received,
                    Err(err) => {
                        log::debug!("{user_id}: read error: {err}");
                        reason = "Read error";
                        break;
                    }
                };
                stream_parser.feed_from_slice(read_buf.get(..received).unwrap_or_default());

                let mut iter = stream_parser.consume_iter();
                while let Some(message) = iter.next() {
                    let message = match message {
                        Ok(m) => m,
                        Err(err) => {
                            log::warn!("{user_id}: error when parsing message: {err:#}");
                            continue;
                        }
                    };

                    handle_message(&registry, &server_state, user_id, &message);
                    message_throttler.maybe_slow_down().await;
                }
            },
            msg = mailbox.recv() => {
                if let Some(msg) = msg {
                    if stream.write_all(&msg).await.is_err() {
                        reason = "Write error";
                        break;
                    }
                } else {
                    // the user left the server state (QUIT, bad password)
                    break;
                }
            }
        }
    }

    server_state.remove_user(user_id, reason);
    // close the mailbox, we don't want to receive any more messages at this point
    mailbox.close();

    // handle the disconnection gracefully by sending remaining
    // messages (in case the client asked a QUIT for example)
    let mut buf = Vec::new();
    while let Ok(msg) = mailbox.try_recv() {
        buf.extend_from_slice(&msg);
    }
    // try to send the messages, but don't hang on the client just for theses
    let _ = tokio::time::timeout(FLUSH_TIMEOUT, stream.write_all(&buf)).await;
}

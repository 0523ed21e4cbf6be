mod listener;
mod message_throttler;
mod server;
mod session;
mod stream;

pub use listener::{ConnectingStream, Listener, TCPListener};
pub use server::run_server;
pub use session::{run_session, SessionConfig};
pub use stream::Stream;

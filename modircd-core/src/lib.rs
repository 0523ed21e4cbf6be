#[macro_use]
mod mailbox;
mod client_to_server;
mod command_table;
mod commands;
mod error;
mod event;
mod extban;
pub mod glob;
mod membership;
mod module;
mod registry;
mod report;
mod server_state;
mod server_to_client;
mod types;


pub use client_to_server::handle_message;
pub use command_table::{CommandSpec, HandlerOutcome, HandlerResult, Invocation};
pub use commands::register_core_commands;
pub use error::{DispatchError, HandlerError, ListenerFault, RegistryError};
pub use event::{
    CheckBan, Event, EventKind, ISupport, Listener, ListenerResult, PreJoin, PreMessage, Priority,
    SubscriptionId, Verdict,
};
pub use extban::{check_channel_ban, ChannelExtban, CHANNEL_EXTBAN};
pub use mailbox::{MailboxSink, SerializedMessage};
pub use membership::{find_prefix, find_prefix_mode, ChannelMembership, Membership, PrefixMode};
pub use module::{Module, ModuleCatalog, ModuleContext, ModuleFactory, ModuleId, ModuleInfo, ModuleState};
pub use registry::Registry;
pub use report::{CommandStats, LogReporter, Reporter};
pub use server_state::{Operator, ServerConfig, ServerRegistry, ServerState};
pub use types::{UserID, UserModes};

/// Modules shipped with the server, loadable by name.
pub fn builtin_modules() -> ModuleCatalog<ServerState> {
    ModuleCatalog::default().with(ChannelExtban::NAME, ChannelExtban::instantiate)
}

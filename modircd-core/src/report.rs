use crate::error::ListenerFault;
use crate::event::EventKind;

/// Receives what the registry observes but does not act upon.
pub trait Reporter: Send + Sync {
    fn listener_fault(&self, module: &str, event: EventKind, fault: &ListenerFault);
}

/// Reports through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn listener_fault(&self, module: &str, event: EventKind, fault: &ListenerFault) {
        log::error!("listener of {module} on {event} faulted: {fault}");
    }
}

/// Usage counters of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStats {
    pub name: String,
    pub owner: String,
    pub use_count: u64,
    pub total_bytes: u64,
}

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{DispatchError, HandlerError, RegistryError};
use crate::event::panic_message;
use crate::module::ModuleId;
use crate::registry::Registry;
use crate::report::CommandStats;
use crate::types::{UserID, UserModes};

/// A command as received from a client, ready to be dispatched.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'i> {
    pub source: UserID,
    /// upper case command token
    pub command: &'i str,
    pub params: &'i [&'i str],
    pub flags: UserModes,
}

impl Invocation<'_> {
    fn param_bytes(&self) -> u64 {
        self.params.iter().map(|p| p.len() as u64).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Handled,
    /// accepted, the work continues on another task
    Pending,
}

pub type HandlerResult = Result<HandlerOutcome, HandlerError>;
pub type Handler<S> =
    Arc<dyn Fn(&Registry<S>, &S, &Invocation<'_>) -> HandlerResult + Send + Sync>;

/// Name and validation rules of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    name: String,
    min_params: usize,
    required_flag: Option<char>,
}

impl CommandSpec {
    pub fn new(name: &str, min_params: usize) -> Self {
        Self {
            name: name.to_owned(),
            min_params,
            required_flag: None,
        }
    }

    /// Only users holding the user mode `flag` may invoke the command.
    #[must_use]
    pub fn requires(self, flag: char) -> Self {
        Self {
            required_flag: Some(flag),
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub(crate) struct Command<S> {
    spec: CommandSpec,
    owner: ModuleId,
    use_count: AtomicU64,
    total_bytes: AtomicU64,
    handler: Handler<S>,
}

impl<S> Command<S> {
    pub(crate) fn new(spec: CommandSpec, owner: ModuleId, handler: Handler<S>) -> Self {
        Self {
            spec,
            owner,
            use_count: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            handler,
        }
    }

    pub(crate) fn owner(&self) -> ModuleId {
        self.owner
    }

    fn validate(&self, invocation: &Invocation<'_>) -> Result<(), DispatchError> {
        if invocation.params.len() < self.spec.min_params {
            return Err(DispatchError::NeedMoreParams {
                command: self.spec.name.clone(),
                required: self.spec.min_params,
                given: invocation.params.len(),
            });
        }

        if let Some(flag) = self.spec.required_flag {
            if !invocation.flags.contains(flag) {
                return Err(DispatchError::NoPrivileges {
                    command: self.spec.name.clone(),
                    flag,
                });
            }
        }

        Ok(())
    }

    /// Validate, run the handler, then account for the invocation.
    ///
    /// A panicking handler is reported as [`HandlerError::Panicked`] and
    /// still counts as an invocation.
    pub(crate) fn invoke(
        &self,
        registry: &Registry<S>,
        state: &S,
        invocation: &Invocation<'_>,
    ) -> Result<HandlerOutcome, DispatchError> {
        self.validate(invocation)?;

        let result = catch_unwind(AssertUnwindSafe(|| {
            (self.handler)(registry, state, invocation)
        }))
        .unwrap_or_else(|payload| Err(HandlerError::Panicked(panic_message(&*payload))));

        self.use_count.fetch_add(1, Ordering::Relaxed);
        self.total_bytes
            .fetch_add(invocation.param_bytes(), Ordering::Relaxed);

        result.map_err(|source| DispatchError::Handler {
            command: self.spec.name.clone(),
            source,
        })
    }

    pub(crate) fn stats(&self, owner: String) -> CommandStats {
        CommandStats {
            name: self.spec.name.clone(),
            owner,
            use_count: self.use_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct CommandTable<S> {
    commands: HashMap<String, Arc<Command<S>>>,
}

impl<S> Default for CommandTable<S> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
        }
    }
}

impl<S> CommandTable<S> {
    pub(crate) fn insert(&mut self, command: Command<S>) -> Result<(), RegistryError> {
        if self.commands.contains_key(&command.spec.name) {
            return Err(RegistryError::DuplicateCommand {
                name: command.spec.name,
            });
        }
        self.commands
            .insert(command.spec.name.clone(), Arc::new(command));
        Ok(())
    }

    pub(crate) fn remove(&mut self, name: &str) -> bool {
        self.commands.remove(name).is_some()
    }

    pub(crate) fn remove_all_owned_by(&mut self, owner: ModuleId) -> usize {
        let before = self.commands.len();
        self.commands.retain(|_, command| command.owner != owner);
        before - self.commands.len()
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<Command<S>>> {
        self.commands.get(name).cloned()
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub(crate) fn count_owned_by(&self, owner: ModuleId) -> usize {
        self.commands
            .values()
            .filter(|command| command.owner == owner)
            .count()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Command<S>> {
        self.commands.values().map(AsRef::as_ref)
    }
}

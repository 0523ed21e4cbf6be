use std::collections::BTreeMap;
use std::sync::Arc;

use crate::command_table::{CommandSpec, Handler, HandlerResult, Invocation};
use crate::error::RegistryError;
use crate::event::{Event, EventKind, Listener, ListenerResult, Priority};
use crate::registry::Registry;

/// Owner of commands and subscriptions. `ModuleId::CORE` is the server itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub const CORE: ModuleId = ModuleId(0);

    pub(crate) fn nth(n: u32) -> Self {
        ModuleId(n)
    }

    pub fn is_core(self) -> bool {
        self == Self::CORE
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_core() {
            f.write_str("<core>")
        } else {
            write!(f, "module#{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// `Module::load` is running; nothing it registers is visible yet
    Loading,
    Active,
}

/// A bundle of commands and listeners that can be loaded and unloaded at runtime.
///
/// `load` declares everything the module contributes through the context. The
/// registry commits all of it at once, or nothing if `load` fails or a command
/// name is taken.
pub trait Module<S>: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn load(&self, ctx: &mut ModuleContext<S>) -> Result<(), RegistryError>;

    /// Called once the module's commands and listeners are gone.
    fn on_unload(&self) {}
}

/// What a module declares while loading.
pub struct ModuleContext<S> {
    id: ModuleId,
    name: Arc<str>,
    pub(crate) commands: Vec<(CommandSpec, Handler<S>)>,
    pub(crate) subscriptions: Vec<(EventKind, Priority, Listener)>,
}

impl<S> ModuleContext<S> {
    pub(crate) fn new(id: ModuleId, name: Arc<str>) -> Self {
        Self {
            id,
            name,
            commands: Vec::new(),
            subscriptions: Vec::new(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_command<F>(&mut self, spec: CommandSpec, handler: F)
    where
        F: Fn(&Registry<S>, &S, &Invocation<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.commands.push((spec, Arc::new(handler)));
    }

    pub fn subscribe<F>(&mut self, kind: EventKind, priority: Priority, listener: F)
    where
        F: Fn(&mut Event<'_>) -> ListenerResult + Send + Sync + 'static,
    {
        self.subscriptions.push((kind, priority, Arc::new(listener)));
    }
}

pub(crate) struct ModuleRecord<S> {
    pub(crate) id: ModuleId,
    pub(crate) name: Arc<str>,
    pub(crate) module: Arc<dyn Module<S>>,
    pub(crate) state: ModuleState,
}

impl<S> ModuleRecord<S> {
    pub(crate) fn info(&self) -> ModuleInfo {
        ModuleInfo {
            id: self.id,
            name: self.name.to_string(),
            description: self.module.description().to_owned(),
            state: self.state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub name: String,
    pub description: String,
    pub state: ModuleState,
}

pub type ModuleFactory<S> = fn() -> Arc<dyn Module<S>>;

/// Modules compiled into the server, loadable by name.
pub struct ModuleCatalog<S> {
    factories: BTreeMap<String, ModuleFactory<S>>,
}

impl<S> Default for ModuleCatalog<S> {
    fn default() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }
}

impl<S> ModuleCatalog<S> {
    #[must_use]
    pub fn with(mut self, name: &str, factory: ModuleFactory<S>) -> Self {
        self.factories.insert(name.to_owned(), factory);
        self
    }

    pub fn instantiate(&self, name: &str) -> Option<Arc<dyn Module<S>>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::command_table::{
    Command, CommandSpec, CommandTable, Handler, HandlerOutcome, HandlerResult, Invocation,
};
use crate::error::{DispatchError, RegistryError};
use crate::event::{
    run_chain, Event, EventChain, EventKind, ListenerResult, Priority, SubscriptionId, Verdict,
};
use crate::module::{
    Module, ModuleCatalog, ModuleContext, ModuleId, ModuleInfo, ModuleRecord, ModuleState,
};
use crate::report::{CommandStats, LogReporter, Reporter};

/// Commands, event listeners, and the modules that own them.
///
/// Cloning is cheap, every clone refers to the same registry. A single lock guards
/// all of it: mutations take it exclusively for their whole update, while `dispatch`
/// and `fire` only hold it to look up what to call, never while calling it.
pub struct Registry<S>(Arc<Shared<S>>);

impl<S> Clone for Registry<S> {
    fn clone(&self) -> Self {
        Registry(Arc::clone(&self.0))
    }
}

struct Shared<S> {
    inner: RwLock<RegistryInner<S>>,
    reporter: Arc<dyn Reporter>,
    catalog: ModuleCatalog<S>,
}

struct RegistryInner<S> {
    commands: CommandTable<S>,
    events: EventChain,
    /// in load order
    modules: Vec<ModuleRecord<S>>,
    last_module: u32,
}

impl<S> RegistryInner<S> {
    fn ensure_active_owner(&self, owner: ModuleId) -> Result<(), RegistryError> {
        let active = owner.is_core()
            || self
                .modules
                .iter()
                .any(|m| m.id == owner && m.state == ModuleState::Active);
        if active {
            Ok(())
        } else {
            Err(RegistryError::InactiveOwner { owner })
        }
    }

    fn owner_name(&self, owner: ModuleId) -> Arc<str> {
        self.modules
            .iter()
            .find(|m| m.id == owner)
            .map_or_else(|| owner.to_string().into(), |m| Arc::clone(&m.name))
    }

    fn active_module(&self, name: &str) -> Option<&ModuleRecord<S>> {
        self.modules
            .iter()
            .find(|m| &*m.name == name && m.state == ModuleState::Active)
    }

    fn check_staged_commands(
        &self,
        staged: &[(CommandSpec, Handler<S>)],
    ) -> Result<(), RegistryError> {
        let mut seen = HashSet::new();
        for (spec, _) in staged {
            if self.commands.contains(spec.name()) || !seen.insert(spec.name()) {
                return Err(RegistryError::DuplicateCommand {
                    name: spec.name().to_owned(),
                });
            }
        }
        Ok(())
    }
}

impl<S> Registry<S> {
    pub fn new(catalog: ModuleCatalog<S>) -> Self {
        Self::with_reporter(catalog, Arc::new(LogReporter))
    }

    pub fn with_reporter(catalog: ModuleCatalog<S>, reporter: Arc<dyn Reporter>) -> Self {
        let inner = RegistryInner {
            commands: CommandTable::default(),
            events: EventChain::default(),
            modules: Vec::new(),
            last_module: 0,
        };
        Registry(Arc::new(Shared {
            inner: RwLock::new(inner),
            reporter,
            catalog,
        }))
    }
}

/// Command table
impl<S> Registry<S> {
    pub fn register_command<F>(
        &self,
        owner: ModuleId,
        spec: CommandSpec,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(&Registry<S>, &S, &Invocation<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        let mut inner = self.0.inner.write();
        inner.ensure_active_owner(owner)?;
        inner.commands.insert(Command::new(spec, owner, Arc::new(handler)))
    }

    /// Returns false if there was no such command.
    pub fn unregister_command(&self, name: &str) -> bool {
        self.0.inner.write().commands.remove(name)
    }

    pub fn unregister_all_commands_owned_by(&self, owner: ModuleId) -> usize {
        self.0.inner.write().commands.remove_all_owned_by(owner)
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.0.inner.read().commands.contains(name)
    }

    /// Validate `invocation` against the command it names and run its handler.
    pub fn dispatch(
        &self,
        state: &S,
        invocation: &Invocation<'_>,
    ) -> Result<HandlerOutcome, DispatchError> {
        let command = self.0.inner.read().commands.get(invocation.command);
        let Some(command) = command else {
            return Err(DispatchError::UnknownCommand {
                command: invocation.command.to_owned(),
            });
        };
        command.invoke(self, state, invocation)
    }

    /// Usage counters of every command, sorted by name.
    pub fn command_stats(&self) -> Vec<CommandStats> {
        let inner = self.0.inner.read();
        let mut stats = inner
            .commands
            .iter()
            .map(|command| command.stats(inner.owner_name(command.owner()).to_string()))
            .collect::<Vec<_>>();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

/// Event chain
impl<S> Registry<S> {
    pub fn subscribe<F>(
        &self,
        kind: EventKind,
        owner: ModuleId,
        priority: Priority,
        listener: F,
    ) -> Result<SubscriptionId, RegistryError>
    where
        F: Fn(&mut Event<'_>) -> ListenerResult + Send + Sync + 'static,
    {
        let mut inner = self.0.inner.write();
        inner.ensure_active_owner(owner)?;
        let owner_name = inner.owner_name(owner);
        Ok(inner
            .events
            .insert(kind, owner, owner_name, priority, Arc::new(listener)))
    }

    /// Returns false if there was no such subscription.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.0.inner.write().events.remove(id)
    }

    pub fn unsubscribe_all_owned_by(&self, owner: ModuleId) -> usize {
        self.0.inner.write().events.remove_all_owned_by(owner)
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.0.inner.read().events.count(kind)
    }

    /// Run the listeners of the event until one of them allows or denies.
    /// `Verdict::Passthru` means nobody decided and the caller applies its default.
    pub fn fire(&self, event: &mut Event<'_>) -> Verdict {
        let subscriptions = self.0.inner.read().events.snapshot(event.kind());
        match subscriptions {
            Some(subscriptions) => run_chain(&subscriptions, event, self.0.reporter.as_ref()),
            None => Verdict::Passthru,
        }
    }
}

/// Modules
impl<S> Registry<S> {
    /// Load a module: everything it declares becomes visible at once, or nothing does.
    pub fn load_module(&self, module: Arc<dyn Module<S>>) -> Result<ModuleId, RegistryError> {
        let name: Arc<str> = module.name().into();

        let id = {
            let mut inner = self.0.inner.write();
            if inner.modules.iter().any(|m| m.name == name) {
                return Err(RegistryError::DuplicateModule {
                    name: name.to_string(),
                });
            }
            inner.last_module += 1;
            let id = ModuleId::nth(inner.last_module);
            inner.modules.push(ModuleRecord {
                id,
                name: Arc::clone(&name),
                module: Arc::clone(&module),
                state: ModuleState::Loading,
            });
            id
        };

        let mut ctx = ModuleContext::new(id, Arc::clone(&name));
        let result = module.load(&mut ctx).and_then(|()| self.commit(id, ctx));
        match result {
            Ok(()) => {
                log::info!("loaded module {name} as {id}");
                Ok(id)
            }
            Err(err) => {
                self.0.inner.write().modules.retain(|m| m.id != id);
                log::warn!("cannot load module {name}: {err}");
                Err(err)
            }
        }
    }

    fn commit(&self, id: ModuleId, ctx: ModuleContext<S>) -> Result<(), RegistryError> {
        let mut guard = self.0.inner.write();
        let inner = &mut *guard;

        inner.check_staged_commands(&ctx.commands)?;

        let name = inner.owner_name(id);
        for (spec, handler) in ctx.commands {
            inner.commands.insert(Command::new(spec, id, handler))?;
        }
        for (kind, priority, listener) in ctx.subscriptions {
            inner
                .events
                .insert(kind, id, Arc::clone(&name), priority, listener);
        }

        if let Some(record) = inner.modules.iter_mut().find(|m| m.id == id) {
            record.state = ModuleState::Active;
        }
        Ok(())
    }

    pub fn load_module_by_name(&self, name: &str) -> Result<ModuleId, RegistryError> {
        let module = self
            .0
            .catalog
            .instantiate(name)
            .ok_or_else(|| RegistryError::UnknownModule {
                name: name.to_owned(),
            })?;
        self.load_module(module)
    }

    /// Remove every command and listener of the module in one step.
    pub fn unload_module(&self, id: ModuleId) -> Result<(), RegistryError> {
        let module = {
            let mut inner = self.0.inner.write();
            let position = inner
                .modules
                .iter()
                .position(|m| m.id == id && m.state == ModuleState::Active)
                .ok_or(RegistryError::NotLoaded { id })?;

            let commands = inner.commands.remove_all_owned_by(id);
            let listeners = inner.events.remove_all_owned_by(id);
            let record = inner.modules.remove(position);
            log::info!(
                "unloaded module {} ({commands} commands, {listeners} listeners)",
                record.name
            );
            record.module
        };

        module.on_unload();
        Ok(())
    }

    pub fn unload_module_by_name(&self, name: &str) -> Result<(), RegistryError> {
        let id = self.find_module(name).ok_or_else(|| RegistryError::UnknownModule {
            name: name.to_owned(),
        })?;
        self.unload_module(id)
    }

    /// Unload every module, the most recently loaded first.
    pub fn unload_all(&self) {
        let ids = self
            .0
            .inner
            .read()
            .modules
            .iter()
            .rev()
            .map(|m| m.id)
            .collect::<Vec<_>>();
        for id in ids {
            if let Err(err) = self.unload_module(id) {
                log::debug!("{err}");
            }
        }
    }

    pub fn find_module(&self, name: &str) -> Option<ModuleId> {
        self.0.inner.read().active_module(name).map(|m| m.id)
    }

    pub fn modules(&self) -> Vec<ModuleInfo> {
        self.0
            .inner
            .read()
            .modules
            .iter()
            .map(ModuleRecord::info)
            .collect()
    }

    /// Names of the modules that `load_module_by_name` knows about.
    pub fn available_modules(&self) -> Vec<String> {
        self.0.catalog.names().map(ToOwned::to_owned).collect()
    }

    /// Number of commands and subscriptions owned by `owner`.
    pub fn owned_entries(&self, owner: ModuleId) -> (usize, usize) {
        let inner = self.0.inner.read();
        (
            inner.commands.count_owned_by(owner),
            inner.events.count_owned_by(owner),
        )
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic_in_result_fn)] // fine in tests

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use rstest::rstest;

    use super::Registry;
    use crate::command_table::{CommandSpec, HandlerOutcome, Invocation};
    use crate::error::{DispatchError, HandlerError, ListenerFault, RegistryError};
    use crate::event::{Event, EventKind, ISupport, PreMessage, Priority, Verdict};
    use crate::module::{Module, ModuleCatalog, ModuleContext, ModuleId, ModuleState};
    use crate::report::testing::RecordingReporter;
    use crate::types::{UserID, UserModes};

    fn registry() -> Registry<()> {
        Registry::new(ModuleCatalog::default())
    }

    fn invocation<'i>(command: &'i str, params: &'i [&'i str]) -> Invocation<'i> {
        Invocation {
            source: UserID::generate(),
            command,
            params,
            flags: UserModes::default(),
        }
    }

    fn pre_message(registry: &Registry<()>) -> Verdict {
        let mut event = Event::PreMessage(PreMessage {
            user: UserID::generate(),
            target: "#chan",
            text: "hello",
        });
        registry.fire(&mut event)
    }

    struct TestModule {
        name: &'static str,
        commands: &'static [&'static str],
        verdict: Option<Verdict>,
        unloaded: Arc<Mutex<Vec<&'static str>>>,
    }

    impl TestModule {
        fn new(name: &'static str, commands: &'static [&'static str]) -> Self {
            Self {
                name,
                commands,
                verdict: None,
                unloaded: Arc::default(),
            }
        }

        fn voting(mut self, verdict: Verdict) -> Self {
            self.verdict = Some(verdict);
            self
        }
    }

    impl Module<()> for TestModule {
        fn name(&self) -> &str {
            self.name
        }

        fn load(&self, ctx: &mut ModuleContext<()>) -> Result<(), RegistryError> {
            for command in self.commands {
                ctx.register_command(CommandSpec::new(command, 0), |_, _, _| {
                    Ok(HandlerOutcome::Handled)
                });
            }
            if let Some(verdict) = self.verdict {
                ctx.subscribe(EventKind::PreMessage, Priority::DEFAULT, move |_| Ok(verdict));
            }
            Ok(())
        }

        fn on_unload(&self) {
            self.unloaded.lock().push(self.name);
        }
    }

    struct FailingModule;

    impl Module<()> for FailingModule {
        fn name(&self) -> &str {
            "failing"
        }

        fn load(&self, ctx: &mut ModuleContext<()>) -> Result<(), RegistryError> {
            ctx.register_command(CommandSpec::new("FAIL", 0), |_, _, _| Ok(HandlerOutcome::Handled));
            Err(RegistryError::LoadFailed {
                name: "failing".into(),
                reason: "missing configuration".into(),
            })
        }
    }

    #[rstest]
    #[case(&[])]
    #[case(&["a"])]
    #[case(&["", ""])]
    #[case(&["#chan", ":long trailing parameter"])]
    fn too_few_params(#[case] params: &[&str]) {
        let registry = registry();
        registry
            .register_command(ModuleId::CORE, CommandSpec::new("KICK", 3), |_, _, _| {
                Ok(HandlerOutcome::Handled)
            })
            .unwrap();

        let err = registry.dispatch(&(), &invocation("KICK", params)).unwrap_err();
        assert_eq!(
            err,
            DispatchError::NeedMoreParams {
                command: "KICK".into(),
                required: 3,
                given: params.len(),
            }
        );
        assert_eq!(registry.command_stats()[0].use_count, 0);
    }

    #[test]
    fn register_unregister() {
        let registry = registry();
        let unknown = DispatchError::UnknownCommand {
            command: "PING".into(),
        };
        assert_eq!(registry.dispatch(&(), &invocation("PING", &["x"])), Err(unknown.clone()));

        registry
            .register_command(ModuleId::CORE, CommandSpec::new("PING", 1), |_, _, _| {
                Ok(HandlerOutcome::Handled)
            })
            .unwrap();
        assert_eq!(
            registry.dispatch(&(), &invocation("PING", &["x"])),
            Ok(HandlerOutcome::Handled)
        );

        let err = registry
            .register_command(ModuleId::CORE, CommandSpec::new("PING", 0), |_, _, _| {
                Ok(HandlerOutcome::Handled)
            })
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCommand { name: "PING".into() });

        assert!(registry.unregister_command("PING"));
        assert!(!registry.unregister_command("PING"));
        assert_eq!(registry.dispatch(&(), &invocation("PING", &["x"])), Err(unknown));
    }

    #[test]
    fn privilege_flag() {
        let registry = registry();
        registry
            .register_command(
                ModuleId::CORE,
                CommandSpec::new("DIE", 0).requires('o'),
                |_, _, _| Ok(HandlerOutcome::Handled),
            )
            .unwrap();

        let mut inv = invocation("DIE", &[]);
        assert_eq!(
            registry.dispatch(&(), &inv),
            Err(DispatchError::NoPrivileges {
                command: "DIE".into(),
                flag: 'o'
            })
        );

        inv.flags = UserModes::default().with('o');
        assert_eq!(registry.dispatch(&(), &inv), Ok(HandlerOutcome::Handled));
    }

    #[test]
    fn counters_and_handler_errors() {
        let registry = registry();
        registry
            .register_command(ModuleId::CORE, CommandSpec::new("WORK", 1), |_, _, inv| {
                match inv.params.first().copied() {
                    Some("later") => Ok(HandlerOutcome::Pending),
                    Some("fail") => Err(HandlerError::Failed("cannot".into())),
                    _ => Ok(HandlerOutcome::Handled),
                }
            })
            .unwrap();

        assert_eq!(
            registry.dispatch(&(), &invocation("WORK", &["now", "abc"])),
            Ok(HandlerOutcome::Handled)
        );
        assert_eq!(
            registry.dispatch(&(), &invocation("WORK", &["later"])),
            Ok(HandlerOutcome::Pending)
        );
        assert_eq!(
            registry.dispatch(&(), &invocation("WORK", &["fail"])),
            Err(DispatchError::Handler {
                command: "WORK".into(),
                source: HandlerError::Failed("cannot".into())
            })
        );
        registry.dispatch(&(), &invocation("WORK", &[])).unwrap_err();

        let stats = registry.command_stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "WORK");
        assert_eq!(stats[0].owner, "<core>");
        assert_eq!(stats[0].use_count, 3);
        assert_eq!(stats[0].total_bytes, 6 + 5 + 4);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let registry = registry();
        registry
            .register_command(ModuleId::CORE, CommandSpec::new("BOOM", 0), |_, _, _| {
                panic!("handler bug")
            })
            .unwrap();

        assert_eq!(
            registry.dispatch(&(), &invocation("BOOM", &["abc"])),
            Err(DispatchError::Handler {
                command: "BOOM".into(),
                source: HandlerError::Panicked("handler bug".into())
            })
        );

        // the registry lock is not held by the unwound handler
        assert!(registry.has_command("BOOM"));
        let stats = registry.command_stats();
        assert_eq!(stats[0].use_count, 1);
        assert_eq!(stats[0].total_bytes, 3);
    }

    #[test]
    fn handler_sees_state_and_registry() {
        let registry = Registry::<AtomicUsize>::new(ModuleCatalog::default());
        registry
            .register_command(ModuleId::CORE, CommandSpec::new("COUNT", 0), |registry, state, _| {
                state.fetch_add(1, Ordering::SeqCst);
                assert!(registry.has_command("COUNT"));
                Ok(HandlerOutcome::Handled)
            })
            .unwrap();

        let state = AtomicUsize::new(0);
        let inv = Invocation {
            source: UserID::generate(),
            command: "COUNT",
            params: &[],
            flags: UserModes::default(),
        };
        registry.dispatch(&state, &inv).unwrap();
        registry.dispatch(&state, &inv).unwrap();
        assert_eq!(state.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn no_subscribers_or_all_passthru() {
        let registry = registry();
        assert_eq!(pre_message(&registry), Verdict::Passthru);

        for priority in [1, 2, 3] {
            registry
                .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority(priority), |_| {
                    Ok(Verdict::Passthru)
                })
                .unwrap();
        }
        assert_eq!(pre_message(&registry), Verdict::Passthru);
    }

    #[test]
    fn first_authoritative_verdict_wins() {
        let registry = registry();
        let spy = Arc::new(AtomicUsize::new(0));

        let spied = spy.clone();
        registry
            .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority(10), move |_| {
                spied.fetch_add(1, Ordering::SeqCst);
                Ok(Verdict::Allow)
            })
            .unwrap();
        registry
            .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority(0), |_| {
                Ok(Verdict::Passthru)
            })
            .unwrap();
        let deny = registry
            .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority(5), |_| {
                Ok(Verdict::Deny)
            })
            .unwrap();

        assert_eq!(pre_message(&registry), Verdict::Deny);
        assert_eq!(spy.load(Ordering::SeqCst), 0);

        assert!(registry.unsubscribe(deny));
        assert_eq!(pre_message(&registry), Verdict::Allow);
        assert_eq!(spy.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn equal_priorities_run_in_subscription_order() {
        let registry = registry();
        registry
            .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority::DEFAULT, |_| {
                Ok(Verdict::Allow)
            })
            .unwrap();
        registry
            .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority::DEFAULT, |_| {
                Ok(Verdict::Deny)
            })
            .unwrap();
        assert_eq!(pre_message(&registry), Verdict::Allow);
    }

    #[test]
    fn faulty_listener_is_isolated() {
        let reporter = Arc::new(RecordingReporter::default());
        let registry = Registry::<()>::with_reporter(ModuleCatalog::default(), reporter.clone());

        struct Faulty;
        impl Module<()> for Faulty {
            fn name(&self) -> &str {
                "faulty"
            }
            fn load(&self, ctx: &mut ModuleContext<()>) -> Result<(), RegistryError> {
                ctx.subscribe(EventKind::PreMessage, Priority::FIRST, |_| {
                    Err(ListenerFault::Failed("broken".into()))
                });
                ctx.subscribe(EventKind::PreMessage, Priority(1), |_| -> Result<Verdict, ListenerFault> {
                    panic!("listener bug")
                });
                Ok(())
            }
        }
        registry.load_module(Arc::new(Faulty)).unwrap();

        let after = Arc::new(AtomicUsize::new(0));
        let counted = after.clone();
        registry
            .subscribe(EventKind::PreMessage, ModuleId::CORE, Priority::LAST, move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Verdict::Deny)
            })
            .unwrap();

        assert_eq!(pre_message(&registry), Verdict::Deny);
        assert_eq!(after.load(Ordering::SeqCst), 1);

        let faults = reporter.faults();
        assert_eq!(faults.len(), 2);
        assert!(faults
            .iter()
            .all(|(module, kind, _)| module == "faulty" && *kind == EventKind::PreMessage));
        assert_eq!(faults[1].2, ListenerFault::Panicked("listener bug".into()));
    }

    #[test]
    fn build_isupport_collects_tokens() {
        let registry = registry();
        registry
            .subscribe(EventKind::BuildISupport, ModuleId::CORE, Priority::DEFAULT, |event| {
                if let Event::BuildISupport(isupport) = event {
                    isupport.add_extban('z');
                }
                Ok(Verdict::Passthru)
            })
            .unwrap();

        let mut isupport = ISupport::default();
        registry.fire(&mut Event::BuildISupport(&mut isupport));
        assert_eq!(isupport.get("EXTBAN"), Some(Some(",z")));
    }

    #[test]
    fn load_and_unload() {
        let registry = registry();
        let a = TestModule::new("a", &["AONE", "ATWO"]).voting(Verdict::Deny);
        let unloaded = a.unloaded.clone();
        let a = registry.load_module(Arc::new(a)).unwrap();
        let b = registry
            .load_module(Arc::new(TestModule::new("b", &["BONE"]).voting(Verdict::Allow)))
            .unwrap();

        assert_eq!(registry.find_module("a"), Some(a));
        assert_eq!(registry.owned_entries(a), (2, 1));
        assert_eq!(registry.subscriber_count(EventKind::PreMessage), 2);
        assert_eq!(pre_message(&registry), Verdict::Deny);

        let infos = registry.modules();
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|m| m.state == ModuleState::Active));

        let stats = registry.command_stats();
        assert_eq!(
            stats.iter().map(|s| (s.name.as_str(), s.owner.as_str())).collect::<Vec<_>>(),
            vec![("AONE", "a"), ("ATWO", "a"), ("BONE", "b")]
        );

        registry.unload_module(a).unwrap();
        assert_eq!(*unloaded.lock(), vec!["a"]);
        assert!(!registry.has_command("AONE"));
        assert!(!registry.has_command("ATWO"));
        assert!(registry.has_command("BONE"));
        assert_eq!(registry.owned_entries(a), (0, 0));
        assert_eq!(registry.owned_entries(b), (1, 1));
        assert_eq!(pre_message(&registry), Verdict::Allow);

        assert_eq!(registry.unload_module(a), Err(RegistryError::NotLoaded { id: a }));
        assert_eq!(
            registry.unload_module(ModuleId::CORE),
            Err(RegistryError::NotLoaded { id: ModuleId::CORE })
        );

        // the name is free again
        registry
            .load_module(Arc::new(TestModule::new("a", &["AONE"])))
            .unwrap();
    }

    #[test]
    fn failed_load_leaves_no_trace() {
        let registry = registry();
        registry
            .register_command(ModuleId::CORE, CommandSpec::new("TAKEN", 0), |_, _, _| {
                Ok(HandlerOutcome::Handled)
            })
            .unwrap();

        let clashing = TestModule::new("clashing", &["FREE", "TAKEN"]).voting(Verdict::Deny);
        let err = registry.load_module(Arc::new(clashing)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCommand { name: "TAKEN".into() });
        assert!(!registry.has_command("FREE"));
        assert_eq!(registry.subscriber_count(EventKind::PreMessage), 0);
        assert!(registry.modules().is_empty());

        let twice = TestModule::new("twice", &["SAME", "SAME"]);
        registry.load_module(Arc::new(twice)).unwrap_err();
        assert!(!registry.has_command("SAME"));

        let err = registry.load_module(Arc::new(FailingModule)).unwrap_err();
        assert!(matches!(err, RegistryError::LoadFailed { .. }));
        assert!(!registry.has_command("FAIL"));
        assert!(registry.modules().is_empty());
        assert_eq!(registry.command_stats().len(), 1);
    }

    #[test]
    fn duplicate_module_name() {
        let registry = registry();
        registry.load_module(Arc::new(TestModule::new("a", &[]))).unwrap();
        let err = registry
            .load_module(Arc::new(TestModule::new("a", &["OTHER"])))
            .unwrap_err();
        assert_eq!(err, RegistryError::DuplicateModule { name: "a".into() });
        assert!(!registry.has_command("OTHER"));
    }

    #[test]
    fn only_active_owners_register() {
        let registry = registry();
        let id = registry.load_module(Arc::new(TestModule::new("a", &[]))).unwrap();
        registry
            .register_command(id, CommandSpec::new("LATE", 0), |_, _, _| Ok(HandlerOutcome::Handled))
            .unwrap();
        registry.unload_module(id).unwrap();
        assert!(!registry.has_command("LATE"));

        let err = registry
            .subscribe(EventKind::CheckBan, id, Priority::DEFAULT, |_| Ok(Verdict::Deny))
            .unwrap_err();
        assert_eq!(err, RegistryError::InactiveOwner { owner: id });
    }

    #[test]
    fn catalog_and_unload_all() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let catalog = ModuleCatalog::default()
            .with("first", || -> Arc<dyn Module<()>> {
                Arc::new(TestModule::new("first", &["ONE"]))
            })
            .with("second", || -> Arc<dyn Module<()>> {
                Arc::new(TestModule::new("second", &["TWO"]))
            });
        let registry = Registry::<()>::new(catalog);
        assert_eq!(registry.available_modules(), vec!["first", "second"]);

        assert_eq!(
            registry.load_module_by_name("third"),
            Err(RegistryError::UnknownModule { name: "third".into() })
        );

        let mut first = TestModule::new("first", &["ONE"]);
        first.unloaded = order.clone();
        registry.load_module(Arc::new(first)).unwrap();
        registry.load_module_by_name("second").unwrap();
        let mut third = TestModule::new("third", &[]);
        third.unloaded = order.clone();
        registry.load_module(Arc::new(third)).unwrap();

        registry.unload_module_by_name("second").unwrap();
        assert!(!registry.has_command("TWO"));
        assert_eq!(
            registry.unload_module_by_name("second"),
            Err(RegistryError::UnknownModule { name: "second".into() })
        );

        registry.unload_all();
        assert!(registry.modules().is_empty());
        assert!(registry.command_stats().is_empty());
        assert_eq!(*order.lock(), vec!["third", "first"]);
    }

    #[test]
    fn unload_under_concurrent_dispatch() {
        let registry = registry();
        let a = registry
            .load_module(Arc::new(TestModule::new("a", &["AONE"]).voting(Verdict::Deny)))
            .unwrap();
        registry
            .load_module(Arc::new(TestModule::new("b", &["BONE"]).voting(Verdict::Passthru)))
            .unwrap();

        let unloaded = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..2000 {
                        let done = unloaded.load(Ordering::SeqCst);
                        assert_eq!(
                            registry.dispatch(&(), &invocation("BONE", &[])),
                            Ok(HandlerOutcome::Handled)
                        );
                        match registry.dispatch(&(), &invocation("AONE", &[])) {
                            Ok(HandlerOutcome::Handled) => assert!(!done),
                            Err(DispatchError::UnknownCommand { .. }) => {}
                            other => panic!("unexpected {other:?}"),
                        }
                        let verdict = pre_message(&registry);
                        assert!((verdict == Verdict::Deny && !done) || verdict == Verdict::Passthru);
                    }
                });
            }

            registry.unload_module(a).unwrap();
            unloaded.store(true, Ordering::SeqCst);
        });

        assert!(!registry.has_command("AONE"));
        assert!(registry.has_command("BONE"));
        assert_eq!(registry.subscriber_count(EventKind::PreMessage), 1);
        assert_eq!(pre_message(&registry), Verdict::Passthru);
    }
}

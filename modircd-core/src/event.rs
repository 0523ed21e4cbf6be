//! Prioritized interception points where modules can approve, veto, or abstain.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::error::ListenerFault;
use crate::membership::Membership;
use crate::module::ModuleId;
use crate::report::Reporter;
use crate::types::UserID;

/// Outcome of one listener, and of a whole chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny,
    /// no opinion, the next listener decides
    Passthru,
}

impl Verdict {
    pub fn is_authoritative(self) -> bool {
        self != Verdict::Passthru
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    CheckBan,
    BuildISupport,
    PreJoin,
    PreMessage,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventKind::CheckBan => "check_ban",
            EventKind::BuildISupport => "build_isupport",
            EventKind::PreJoin => "pre_join",
            EventKind::PreMessage => "pre_message",
        };
        f.write_str(name)
    }
}

/// May `user` be considered banned from `channel` by `mask`?
pub struct CheckBan<'e> {
    pub user: UserID,
    pub channel: &'e str,
    pub mask: &'e str,
    pub membership: &'e dyn Membership,
}

/// `user` is about to join `channel`.
pub struct PreJoin<'e> {
    pub user: UserID,
    pub channel: &'e str,
    pub membership: &'e dyn Membership,
}

/// `user` is about to send `text` to `target` (a channel or a nickname).
pub struct PreMessage<'e> {
    pub user: UserID,
    pub target: &'e str,
    pub text: &'e str,
}

pub enum Event<'e> {
    CheckBan(CheckBan<'e>),
    /// Listeners add their tokens and return `Passthru`. Every listener runs;
    /// a decision is logged and otherwise ignored.
    BuildISupport(&'e mut ISupport),
    PreJoin(PreJoin<'e>),
    PreMessage(PreMessage<'e>),
}

impl Event<'_> {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::CheckBan(_) => EventKind::CheckBan,
            Event::BuildISupport(_) => EventKind::BuildISupport,
            Event::PreJoin(_) => EventKind::PreJoin,
            Event::PreMessage(_) => EventKind::PreMessage,
        }
    }
}

/// RPL_ISUPPORT tokens, rendered in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ISupport {
    tokens: BTreeMap<String, Option<String>>,
}

impl ISupport {
    pub fn insert(&mut self, name: &str, value: Option<&str>) {
        self.tokens
            .insert(name.to_owned(), value.map(ToOwned::to_owned));
    }

    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.tokens.get(name).map(Option::as_deref)
    }

    /// Advertise an extended ban letter in `EXTBAN=,<letters>`.
    pub fn add_extban(&mut self, letter: char) {
        let value = self
            .tokens
            .entry("EXTBAN".to_owned())
            .or_default()
            .get_or_insert_with(|| ",".to_owned());
        if !value.starts_with(',') {
            value.insert(0, ',');
        }
        if !value.contains(letter) {
            value.push(letter);
        }
    }

    pub fn render(&self) -> Vec<String> {
        self.tokens
            .iter()
            .map(|(name, value)| match value {
                Some(value) => format!("{name}={value}"),
                None => name.clone(),
            })
            .collect()
    }
}

/// Listeners run in ascending priority; equal priorities run in subscription order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Priority(pub i32);

impl Priority {
    pub const FIRST: Priority = Priority(i32::MIN);
    pub const DEFAULT: Priority = Priority(0);
    pub const LAST: Priority = Priority(i32::MAX);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

pub type ListenerResult = Result<Verdict, ListenerFault>;
pub type Listener = Arc<dyn Fn(&mut Event<'_>) -> ListenerResult + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Subscription {
    id: SubscriptionId,
    owner: ModuleId,
    owner_name: Arc<str>,
    priority: Priority,
    listener: Listener,
}

impl Subscription {
    fn key(&self) -> (Priority, SubscriptionId) {
        (self.priority, self.id)
    }
}

/// Subscriptions per event kind.
///
/// Each list is shared with in-flight `fire` calls through an `Arc`, and mutations
/// copy the list when a call still holds it, so a running chain keeps iterating the
/// list it started with.
#[derive(Default)]
pub(crate) struct EventChain {
    chains: HashMap<EventKind, Arc<Vec<Subscription>>>,
    next_id: u64,
}

impl EventChain {
    pub(crate) fn insert(
        &mut self,
        kind: EventKind,
        owner: ModuleId,
        owner_name: Arc<str>,
        priority: Priority,
        listener: Listener,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let subscription = Subscription {
            id,
            owner,
            owner_name,
            priority,
            listener,
        };
        let chain = Arc::make_mut(self.chains.entry(kind).or_default());
        let position = chain.partition_point(|s| s.key() <= subscription.key());
        chain.insert(position, subscription);
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let kind = self
            .chains
            .iter()
            .find(|(_, chain)| chain.iter().any(|s| s.id == id))
            .map(|(kind, _)| *kind);
        let Some(kind) = kind else {
            return false;
        };
        if let Some(chain) = self.chains.get_mut(&kind) {
            Arc::make_mut(chain).retain(|s| s.id != id);
        }
        true
    }

    pub(crate) fn remove_all_owned_by(&mut self, owner: ModuleId) -> usize {
        let mut removed = 0;
        for chain in self.chains.values_mut() {
            if !chain.iter().any(|s| s.owner == owner) {
                continue;
            }
            let chain = Arc::make_mut(chain);
            let before = chain.len();
            chain.retain(|s| s.owner != owner);
            removed += before - chain.len();
        }
        removed
    }

    pub(crate) fn snapshot(&self, kind: EventKind) -> Option<Arc<Vec<Subscription>>> {
        self.chains.get(&kind).filter(|c| !c.is_empty()).cloned()
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.chains.get(&kind).map_or(0, |c| c.len())
    }

    pub(crate) fn count_owned_by(&self, owner: ModuleId) -> usize {
        self.chains
            .values()
            .map(|c| c.iter().filter(|s| s.owner == owner).count())
            .sum()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}

/// Run `subscriptions` in order until one of them decides.
/// `BuildISupport` always runs the whole chain.
pub(crate) fn run_chain(
    subscriptions: &[Subscription],
    event: &mut Event<'_>,
    reporter: &dyn Reporter,
) -> Verdict {
    let kind = event.kind();
    for subscription in subscriptions {
        let result = catch_unwind(AssertUnwindSafe(|| (subscription.listener)(event)))
            .unwrap_or_else(|payload| Err(ListenerFault::Panicked(panic_message(&*payload))));

        match result {
            Ok(Verdict::Passthru) => {}
            Ok(verdict) if kind == EventKind::BuildISupport => {
                log::warn!(
                    "{kind}: ignoring {verdict:?} from {}",
                    subscription.owner_name
                );
            }
            Ok(verdict) => {
                log::debug!(
                    "{kind}: {verdict:?} from {} (priority {})",
                    subscription.owner_name,
                    subscription.priority.0
                );
                return verdict;
            }
            Err(fault) => reporter.listener_fault(&subscription.owner_name, kind, &fault),
        }
    }
    Verdict::Passthru
}

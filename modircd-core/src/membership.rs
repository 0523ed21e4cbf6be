use crate::types::UserID;

/// A channel privilege tier, granted with a channel mode letter and shown with a prefix
/// symbol in front of nicknames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixMode {
    mode: char,
    prefix: char,
    rank: u32,
}

impl PrefixMode {
    pub const OP: PrefixMode = PrefixMode {
        mode: 'o',
        prefix: '@',
        rank: 30000,
    };
    pub const HALFOP: PrefixMode = PrefixMode {
        mode: 'h',
        prefix: '%',
        rank: 20000,
    };
    pub const VOICE: PrefixMode = PrefixMode {
        mode: 'v',
        prefix: '+',
        rank: 10000,
    };

    pub fn mode_char(&self) -> char {
        self.mode
    }

    pub fn prefix_char(&self) -> char {
        self.prefix
    }

    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub fn is_at_least(&self, other: PrefixMode) -> bool {
        self.rank >= other.rank
    }
}

/// Highest rank first.
pub const PREFIX_MODES: [PrefixMode; 3] = [PrefixMode::OP, PrefixMode::HALFOP, PrefixMode::VOICE];

/// Look up a tier by its prefix symbol (`@`, `%`, `+`).
pub fn find_prefix(prefix: char) -> Option<PrefixMode> {
    PREFIX_MODES.into_iter().find(|p| p.prefix == prefix)
}

/// Look up a tier by its channel mode letter (`o`, `h`, `v`).
pub fn find_prefix_mode(mode: char) -> Option<PrefixMode> {
    PREFIX_MODES.into_iter().find(|p| p.mode == mode)
}

/// One channel a user is in, with the highest tier they hold there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMembership<'m> {
    pub channel: &'m str,
    pub tier: Option<PrefixMode>,
}

impl ChannelMembership<'_> {
    pub fn has_at_least(&self, required: PrefixMode) -> bool {
        self.tier.is_some_and(|tier| tier.is_at_least(required))
    }
}

/// Read-only view of which channels a user is in.
///
/// Implementations must reflect the state at call time; listeners never cache it.
pub trait Membership {
    fn channels_of<'m>(&'m self, user: UserID)
        -> Box<dyn Iterator<Item = ChannelMembership<'m>> + 'm>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;

    use super::{ChannelMembership, Membership, PrefixMode};
    use crate::types::UserID;

    /// Membership backed by a fixed list, counting how often it is consulted.
    #[derive(Default)]
    pub(crate) struct FixedMembership {
        pub(crate) entries: Vec<(UserID, String, Option<PrefixMode>)>,
        pub(crate) lookups: Cell<usize>,
    }

    impl FixedMembership {
        pub(crate) fn with(mut self, user: UserID, channel: &str, tier: Option<PrefixMode>) -> Self {
            self.entries.push((user, channel.to_owned(), tier));
            self
        }
    }

    impl Membership for FixedMembership {
        fn channels_of<'m>(
            &'m self,
            user: UserID,
        ) -> Box<dyn Iterator<Item = ChannelMembership<'m>> + 'm> {
            self.lookups.set(self.lookups.get() + 1);
            Box::new(
                self.entries
                    .iter()
                    .filter(move |(u, _, _)| *u == user)
                    .map(|(_, channel, tier)| ChannelMembership {
                        channel: channel.as_str(),
                        tier: *tier,
                    }),
            )
        }
    }
}

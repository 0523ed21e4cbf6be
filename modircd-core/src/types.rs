use std::collections::HashMap;

use crate::{
    error::ServerStateError,
    mailbox::{Mailbox, MailboxSink},
    membership::{PrefixMode, PREFIX_MODES},
    server_to_client::{self, MessageContext},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserID(uuid::Uuid);

impl UserID {
    pub fn generate() -> Self {
        UserID(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for UserID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// User mode letters (`a`..=`z`) held by a client, as a bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct UserModes(u32);

impl UserModes {
    fn bit(letter: char) -> Option<u32> {
        letter
            .is_ascii_lowercase()
            .then(|| 1 << (u32::from(letter) - u32::from('a')))
    }

    /// Letters outside `a`..=`z` are ignored.
    #[must_use]
    pub fn with(self, letter: char) -> Self {
        Self(self.0 | Self::bit(letter).unwrap_or(0))
    }

    #[must_use]
    pub fn without(self, letter: char) -> Self {
        Self(self.0 & !Self::bit(letter).unwrap_or(0))
    }

    pub fn contains(self, letter: char) -> bool {
        Self::bit(letter).is_some_and(|bit| self.0 & bit != 0)
    }

    pub fn is_operator(self) -> bool {
        self.contains('o')
    }

    pub fn iter(self) -> impl Iterator<Item = char> {
        ('a'..='z').filter(move |&c| self.contains(c))
    }
}

impl FromIterator<char> for UserModes {
    fn from_iter<T: IntoIterator<Item = char>>(iter: T) -> Self {
        iter.into_iter().fold(UserModes::default(), UserModes::with)
    }
}

impl std::fmt::Display for UserModes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("+")?;
        self.iter().try_for_each(|c| write!(f, "{c}"))
    }
}

pub type ChannelID = String;

#[derive(Debug)]
pub(crate) struct User {
    pub(crate) user_id: UserID,
    pub(crate) nickname: Option<String>,
    pub(crate) username: Option<String>,
    pub(crate) realname: Option<String>,
    pub(crate) hostname: String,
    pub(crate) password: Option<Vec<u8>>,
    pub(crate) modes: UserModes,
    /// keys of the joined channels, in join order
    pub(crate) channels: Vec<ChannelID>,
    pub(crate) registered: bool,
    mailbox: Mailbox,
}

impl User {
    pub(crate) fn new(hostname: &str) -> (Self, MailboxSink) {
        let (mailbox, sink) = Mailbox::new();
        let user = Self {
            user_id: UserID::generate(),
            nickname: None,
            username: None,
            realname: None,
            hostname: hostname.to_owned(),
            password: None,
            modes: UserModes::default(),
            channels: Vec::new(),
            registered: false,
            mailbox,
        };
        (user, sink)
    }

    pub(crate) fn send(&self, message: &server_to_client::Message<'_>, context: &MessageContext) {
        message.write_to(&self.mailbox, context);
    }

    /// Nickname to use as the target of numeric replies.
    pub(crate) fn client(&self) -> String {
        self.nickname.clone().unwrap_or_else(|| "*".to_string())
    }

    pub(crate) fn fullspec(&self) -> String {
        format!(
            "{}!{}@{}",
            self.nickname.as_deref().unwrap_or("*"),
            self.username.as_deref().unwrap_or("*"),
            self.hostname
        )
    }

    pub(crate) fn is_ready(&self) -> bool {
        !self.registered && self.nickname.is_some() && self.username.is_some()
    }
}

/// Prefix modes held by a member of a channel.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub(crate) struct ChannelUserMode {
    op: bool,
    halfop: bool,
    voice: bool,
}

impl ChannelUserMode {
    fn slot(&mut self, prefix: PrefixMode) -> &mut bool {
        if prefix == PrefixMode::OP {
            &mut self.op
        } else if prefix == PrefixMode::HALFOP {
            &mut self.halfop
        } else {
            &mut self.voice
        }
    }

    pub(crate) fn with(mut self, prefix: PrefixMode) -> Self {
        *self.slot(prefix) = true;
        self
    }

    pub(crate) fn without(mut self, prefix: PrefixMode) -> Self {
        *self.slot(prefix) = false;
        self
    }

    pub(crate) fn has(&self, prefix: PrefixMode) -> bool {
        let mut mode = *self;
        *mode.slot(prefix)
    }

    /// The highest-ranked prefix mode held, if any.
    pub(crate) fn highest(&self) -> Option<PrefixMode> {
        PREFIX_MODES.into_iter().find(|p| self.has(*p))
    }

    pub(crate) fn is_op(&self) -> bool {
        self.op
    }

    pub(crate) fn is_at_least(&self, prefix: PrefixMode) -> bool {
        self.highest().is_some_and(|p| p.is_at_least(prefix))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct ChannelMode {
    moderated: bool,
    no_external: bool,
}

impl Default for ChannelMode {
    fn default() -> Self {
        Self {
            moderated: false,
            no_external: true,
        }
    }
}

impl ChannelMode {
    pub(crate) fn is_moderated(&self) -> bool {
        self.moderated
    }

    pub(crate) fn with_moderated(&self) -> Self {
        Self {
            moderated: true,
            ..*self
        }
    }

    pub(crate) fn without_moderated(&self) -> Self {
        Self {
            moderated: false,
            ..*self
        }
    }

    pub(crate) fn is_no_external(&self) -> bool {
        self.no_external
    }

    pub(crate) fn with_no_external(&self) -> Self {
        Self {
            no_external: true,
            ..*self
        }
    }

    pub(crate) fn without_no_external(&self) -> Self {
        Self {
            no_external: false,
            ..*self
        }
    }

    pub(crate) fn letters(&self) -> String {
        let mut letters = "+".to_string();
        if self.moderated {
            letters.push('m');
        }
        if self.no_external {
            letters.push('n');
        }
        letters
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ban {
    pub(crate) mask: String,
    pub(crate) set_by: String,
    pub(crate) set_at: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Channel {
    /// name as given by the user who created the channel
    pub(crate) name: String,
    pub(crate) users: HashMap<UserID, ChannelUserMode>,
    pub(crate) mode: ChannelMode,
    pub(crate) bans: Vec<Ban>,
}

impl Channel {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    pub(crate) fn ensure_user_can_set_channel_mode(
        &self,
        user: &User,
    ) -> Result<(), ServerStateError> {
        let user_mode = self
            .users
            .get(&user.user_id)
            .ok_or_else(|| ServerStateError::NotOnChannel {
                client: user.client(),
                channel: self.name.clone(),
            })?;

        if !user_mode.is_op() {
            return Err(ServerStateError::ChanOpPrivsNeeded {
                client: user.client(),
                channel: self.name.clone(),
            });
        }

        Ok(())
    }

    pub(crate) fn ensure_user_can_send_message(&self, user: &User) -> Result<(), ServerStateError> {
        let user_mode = self.users.get(&user.user_id);

        if self.mode.is_no_external() && user_mode.is_none() {
            return Err(ServerStateError::CannotSendToChan {
                client: user.client(),
                channel: self.name.clone(),
            });
        }

        let user_mode = user_mode.copied().unwrap_or_default();
        if self.mode.is_moderated() && !user_mode.is_at_least(PrefixMode::VOICE) {
            return Err(ServerStateError::CannotSendToChan {
                client: user.client(),
                channel: self.name.clone(),
            });
        }

        Ok(())
    }
}

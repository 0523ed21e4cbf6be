use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use subtle::ConstantTimeEq;

use crate::command_table::{HandlerOutcome, HandlerResult};
use crate::error::{HandlerError, RegistryError, ServerStateError};
use crate::event::{CheckBan, Event, ISupport, PreJoin, PreMessage, Verdict};
use crate::glob::{self, irc_eq, irc_lowercase};
use crate::mailbox::MailboxSink;
use crate::membership::{find_prefix_mode, ChannelMembership, Membership, PrefixMode, PREFIX_MODES};
use crate::registry::Registry;
use crate::server_to_client::{self, MessageContext, NamesReply};
use crate::types::{Ban, Channel, ChannelID, ChannelUserMode, User, UserID, UserModes};

pub type ServerRegistry = Registry<ServerState>;

const MAX_NICKNAME_LENGTH: usize = 30;
const MAX_CHANNEL_NAME_LENGTH: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub name: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub server_name: String,
    pub password: Option<String>,
    pub motd: Option<String>,
    pub operators: Vec<Operator>,
    /// Bounds the membership scans done on every ban check.
    pub max_channels_per_user: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "modircd".to_string(),
            password: None,
            motd: None,
            operators: Vec::new(),
            max_channels_per_user: 20,
        }
    }
}

/// Users, channels, and their memberships, shared by every session.
#[derive(Clone)]
pub struct ServerState(Arc<RwLock<ServerStateInner>>);

struct ServerStateInner {
    users: HashMap<UserID, User>,
    channels: HashMap<ChannelID, Channel>,

    config: ServerConfig,
    motd: Option<Vec<String>>,
    message_context: MessageContext,
}

impl Membership for ServerStateInner {
    fn channels_of<'m>(
        &'m self,
        user: UserID,
    ) -> Box<dyn Iterator<Item = ChannelMembership<'m>> + 'm> {
        let Some(u) = self.users.get(&user) else {
            return Box::new(std::iter::empty());
        };
        Box::new(u.channels.iter().filter_map(move |key| {
            let channel = self.channels.get(key)?;
            let mode = channel.users.get(&user)?;
            Some(ChannelMembership {
                channel: channel.name.as_str(),
                tier: mode.highest(),
            })
        }))
    }
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn is_special(c: char) -> bool {
    matches!(c, '[' | ']' | '\\' | '`' | '_' | '^' | '{' | '|' | '}')
}

fn is_valid_nickname(nickname: &str) -> bool {
    let mut chars = nickname.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    nickname.len() <= MAX_NICKNAME_LENGTH
        && (first.is_ascii_alphabetic() || is_special(first))
        && chars.all(|c| c.is_ascii_alphanumeric() || is_special(c) || c == '-')
}

fn is_valid_channel_name(name: &str) -> bool {
    name.len() > 1
        && name.len() <= MAX_CHANNEL_NAME_LENGTH
        && !name.contains([' ', ',', '\x07', ':'])
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let motd = config
            .motd
            .as_ref()
            .map(|motd| motd.lines().map(ToOwned::to_owned).collect());
        let sv = ServerStateInner {
            users: Default::default(),
            channels: Default::default(),
            message_context: MessageContext {
                server_name: config.server_name.clone(),
            },
            motd,
            config,
        };
        ServerState(Arc::new(RwLock::new(sv)))
    }

    /// Add a connection. The session ends when the returned sink closes.
    pub fn new_user(&self, hostname: &str) -> (UserID, MailboxSink) {
        let mut sv = self.0.write();
        let (user, sink) = User::new(hostname);
        let user_id = user.user_id;
        sv.users.insert(user_id, user);
        (user_id, sink)
    }

    /// Forget a user whose connection is gone, telling its channels.
    pub fn remove_user(&self, user_id: UserID, reason: &str) {
        let mut sv = self.0.write();
        sv.quit(user_id, reason);
    }

    pub fn user_flags(&self, user_id: UserID) -> Option<UserModes> {
        self.0.read().users.get(&user_id).map(|u| u.modes)
    }

    pub fn is_registered(&self, user_id: UserID) -> bool {
        self.0.read().users.get(&user_id).is_some_and(|u| u.registered)
    }

    pub(crate) fn client_name(&self, user_id: UserID) -> String {
        self.0
            .read()
            .users
            .get(&user_id)
            .map_or_else(|| "*".to_string(), User::client)
    }

    pub(crate) fn send_error(&self, user_id: UserID, error: ServerStateError) {
        self.0.read().send_error(user_id, error);
    }

    /// Run `f` for a known user, replying with the error it returns.
    fn with_user<F>(&self, user_id: UserID, f: F) -> HandlerResult
    where
        F: FnOnce(&mut ServerStateInner) -> Result<(), ServerStateError>,
    {
        let mut sv = self.0.write();
        if !sv.users.contains_key(&user_id) {
            return Err(HandlerError::UnknownSource);
        }
        if let Err(err) = f(&mut *sv) {
            sv.send_error(user_id, err);
        }
        Ok(HandlerOutcome::Handled)
    }
}

impl ServerStateInner {
    fn send_to(&self, user_id: UserID, message: &server_to_client::Message<'_>) {
        if let Some(user) = self.users.get(&user_id) {
            user.send(message, &self.message_context);
        }
    }

    fn send_error(&self, user_id: UserID, error: ServerStateError) {
        self.send_to(user_id, &server_to_client::Message::Err(error));
    }

    fn broadcast_to_channel(
        &self,
        key: &str,
        message: &server_to_client::Message<'_>,
        except: Option<UserID>,
    ) {
        let Some(channel) = self.channels.get(key) else {
            return;
        };
        for user_id in channel.users.keys() {
            if Some(*user_id) != except {
                self.send_to(*user_id, message);
            }
        }
    }

    /// Users sharing at least one channel with `user_id`.
    fn peers_of(&self, user_id: UserID) -> HashSet<UserID> {
        let Some(user) = self.users.get(&user_id) else {
            return HashSet::new();
        };
        user.channels
            .iter()
            .filter_map(|key| self.channels.get(key))
            .flat_map(|channel| channel.users.keys().copied())
            .filter(|id| *id != user_id)
            .collect()
    }

    fn find_registered_user(&self, nickname: &str) -> Option<&User> {
        self.users.values().find(|u| {
            u.registered && u.nickname.as_deref().is_some_and(|n| irc_eq(n, nickname))
        })
    }

    /// Ask the event chain about every stored mask; undecided masks are matched
    /// against `nick!user@host`.
    fn is_banned(&self, registry: &ServerRegistry, user_id: UserID, key: &str) -> bool {
        let (Some(user), Some(channel)) = (self.users.get(&user_id), self.channels.get(key)) else {
            return false;
        };
        if channel.bans.is_empty() {
            return false;
        }

        let fullspec = user.fullspec();
        channel.bans.iter().any(|ban| {
            let mut event = Event::CheckBan(CheckBan {
                user: user_id,
                channel: &channel.name,
                mask: &ban.mask,
                membership: self,
            });
            match registry.fire(&mut event) {
                Verdict::Deny => true,
                Verdict::Allow => false,
                Verdict::Passthru => glob::matches(&fullspec, &ban.mask),
            }
        })
    }

    fn isupport(&self, registry: &ServerRegistry) -> Vec<String> {
        let modes = PREFIX_MODES.iter().map(PrefixMode::mode_char).collect::<String>();
        let prefixes = PREFIX_MODES
            .iter()
            .map(PrefixMode::prefix_char)
            .collect::<String>();

        let mut isupport = ISupport::default();
        isupport.insert("CASEMAPPING", Some("rfc1459"));
        isupport.insert("CHANTYPES", Some("#"));
        isupport.insert("PREFIX", Some(format!("({modes}){prefixes}").as_str()));
        isupport.insert("CHANMODES", Some("b,,,mn"));
        isupport.insert(
            "CHANLIMIT",
            Some(format!("#:{}", self.config.max_channels_per_user).as_str()),
        );
        isupport.insert("NICKLEN", Some(MAX_NICKNAME_LENGTH.to_string().as_str()));
        isupport.insert("NETWORK", Some(self.config.server_name.as_str()));

        registry.fire(&mut Event::BuildISupport(&mut isupport));
        isupport.render()
    }
}

/// Registration
impl ServerState {
    pub(crate) fn user_nick(
        &self,
        registry: &ServerRegistry,
        user_id: UserID,
        nickname: &str,
    ) -> HandlerResult {
        self.with_user(user_id, |sv| sv.change_nick(registry, user_id, nickname))
    }

    pub(crate) fn user_user(
        &self,
        registry: &ServerRegistry,
        user_id: UserID,
        username: &str,
        realname: &str,
    ) -> HandlerResult {
        self.with_user(user_id, |sv| {
            sv.set_user_info(user_id, username, realname)?;
            sv.maybe_complete_registration(registry, user_id);
            Ok(())
        })
    }

    pub(crate) fn user_pass(&self, user_id: UserID, password: &str) -> HandlerResult {
        self.with_user(user_id, |sv| {
            let Some(user) = sv.users.get_mut(&user_id) else {
                return Ok(());
            };
            if user.registered {
                return Err(ServerStateError::AlreadyRegistered {
                    client: user.client(),
                });
            }
            user.password = Some(password.as_bytes().to_vec());
            Ok(())
        })
    }
}

impl ServerStateInner {
    fn change_nick(
        &mut self,
        registry: &ServerRegistry,
        user_id: UserID,
        nickname: &str,
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get(&user_id) else {
            return Ok(());
        };
        let client = user.client();

        if !is_valid_nickname(nickname) {
            return Err(ServerStateError::ErroneousNickname {
                client,
                nickname: nickname.into(),
            });
        }

        let in_use = self.users.values().any(|u| {
            u.user_id != user_id && u.nickname.as_deref().is_some_and(|n| irc_eq(n, nickname))
        });
        if in_use {
            return Err(ServerStateError::NicknameInUse {
                client,
                nickname: nickname.into(),
            });
        }

        let previous_user_fullspec = user.fullspec();
        let registered = user.registered;
        if let Some(user) = self.users.get_mut(&user_id) {
            user.nickname = Some(nickname.to_owned());
        }

        if registered {
            let message = server_to_client::Message::Nick {
                previous_user_fullspec: &previous_user_fullspec,
                nickname,
            };
            self.send_to(user_id, &message);
            for peer in self.peers_of(user_id) {
                self.send_to(peer, &message);
            }
        } else {
            self.maybe_complete_registration(registry, user_id);
        }
        Ok(())
    }

    fn set_user_info(
        &mut self,
        user_id: UserID,
        username: &str,
        realname: &str,
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get_mut(&user_id) else {
            return Ok(());
        };
        if user.registered {
            return Err(ServerStateError::AlreadyRegistered {
                client: user.client(),
            });
        }
        user.username = Some(username.to_owned());
        user.realname = Some(realname.to_owned());
        Ok(())
    }

    fn maybe_complete_registration(&mut self, registry: &ServerRegistry, user_id: UserID) {
        let Some(user) = self.users.get(&user_id) else {
            return;
        };
        if !user.is_ready() {
            return;
        }

        if let Some(expected) = &self.config.password {
            let given = user.password.as_deref().unwrap_or_default();
            if !bool::from(given.ct_eq(expected.as_bytes())) {
                let client = user.client();
                log::info!("{}: wrong connection password", user.fullspec());
                self.send_error(user_id, ServerStateError::PasswdMismatch { client });
                self.send_to(
                    user_id,
                    &server_to_client::Message::FatalError {
                        reason: "Bad password",
                    },
                );
                // dropping the user closes its mailbox, which ends the session
                self.users.remove(&user_id);
                return;
            }
        }

        let Some(user) = self.users.get_mut(&user_id) else {
            return;
        };
        user.registered = true;
        let nickname = user.client();
        let fullspec = user.fullspec();
        log::info!(
            "{fullspec} registered ({})",
            user.realname.as_deref().unwrap_or_default()
        );

        self.send_to(
            user_id,
            &server_to_client::Message::Welcome {
                nickname: &nickname,
                user_fullspec: &fullspec,
            },
        );
        let tokens = self.isupport(registry);
        self.send_to(
            user_id,
            &server_to_client::Message::ISupport {
                client: &nickname,
                tokens: &tokens,
            },
        );
        self.send_to(
            user_id,
            &server_to_client::Message::MOTD {
                client: &nickname,
                motd: self.motd.as_deref(),
            },
        );
    }
}

/// Channels
impl ServerState {
    pub(crate) fn user_joins(
        &self,
        registry: &ServerRegistry,
        user_id: UserID,
        channels: &str,
    ) -> HandlerResult {
        self.with_user(user_id, |sv| {
            for name in channels.split(',').filter(|c| !c.is_empty()) {
                if let Err(err) = sv.join_channel(registry, user_id, name) {
                    sv.send_error(user_id, err);
                }
            }
            Ok(())
        })
    }

    pub(crate) fn user_parts(
        &self,
        user_id: UserID,
        channels: &str,
        reason: Option<&str>,
    ) -> HandlerResult {
        self.with_user(user_id, |sv| {
            for name in channels.split(',').filter(|c| !c.is_empty()) {
                if let Err(err) = sv.part_channel(user_id, name, reason) {
                    sv.send_error(user_id, err);
                }
            }
            Ok(())
        })
    }

    pub(crate) fn user_mode(
        &self,
        user_id: UserID,
        target: &str,
        modestring: Option<&str>,
        params: &[&str],
    ) -> HandlerResult {
        self.with_user(user_id, |sv| {
            if target.starts_with('#') {
                sv.channel_mode(user_id, target, modestring, params)
            } else {
                sv.user_mode(user_id, target, modestring)
            }
        })
    }
}

impl ServerStateInner {
    fn join_channel(
        &mut self,
        registry: &ServerRegistry,
        user_id: UserID,
        name: &str,
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get(&user_id) else {
            return Ok(());
        };
        let client = user.client();

        if !name.starts_with('#') {
            return Err(ServerStateError::NoSuchChannel {
                client,
                channel: name.into(),
            });
        }
        if !is_valid_channel_name(name) {
            return Err(ServerStateError::BadChanMask {
                client,
                channel: name.into(),
            });
        }

        let key = irc_lowercase(name);
        if user.channels.contains(&key) {
            return Ok(());
        }
        if user.channels.len() >= self.config.max_channels_per_user {
            return Err(ServerStateError::TooManyChannels {
                client,
                channel: name.into(),
            });
        }

        let channel_name = self
            .channels
            .get(&key)
            .map_or(name, |c| c.name.as_str())
            .to_owned();

        let verdict = registry.fire(&mut Event::PreJoin(PreJoin {
            user: user_id,
            channel: &channel_name,
            membership: &*self,
        }));
        let refused = match verdict {
            Verdict::Deny => true,
            Verdict::Allow => false,
            Verdict::Passthru => self.is_banned(registry, user_id, &key),
        };
        if refused {
            return Err(ServerStateError::BannedFromChan {
                client,
                channel: channel_name,
            });
        }

        let channel = self
            .channels
            .entry(key.clone())
            .or_insert_with(|| Channel::new(name));
        let mode = if channel.users.is_empty() {
            ChannelUserMode::default().with(PrefixMode::OP)
        } else {
            ChannelUserMode::default()
        };
        channel.users.insert(user_id, mode);

        let Some(user) = self.users.get_mut(&user_id) else {
            return Ok(());
        };
        user.channels.push(key.clone());
        let fullspec = user.fullspec();
        log::debug!("{fullspec} joined {channel_name}");

        self.broadcast_to_channel(
            &key,
            &server_to_client::Message::Join {
                channel: &channel_name,
                user_fullspec: &fullspec,
            },
            None,
        );
        self.send_names(user_id, &key);
        Ok(())
    }

    fn send_names(&self, user_id: UserID, key: &str) {
        let (Some(user), Some(channel)) = (self.users.get(&user_id), self.channels.get(key)) else {
            return;
        };
        let members = channel
            .users
            .iter()
            .filter_map(|(id, mode)| {
                let nickname = self.users.get(id)?.nickname.clone()?;
                Some((nickname, mode.highest()))
            })
            .collect::<Vec<_>>();
        self.send_to(
            user_id,
            &server_to_client::Message::Names {
                client: &user.client(),
                names: NamesReply {
                    channel: &channel.name,
                    members: &members,
                },
            },
        );
    }

    fn part_channel(
        &mut self,
        user_id: UserID,
        name: &str,
        reason: Option<&str>,
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get(&user_id) else {
            return Ok(());
        };
        let key = irc_lowercase(name);
        let Some(channel) = self.channels.get(&key) else {
            return Err(ServerStateError::NoSuchChannel {
                client: user.client(),
                channel: name.into(),
            });
        };
        if !channel.users.contains_key(&user_id) {
            return Err(ServerStateError::NotOnChannel {
                client: user.client(),
                channel: channel.name.clone(),
            });
        }

        self.broadcast_to_channel(
            &key,
            &server_to_client::Message::Part {
                user_fullspec: &user.fullspec(),
                channel: &channel.name,
                reason,
            },
            None,
        );
        self.leave_channel(user_id, &key);
        Ok(())
    }

    fn leave_channel(&mut self, user_id: UserID, key: &str) {
        if let Some(channel) = self.channels.get_mut(key) {
            channel.users.remove(&user_id);
            if channel.users.is_empty() {
                self.channels.remove(key);
            }
        }
        if let Some(user) = self.users.get_mut(&user_id) {
            user.channels.retain(|k| k != key);
        }
    }

    fn ensure_chanop(&self, user_id: UserID, key: &str) -> Result<(), ServerStateError> {
        match (self.channels.get(key), self.users.get(&user_id)) {
            (Some(channel), Some(user)) => channel.ensure_user_can_set_channel_mode(user),
            _ => Ok(()),
        }
    }

    fn channel_mode(
        &mut self,
        user_id: UserID,
        target: &str,
        modestring: Option<&str>,
        params: &[&str],
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get(&user_id) else {
            return Ok(());
        };
        let client = user.client();
        let fullspec = user.fullspec();
        let key = irc_lowercase(target);
        let Some(channel) = self.channels.get(&key) else {
            return Err(ServerStateError::NoSuchChannel {
                client,
                channel: target.into(),
            });
        };
        let channel_name = channel.name.clone();

        let Some(modestring) = modestring else {
            self.send_to(
                user_id,
                &server_to_client::Message::ChannelMode {
                    client: &client,
                    channel: &channel_name,
                    mode: &channel.mode,
                },
            );
            return Ok(());
        };

        let mut params = params.iter().copied();
        let mut adding = true;
        for modechar in modestring.chars() {
            let sign = if adding { '+' } else { '-' };
            let mut param = None;
            let changed = match modechar {
                '+' => {
                    adding = true;
                    continue;
                }
                '-' => {
                    adding = false;
                    continue;
                }
                'b' => {
                    let Some(mask) = params.next() else {
                        if let Some(channel) = self.channels.get(&key) {
                            self.send_to(
                                user_id,
                                &server_to_client::Message::BanList {
                                    client: &client,
                                    channel: &channel.name,
                                    bans: &channel.bans,
                                },
                            );
                        }
                        continue;
                    };
                    self.ensure_chanop(user_id, &key)?;
                    param = Some(mask);
                    self.update_ban(&key, mask, &fullspec, adding)
                }
                'm' | 'n' => {
                    self.ensure_chanop(user_id, &key)?;
                    let Some(channel) = self.channels.get_mut(&key) else {
                        return Ok(());
                    };
                    let before = channel.mode;
                    channel.mode = match (modechar, adding) {
                        ('m', true) => before.with_moderated(),
                        ('m', false) => before.without_moderated(),
                        (_, true) => before.with_no_external(),
                        (_, false) => before.without_no_external(),
                    };
                    channel.mode != before
                }
                _ => {
                    let Some(prefix) = find_prefix_mode(modechar) else {
                        return Err(ServerStateError::UnknownMode { client, modechar });
                    };
                    let Some(nickname) = params.next() else {
                        return Err(ServerStateError::NeedMoreParams {
                            client,
                            command: "MODE".into(),
                        });
                    };
                    self.ensure_chanop(user_id, &key)?;
                    param = Some(nickname);
                    self.update_member_mode(&client, &key, nickname, prefix, adding)?
                }
            };

            if changed {
                let modechar = format!("{sign}{modechar}");
                self.broadcast_to_channel(
                    &key,
                    &server_to_client::Message::Mode {
                        user_fullspec: &fullspec,
                        target: &channel_name,
                        modechar: &modechar,
                        param,
                    },
                    None,
                );
            }
        }
        Ok(())
    }

    fn update_ban(&mut self, key: &str, mask: &str, set_by: &str, adding: bool) -> bool {
        let Some(channel) = self.channels.get_mut(key) else {
            return false;
        };
        let exists = channel.bans.iter().any(|b| irc_eq(&b.mask, mask));
        match (adding, exists) {
            (true, false) => {
                channel.bans.push(Ban {
                    mask: mask.to_owned(),
                    set_by: set_by.to_owned(),
                    set_at: now(),
                });
                true
            }
            (false, true) => {
                channel.bans.retain(|b| !irc_eq(&b.mask, mask));
                true
            }
            _ => false,
        }
    }

    fn update_member_mode(
        &mut self,
        client: &str,
        key: &str,
        nickname: &str,
        prefix: PrefixMode,
        adding: bool,
    ) -> Result<bool, ServerStateError> {
        let Some(target) = self.find_registered_user(nickname).map(|u| u.user_id) else {
            return Err(ServerStateError::NoSuchNick {
                client: client.into(),
                target: nickname.into(),
            });
        };
        let Some(channel) = self.channels.get_mut(key) else {
            return Ok(false);
        };
        let Some(mode) = channel.users.get_mut(&target) else {
            return Err(ServerStateError::UserNotInChannel {
                client: client.into(),
                nickname: nickname.into(),
                channel: channel.name.clone(),
            });
        };
        let before = *mode;
        *mode = if adding {
            before.with(prefix)
        } else {
            before.without(prefix)
        };
        Ok(*mode != before)
    }

    fn user_mode(
        &mut self,
        user_id: UserID,
        target: &str,
        modestring: Option<&str>,
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get_mut(&user_id) else {
            return Ok(());
        };
        let client = user.client();
        if !irc_eq(target, &client) {
            return Err(ServerStateError::UsersDontMatch { client });
        }

        let Some(modestring) = modestring else {
            let modes = user.modes;
            self.send_to(
                user_id,
                &server_to_client::Message::UserMode {
                    client: &client,
                    modes,
                },
            );
            return Ok(());
        };

        let fullspec = user.fullspec();
        let mut adding = true;
        let mut changes = Vec::new();
        let mut unknown = false;
        for modechar in modestring.chars() {
            let before = user.modes;
            match modechar {
                '+' => adding = true,
                '-' => adding = false,
                // operator status is only granted by OPER
                'o' if adding => {}
                'o' | 'i' | 'w' if adding => user.modes = before.with(modechar),
                'o' | 'i' | 'w' => user.modes = before.without(modechar),
                _ => {
                    unknown = true;
                    break;
                }
            }
            if user.modes != before {
                changes.push(format!("{}{modechar}", if adding { '+' } else { '-' }));
            }
        }

        for modechar in changes {
            self.send_to(
                user_id,
                &server_to_client::Message::Mode {
                    user_fullspec: &fullspec,
                    target: &client,
                    modechar: &modechar,
                    param: None,
                },
            );
        }
        if unknown {
            return Err(ServerStateError::UmodeUnknownFlag { client });
        }
        Ok(())
    }
}

/// Messages
impl ServerState {
    pub(crate) fn user_sends_text(
        &self,
        registry: &ServerRegistry,
        user_id: UserID,
        targets: &str,
        text: &str,
        notice: bool,
    ) -> HandlerResult {
        let sv = self.0.read();
        if !sv.users.contains_key(&user_id) {
            return Err(HandlerError::UnknownSource);
        }
        for target in targets.split(',').filter(|t| !t.is_empty()) {
            let result = sv.send_text(registry, user_id, target, text, notice);
            // NOTICE never triggers automatic replies
            if let (Err(err), false) = (result, notice) {
                sv.send_error(user_id, err);
            }
        }
        Ok(HandlerOutcome::Handled)
    }

    pub(crate) fn user_ping(&self, user_id: UserID, token: &str) -> HandlerResult {
        let sv = self.0.read();
        if !sv.users.contains_key(&user_id) {
            return Err(HandlerError::UnknownSource);
        }
        sv.send_to(user_id, &server_to_client::Message::Pong { token });
        Ok(HandlerOutcome::Handled)
    }

    pub(crate) fn user_quit(&self, user_id: UserID, reason: Option<&str>) -> HandlerResult {
        let mut sv = self.0.write();
        if !sv.users.contains_key(&user_id) {
            return Err(HandlerError::UnknownSource);
        }
        let reason = reason.unwrap_or("Client Quit");
        sv.send_to(
            user_id,
            &server_to_client::Message::FatalError {
                reason: "Closing Link",
            },
        );
        sv.quit(user_id, reason);
        Ok(HandlerOutcome::Handled)
    }
}

impl ServerStateInner {
    fn send_text(
        &self,
        registry: &ServerRegistry,
        user_id: UserID,
        target: &str,
        text: &str,
        notice: bool,
    ) -> Result<(), ServerStateError> {
        let Some(user) = self.users.get(&user_id) else {
            return Ok(());
        };
        let client = user.client();
        if text.is_empty() {
            return Err(ServerStateError::NoTextToSend { client });
        }

        let cannot_send = |target: &str| ServerStateError::CannotSendToChan {
            client: user.client(),
            channel: target.to_owned(),
        };
        let denied = || {
            let mut event = Event::PreMessage(PreMessage {
                user: user_id,
                target,
                text,
            });
            registry.fire(&mut event) == Verdict::Deny
        };
        let fullspec = user.fullspec();

        if target.starts_with('#') {
            let key = irc_lowercase(target);
            let Some(channel) = self.channels.get(&key) else {
                return Err(ServerStateError::NoSuchNick {
                    client,
                    target: target.into(),
                });
            };
            channel.ensure_user_can_send_message(user)?;

            let voiced = channel
                .users
                .get(&user_id)
                .is_some_and(|m| m.is_at_least(PrefixMode::VOICE));
            if !voiced && self.is_banned(registry, user_id, &key) {
                return Err(cannot_send(&channel.name));
            }
            if denied() {
                return Err(cannot_send(&channel.name));
            }

            let message = if notice {
                server_to_client::Message::Notice {
                    from_user: &fullspec,
                    target: &channel.name,
                    content: text,
                }
            } else {
                server_to_client::Message::PrivMsg {
                    from_user: &fullspec,
                    target: &channel.name,
                    content: text,
                }
            };
            self.broadcast_to_channel(&key, &message, Some(user_id));
        } else {
            let Some(recipient) = self.find_registered_user(target) else {
                return Err(ServerStateError::NoSuchNick {
                    client,
                    target: target.into(),
                });
            };
            if denied() {
                return Err(cannot_send(target));
            }

            let recipient_nick = recipient.client();
            let message = if notice {
                server_to_client::Message::Notice {
                    from_user: &fullspec,
                    target: &recipient_nick,
                    content: text,
                }
            } else {
                server_to_client::Message::PrivMsg {
                    from_user: &fullspec,
                    target: &recipient_nick,
                    content: text,
                }
            };
            self.send_to(recipient.user_id, &message);
        }
        Ok(())
    }

    fn quit(&mut self, user_id: UserID, reason: &str) {
        let Some(user) = self.users.get(&user_id) else {
            return;
        };
        let fullspec = user.fullspec();
        let message = server_to_client::Message::Quit {
            user_fullspec: &fullspec,
            reason,
        };
        for peer in self.peers_of(user_id) {
            self.send_to(peer, &message);
        }

        let keys = user.channels.clone();
        for key in keys {
            self.leave_channel(user_id, &key);
        }
        self.users.remove(&user_id);
        log::info!("{fullspec} left: {reason}");
    }
}

/// Operators and modules
impl ServerState {
    pub(crate) fn user_oper(&self, user_id: UserID, name: &str, password: &str) -> HandlerResult {
        self.with_user(user_id, |sv| {
            let Some(user) = sv.users.get(&user_id) else {
                return Ok(());
            };
            let client = user.client();

            let Some(operator) = sv.config.operators.iter().find(|o| o.name == name) else {
                return Err(ServerStateError::NoOperHost { client });
            };
            if !bool::from(password.as_bytes().ct_eq(operator.password.as_bytes())) {
                return Err(ServerStateError::PasswdMismatch { client });
            }

            let fullspec = user.fullspec();
            if let Some(user) = sv.users.get_mut(&user_id) {
                user.modes = user.modes.with('o');
            }
            log::info!("{fullspec} is now an operator ({name})");
            sv.send_to(
                user_id,
                &server_to_client::Message::YoureOper { client: &client },
            );
            sv.send_to(
                user_id,
                &server_to_client::Message::Mode {
                    user_fullspec: &fullspec,
                    target: &client,
                    modechar: "+o",
                    param: None,
                },
            );
            Ok(())
        })
    }

    pub(crate) fn user_stats(
        &self,
        registry: &ServerRegistry,
        user_id: UserID,
        query: &str,
    ) -> HandlerResult {
        let stats = if query.starts_with('m') {
            registry.command_stats()
        } else {
            Vec::new()
        };
        self.with_user(user_id, |sv| {
            let client = sv.users.get(&user_id).map(User::client).unwrap_or_default();
            sv.send_to(
                user_id,
                &server_to_client::Message::StatsCommands {
                    client: &client,
                    stats: &stats,
                },
            );
            sv.send_to(
                user_id,
                &server_to_client::Message::EndOfStats {
                    client: &client,
                    query,
                },
            );
            Ok(())
        })
    }

    pub(crate) fn user_modules(&self, registry: &ServerRegistry, user_id: UserID) -> HandlerResult {
        let modules = registry.modules();
        self.with_user(user_id, |sv| {
            let client = sv.users.get(&user_id).map(User::client).unwrap_or_default();
            sv.send_to(
                user_id,
                &server_to_client::Message::Modules {
                    client: &client,
                    modules: &modules,
                },
            );
            Ok(())
        })
    }

    /// Reply to LOADMODULE once the registry is done with it.
    pub(crate) fn user_loaded_module(
        &self,
        user_id: UserID,
        module: &str,
        result: Result<(), RegistryError>,
    ) -> HandlerResult {
        self.with_user(user_id, |sv| {
            let client = sv.users.get(&user_id).map(User::client).unwrap_or_default();
            match result {
                Ok(()) => {
                    sv.send_to(
                        user_id,
                        &server_to_client::Message::ModuleLoaded {
                            client: &client,
                            module,
                        },
                    );
                    Ok(())
                }
                Err(err) => Err(ServerStateError::CantLoadModule {
                    client,
                    module: module.into(),
                    reason: err.to_string(),
                }),
            }
        })
    }

    /// Reply to UNLOADMODULE once the registry is done with it.
    pub(crate) fn user_unloaded_module(
        &self,
        user_id: UserID,
        module: &str,
        result: Result<(), RegistryError>,
    ) -> HandlerResult {
        self.with_user(user_id, |sv| {
            let client = sv.users.get(&user_id).map(User::client).unwrap_or_default();
            match result {
                Ok(()) => {
                    sv.send_to(
                        user_id,
                        &server_to_client::Message::ModuleUnloaded {
                            client: &client,
                            module,
                        },
                    );
                    Ok(())
                }
                Err(err) => Err(ServerStateError::CantUnloadModule {
                    client,
                    module: module.into(),
                    reason: err.to_string(),
                }),
            }
        })
    }
}

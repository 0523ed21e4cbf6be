use crate::{
    error::ServerStateError,
    mailbox::Mailbox,
    membership::PrefixMode,
    module::ModuleInfo,
    report::CommandStats,
    types::{Ban, ChannelMode, UserModes},
};

/// Maximum number of ISUPPORT tokens per 005 line.
const ISUPPORT_TOKENS_PER_LINE: usize = 13;

#[derive(Debug, Clone)]
pub(crate) struct NamesReply<'a> {
    pub(crate) channel: &'a str,
    pub(crate) members: &'a [(String, Option<PrefixMode>)],
}

#[derive(Debug, Clone)]
pub(crate) enum Message<'a> {
    Welcome {
        nickname: &'a str,
        user_fullspec: &'a str,
    },
    ISupport {
        client: &'a str,
        tokens: &'a [String],
    },
    #[allow(clippy::upper_case_acronyms)]
    MOTD {
        client: &'a str,
        motd: Option<&'a [String]>,
    },
    Join {
        channel: &'a str,
        user_fullspec: &'a str,
    },
    Part {
        user_fullspec: &'a str,
        channel: &'a str,
        reason: Option<&'a str>,
    },
    Names {
        client: &'a str,
        names: NamesReply<'a>,
    },
    Nick {
        previous_user_fullspec: &'a str,
        nickname: &'a str,
    },
    Pong {
        token: &'a str,
    },
    PrivMsg {
        from_user: &'a str,
        target: &'a str,
        content: &'a str,
    },
    Notice {
        from_user: &'a str,
        target: &'a str,
        content: &'a str,
    },
    Mode {
        user_fullspec: &'a str,
        target: &'a str,
        modechar: &'a str,
        param: Option<&'a str>,
    },
    /// reply to a MODE query on a channel
    ChannelMode {
        client: &'a str,
        channel: &'a str,
        mode: &'a ChannelMode,
    },
    /// reply to a MODE query on oneself
    UserMode {
        client: &'a str,
        modes: UserModes,
    },
    BanList {
        client: &'a str,
        channel: &'a str,
        bans: &'a [Ban],
    },
    YoureOper {
        client: &'a str,
    },
    StatsCommands {
        client: &'a str,
        stats: &'a [CommandStats],
    },
    EndOfStats {
        client: &'a str,
        query: &'a str,
    },
    Modules {
        client: &'a str,
        modules: &'a [ModuleInfo],
    },
    ModuleLoaded {
        client: &'a str,
        module: &'a str,
    },
    ModuleUnloaded {
        client: &'a str,
        module: &'a str,
    },
    Quit {
        user_fullspec: &'a str,
        reason: &'a str,
    },
    FatalError {
        reason: &'a str,
    },
    Err(ServerStateError),
}

#[derive(Debug, Clone)]
pub(crate) struct MessageContext {
    pub(crate) server_name: String,
}

impl Message<'_> {
    pub(crate) fn write_to(&self, mailbox: &Mailbox, context: &MessageContext) {
        let sv = &context.server_name;
        match self {
            Message::Welcome {
                nickname,
                user_fullspec,
            } => {
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 001 ",
                    nickname,
                    b" :Welcome to the Internet Relay Network ",
                    user_fullspec
                );
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 002 ",
                    nickname,
                    b" :Your host is ",
                    sv,
                    b", running modircd ",
                    env!("CARGO_PKG_VERSION")
                );
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 003 ",
                    nickname,
                    b" :This server was created with modules in mind"
                );
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 004 ",
                    nickname,
                    b" ",
                    sv,
                    b" modircd-",
                    env!("CARGO_PKG_VERSION"),
                    b" o bmnohv"
                );
            }
            Message::ISupport { client, tokens } => {
                for chunk in tokens.chunks(ISUPPORT_TOKENS_PER_LINE) {
                    let mut m = mailbox.new_message();
                    message_push!(m, b":", sv, b" 005 ", client);
                    for token in chunk {
                        message_push!(m, b" ", token);
                    }
                    message_push!(m, b" :are supported by this server");
                    m.validate();
                }
            }
            Message::MOTD { client, motd } => {
                if let Some(motd) = motd {
                    message!(
                        mailbox,
                        b":",
                        sv,
                        b" 375 ",
                        client,
                        b" :- ",
                        sv,
                        b" Message of the day - "
                    );
                    for line in motd.iter() {
                        message!(mailbox, b":", sv, b" 372 ", client, b" :", line);
                    }
                    message!(
                        mailbox,
                        b":",
                        sv,
                        b" 376 ",
                        client,
                        b" :End of /MOTD command."
                    );
                } else {
                    message!(
                        mailbox,
                        b":",
                        sv,
                        b" 422 ",
                        client,
                        b" :MOTD File is missing"
                    );
                }
            }
            Message::Join {
                channel,
                user_fullspec,
            } => {
                message!(mailbox, b":", user_fullspec, b" JOIN ", channel);
            }
            Message::Part {
                user_fullspec,
                channel,
                reason,
            } => {
                let mut m = mailbox.new_message();
                message_push!(m, b":", user_fullspec, b" PART ", channel);
                if let Some(reason) = reason {
                    message_push!(m, b" :", reason);
                }
                m.validate();
            }
            Message::Names { client, names } => {
                let mut m = mailbox.new_message();
                message_push!(m, b":", sv, b" 353 ", client, b" = ", names.channel, b" :");
                for (i, (nickname, tier)) in names.members.iter().enumerate() {
                    if i > 0 {
                        message_push!(m, b" ");
                    }
                    if let Some(tier) = tier {
                        let mut buf = [0; 4];
                        let prefix: &str = tier.prefix_char().encode_utf8(&mut buf);
                        message_push!(m, prefix);
                    }
                    message_push!(m, nickname);
                }
                m.validate();
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 366 ",
                    client,
                    b" ",
                    names.channel,
                    b" :End of /NAMES list."
                );
            }
            Message::Nick {
                previous_user_fullspec,
                nickname,
            } => {
                message!(mailbox, b":", previous_user_fullspec, b" NICK :", nickname);
            }
            Message::Pong { token } => {
                message!(mailbox, b":", sv, b" PONG ", sv, b" :", token);
            }
            Message::PrivMsg {
                from_user,
                target,
                content,
            } => {
                message!(
                    mailbox,
                    b":",
                    from_user,
                    b" PRIVMSG ",
                    target,
                    b" :",
                    content
                );
            }
            Message::Notice {
                from_user,
                target,
                content,
            } => {
                message!(
                    mailbox,
                    b":",
                    from_user,
                    b" NOTICE ",
                    target,
                    b" :",
                    content
                );
            }
            Message::Mode {
                user_fullspec,
                target,
                modechar,
                param,
            } => {
                let mut m = mailbox.new_message();
                message_push!(m, b":", user_fullspec, b" MODE ", target, b" ", modechar);
                if let Some(param) = param {
                    message_push!(m, b" ", param);
                }
                m.validate();
            }
            Message::ChannelMode {
                client,
                channel,
                mode,
            } => {
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 324 ",
                    client,
                    b" ",
                    channel,
                    b" ",
                    &mode.letters()
                );
            }
            Message::UserMode { client, modes } => {
                message!(mailbox, b":", sv, b" 221 ", client, b" ", &modes.to_string());
            }
            Message::BanList {
                client,
                channel,
                bans,
            } => {
                for ban in bans.iter() {
                    message!(
                        mailbox,
                        b":",
                        sv,
                        b" 367 ",
                        client,
                        b" ",
                        channel,
                        b" ",
                        &ban.mask,
                        b" ",
                        &ban.set_by,
                        b" ",
                        &ban.set_at.to_string()
                    );
                }
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 368 ",
                    client,
                    b" ",
                    channel,
                    b" :End of channel ban list"
                );
            }
            Message::YoureOper { client } => {
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 381 ",
                    client,
                    b" :You are now an IRC operator"
                );
            }
            Message::StatsCommands { client, stats } => {
                for stat in stats.iter() {
                    message!(
                        mailbox,
                        b":",
                        sv,
                        b" 212 ",
                        client,
                        b" ",
                        &stat.name,
                        b" ",
                        &stat.use_count.to_string(),
                        b" ",
                        &stat.total_bytes.to_string()
                    );
                }
            }
            Message::EndOfStats { client, query } => {
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 219 ",
                    client,
                    b" ",
                    query,
                    b" :End of /STATS report"
                );
            }
            Message::Modules { client, modules } => {
                for module in modules.iter() {
                    message!(
                        mailbox,
                        b":",
                        sv,
                        b" 702 ",
                        client,
                        b" ",
                        &module.name,
                        b" :",
                        &module.description
                    );
                }
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 703 ",
                    client,
                    b" :End of MODULES list"
                );
            }
            Message::ModuleLoaded { client, module } => {
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 975 ",
                    client,
                    b" ",
                    module,
                    b" :Module loaded"
                );
            }
            Message::ModuleUnloaded { client, module } => {
                message!(
                    mailbox,
                    b":",
                    sv,
                    b" 973 ",
                    client,
                    b" ",
                    module,
                    b" :Module unloaded"
                );
            }
            Message::Quit {
                user_fullspec,
                reason,
            } => {
                message!(mailbox, b":", user_fullspec, b" QUIT :", reason);
            }
            Message::FatalError { reason } => {
                message!(mailbox, b"ERROR :", reason);
            }
            Message::Err(err) => {
                message!(mailbox, b":", sv, b" ", &err.to_string());
            }
        }
    }
}

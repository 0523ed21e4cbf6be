use crate::module::ModuleId;

/// Why a command invocation was refused by the command table, or failed in its handler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown command {command}")]
    UnknownCommand { command: String },
    #[error("{command} needs {required} parameters, {given} given")]
    NeedMoreParams {
        command: String,
        required: usize,
        given: usize,
    },
    #[error("{command} requires user mode +{flag}")]
    NoPrivileges { command: String, flag: char },
    #[error("handler of {command} failed: {source}")]
    Handler {
        command: String,
        #[source]
        source: HandlerError,
    },
}

/// Structured failure reported by a command handler.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("the invoking user is not known to the server")]
    UnknownSource,
    #[error("{0}")]
    Failed(String),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("command {name} is already registered")]
    DuplicateCommand { name: String },
    #[error("module {name} is already loaded")]
    DuplicateModule { name: String },
    #[error("there is no module named {name}")]
    UnknownModule { name: String },
    #[error("module {id} is not loaded")]
    NotLoaded { id: ModuleId },
    #[error("{owner} is not an active owner")]
    InactiveOwner { owner: ModuleId },
    #[error("module {name} failed to load: {reason}")]
    LoadFailed { name: String, reason: String },
}

/// Failure raised by an event listener; the chain treats it as no opinion.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenerFault {
    #[error("{0}")]
    Failed(String),
    #[error("panicked: {0}")]
    Panicked(String),
}

/// Error replies sent to clients; the Display form is the line after the server prefix.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum ServerStateError {
    #[error("400 {client} {command} :{info}")]
    UnknownError {
        client: String,
        command: String,
        info: String,
    },
    #[error("401 {client} {target} :No such nick/channel")]
    NoSuchNick { client: String, target: String },
    #[error("403 {client} {channel} :No such channel")]
    NoSuchChannel { client: String, channel: String },
    #[error("404 {client} {channel} :Cannot send to channel")]
    CannotSendToChan { client: String, channel: String },
    #[error("405 {client} {channel} :You have joined too many channels")]
    TooManyChannels { client: String, channel: String },
    #[error("412 {client} :No text to send")]
    NoTextToSend { client: String },
    #[error("421 {client} {command} :Unknown command")]
    UnknownCommand { client: String, command: String },
    #[error("431 {client} :No nickname given")]
    NoNicknameGiven { client: String },
    #[error("432 {client} {nickname} :Erroneous nickname")]
    ErroneousNickname { client: String, nickname: String },
    #[error("433 {client} {nickname} :Nickname is already in use")]
    NicknameInUse { client: String, nickname: String },
    #[error("441 {client} {nickname} {channel} :They aren't on that channel")]
    UserNotInChannel {
        client: String,
        nickname: String,
        channel: String,
    },
    #[error("442 {client} {channel} :You're not on that channel")]
    NotOnChannel { client: String, channel: String },
    #[error("451 {client} :You have not registered")]
    NotRegistered { client: String },
    #[error("461 {client} {command} :Not enough parameters")]
    NeedMoreParams { client: String, command: String },
    #[error("462 {client} :You may not reregister")]
    AlreadyRegistered { client: String },
    #[error("464 {client} :Password incorrect")]
    PasswdMismatch { client: String },
    #[error("472 {client} {modechar} :is unknown mode char to me")]
    UnknownMode { client: String, modechar: char },
    #[error("474 {client} {channel} :Cannot join channel (+b)")]
    BannedFromChan { client: String, channel: String },
    #[error("476 {client} {channel} :Bad Channel Mask")]
    BadChanMask { client: String, channel: String },
    #[error("481 {client} :Permission Denied- You do not have the required operator privileges")]
    NoPrivileges { client: String },
    #[error("482 {client} {channel} :You're not channel operator")]
    ChanOpPrivsNeeded { client: String, channel: String },
    #[error("491 {client} :Invalid oper credentials")]
    NoOperHost { client: String },
    #[error("501 {client} :Unknown MODE flag")]
    UmodeUnknownFlag { client: String },
    #[error("502 {client} :Can't change mode for other users")]
    UsersDontMatch { client: String },
    #[error("972 {client} {module} :{reason}")]
    CantUnloadModule {
        client: String,
        module: String,
        reason: String,
    },
    #[error("974 {client} {module} :{reason}")]
    CantLoadModule {
        client: String,
        module: String,
        reason: String,
    },
}

impl ServerStateError {
    pub(crate) fn from_dispatch_error(err: &DispatchError, client: String) -> ServerStateError {
        match err {
            DispatchError::UnknownCommand { command } => ServerStateError::UnknownCommand {
                client,
                command: command.clone(),
            },
            DispatchError::NeedMoreParams { command, .. } => ServerStateError::NeedMoreParams {
                client,
                command: command.clone(),
            },
            DispatchError::NoPrivileges { .. } => ServerStateError::NoPrivileges { client },
            DispatchError::Handler { command, source } => ServerStateError::UnknownError {
                client,
                command: command.clone(),
                info: source.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DispatchError, HandlerError, ServerStateError};

    #[test]
    fn numerics() {
        let err = ServerStateError::BannedFromChan {
            client: "nick".into(),
            channel: "#chan".into(),
        };
        assert_eq!(err.to_string(), "474 nick #chan :Cannot join channel (+b)");
    }

    #[test]
    fn dispatch_errors_become_numerics() {
        let err = DispatchError::NeedMoreParams {
            command: "JOIN".into(),
            required: 1,
            given: 0,
        };
        let reply = ServerStateError::from_dispatch_error(&err, "nick".into());
        assert_eq!(reply.to_string(), "461 nick JOIN :Not enough parameters");

        let err = DispatchError::Handler {
            command: "JOIN".into(),
            source: HandlerError::Failed("boom".into()),
        };
        let reply = ServerStateError::from_dispatch_error(&err, "nick".into());
        assert_eq!(reply.to_string(), "400 nick JOIN :boom");
    }
}

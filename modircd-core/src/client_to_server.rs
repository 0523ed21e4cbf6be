use crate::command_table::Invocation;
use crate::error::{DispatchError, ServerStateError};
use crate::server_state::{ServerRegistry, ServerState};
use crate::types::UserID;

/// Commands accepted before registration completes.
static PRE_REGISTRATION: phf::Set<&'static str> = phf::phf_set! {
    "NICK", "USER", "PASS", "PING", "PONG", "QUIT",
};

/// Dispatch one parsed line from `user_id`. Errors are answered to the user with
/// the matching numeric, nothing is returned to the session.
pub fn handle_message(
    registry: &ServerRegistry,
    state: &ServerState,
    user_id: UserID,
    message: &modircd_parser::Message<'_>,
) {
    let Some(command) = message.normalized_command() else {
        log::debug!("{user_id}: command is not valid utf8");
        return;
    };

    let Some(params) = message.utf8_parameters() else {
        let client = state.client_name(user_id);
        state.send_error(
            user_id,
            ServerStateError::UnknownError {
                client,
                command,
                info: "Parameters are not valid UTF-8".into(),
            },
        );
        return;
    };

    if !PRE_REGISTRATION.contains(command.as_str()) && !state.is_registered(user_id) {
        let client = state.client_name(user_id);
        state.send_error(user_id, ServerStateError::NotRegistered { client });
        return;
    }

    let Some(flags) = state.user_flags(user_id) else {
        return;
    };
    let invocation = Invocation {
        source: user_id,
        command: &command,
        params: &params,
        flags,
    };

    match registry.dispatch(state, &invocation) {
        Ok(_) => {}
        Err(err) => {
            if let DispatchError::Handler { .. } = &err {
                log::warn!("{user_id}: {err}");
            } else {
                log::debug!("{user_id}: {err}");
            }
            let client = state.client_name(user_id);
            state.send_error(user_id, ServerStateError::from_dispatch_error(&err, client));
        }
    }
}

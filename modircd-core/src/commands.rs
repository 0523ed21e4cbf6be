//! The commands every server has, registered under `ModuleId::CORE`.

use crate::command_table::{CommandSpec, HandlerOutcome, HandlerResult, Invocation};
use crate::error::{RegistryError, ServerStateError};
use crate::module::ModuleId;
use crate::server_state::{ServerRegistry, ServerState};

type CoreHandler = fn(&ServerRegistry, &ServerState, &Invocation<'_>) -> HandlerResult;

struct CoreCommand {
    min_params: usize,
    required_flag: Option<char>,
    handler: CoreHandler,
}

fn param<'i>(invocation: &Invocation<'i>, index: usize) -> &'i str {
    invocation.params.get(index).copied().unwrap_or_default()
}

fn optional_param<'i>(invocation: &Invocation<'i>, index: usize) -> Option<&'i str> {
    invocation.params.get(index).copied()
}

fn handle_nick(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    let nickname = param(inv, 0);
    if nickname.is_empty() {
        let client = state.client_name(inv.source);
        state.send_error(inv.source, ServerStateError::NoNicknameGiven { client });
        return Ok(HandlerOutcome::Handled);
    }
    state.user_nick(registry, inv.source, nickname)
}

fn handle_user(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    let (username, realname) = (param(inv, 0), param(inv, 3));
    if username.is_empty() || realname.is_empty() {
        let client = state.client_name(inv.source);
        let command = inv.command.to_owned();
        state.send_error(inv.source, ServerStateError::NeedMoreParams { client, command });
        return Ok(HandlerOutcome::Handled);
    }
    state.user_user(registry, inv.source, username, realname)
}

fn handle_pass(_: &ServerRegistry, state: &ServerState, inv: &Invocation<'_>) -> HandlerResult {
    state.user_pass(inv.source, param(inv, 0))
}

fn handle_ping(_: &ServerRegistry, state: &ServerState, inv: &Invocation<'_>) -> HandlerResult {
    state.user_ping(inv.source, param(inv, 0))
}

fn handle_pong(_: &ServerRegistry, _: &ServerState, _: &Invocation<'_>) -> HandlerResult {
    Ok(HandlerOutcome::Handled)
}

fn handle_join(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    state.user_joins(registry, inv.source, param(inv, 0))
}

fn handle_part(_: &ServerRegistry, state: &ServerState, inv: &Invocation<'_>) -> HandlerResult {
    state.user_parts(inv.source, param(inv, 0), optional_param(inv, 1))
}

fn handle_privmsg(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    state.user_sends_text(registry, inv.source, param(inv, 0), param(inv, 1), false)
}

fn handle_notice(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    state.user_sends_text(registry, inv.source, param(inv, 0), param(inv, 1), true)
}

fn handle_mode(_: &ServerRegistry, state: &ServerState, inv: &Invocation<'_>) -> HandlerResult {
    let rest = inv.params.get(2..).unwrap_or_default();
    state.user_mode(inv.source, param(inv, 0), optional_param(inv, 1), rest)
}

fn handle_quit(_: &ServerRegistry, state: &ServerState, inv: &Invocation<'_>) -> HandlerResult {
    state.user_quit(inv.source, optional_param(inv, 0))
}

fn handle_oper(_: &ServerRegistry, state: &ServerState, inv: &Invocation<'_>) -> HandlerResult {
    state.user_oper(inv.source, param(inv, 0), param(inv, 1))
}

fn handle_stats(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    state.user_stats(registry, inv.source, param(inv, 0))
}

fn handle_modules(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    state.user_modules(registry, inv.source)
}

fn handle_loadmodule(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    let name = param(inv, 0);
    let result = registry.load_module_by_name(name).map(|id| {
        log::info!("{} loaded {name} as {id}", state.client_name(inv.source));
    });
    state.user_loaded_module(inv.source, name, result)
}

fn handle_unloadmodule(
    registry: &ServerRegistry,
    state: &ServerState,
    inv: &Invocation<'_>,
) -> HandlerResult {
    let name = param(inv, 0);
    let result = registry.unload_module_by_name(name).map(|()| {
        log::info!("{} unloaded {name}", state.client_name(inv.source));
    });
    state.user_unloaded_module(inv.source, name, result)
}

static CORE_COMMANDS: phf::Map<&'static str, CoreCommand> = phf::phf_map! {
    "NICK" => CoreCommand { min_params: 1, required_flag: None, handler: handle_nick },
    "USER" => CoreCommand { min_params: 4, required_flag: None, handler: handle_user },
    "PASS" => CoreCommand { min_params: 1, required_flag: None, handler: handle_pass },
    "PING" => CoreCommand { min_params: 1, required_flag: None, handler: handle_ping },
    "PONG" => CoreCommand { min_params: 0, required_flag: None, handler: handle_pong },
    "JOIN" => CoreCommand { min_params: 1, required_flag: None, handler: handle_join },
    "PART" => CoreCommand { min_params: 1, required_flag: None, handler: handle_part },
    "PRIVMSG" => CoreCommand { min_params: 2, required_flag: None, handler: handle_privmsg },
    "NOTICE" => CoreCommand { min_params: 2, required_flag: None, handler: handle_notice },
    "MODE" => CoreCommand { min_params: 1, required_flag: None, handler: handle_mode },
    "QUIT" => CoreCommand { min_params: 0, required_flag: None, handler: handle_quit },
    "OPER" => CoreCommand { min_params: 2, required_flag: None, handler: handle_oper },
    "STATS" => CoreCommand { min_params: 1, required_flag: None, handler: handle_stats },
    "MODULES" => CoreCommand { min_params: 0, required_flag: None, handler: handle_modules },
    "LOADMODULE" => CoreCommand { min_params: 1, required_flag: Some('o'), handler: handle_loadmodule },
    "UNLOADMODULE" => CoreCommand { min_params: 1, required_flag: Some('o'), handler: handle_unloadmodule },
};

/// Register the built-in commands. Fails if a module already took one of their names.
pub fn register_core_commands(registry: &ServerRegistry) -> Result<(), RegistryError> {
    for (name, command) in CORE_COMMANDS.entries() {
        let mut spec = CommandSpec::new(name, command.min_params);
        if let Some(flag) = command.required_flag {
            spec = spec.requires(flag);
        }
        registry.register_command(ModuleId::CORE, spec, command.handler)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{register_core_commands, CORE_COMMANDS};
    use crate::error::RegistryError;
    use crate::module::{ModuleCatalog, ModuleId};
    use crate::server_state::ServerRegistry;

    #[test]
    fn registered_once() {
        let registry = ServerRegistry::new(ModuleCatalog::default());
        register_core_commands(&registry).unwrap();
        assert!(registry.has_command("PRIVMSG"));
        assert!(registry.has_command("UNLOADMODULE"));
        assert_eq!(registry.owned_entries(ModuleId::CORE).0, 16);
        assert!(matches!(
            register_core_commands(&registry),
            Err(RegistryError::DuplicateCommand { .. })
        ));
    }

    #[test]
    fn lookup_is_by_exact_name() {
        assert!(CORE_COMMANDS.contains_key("JOIN"));
        assert!(!CORE_COMMANDS.contains_key("join"));
    }
}

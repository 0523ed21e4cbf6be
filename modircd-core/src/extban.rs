//! The `j` extended ban: `j:[<prefix>[:]]<channel glob>` matches users who are in
//! a channel matching the glob, holding at least `<prefix>` there when one is given.
//! `+b j:@#staff*` and `+b j:@:#staff*` both ban the operators of any `#staff*` channel.

use std::sync::Arc;

use crate::error::RegistryError;
use crate::event::{CheckBan, Event, EventKind, Priority, Verdict};
use crate::glob;
use crate::membership::{find_prefix, PrefixMode};
use crate::module::{Module, ModuleContext};

pub const CHANNEL_EXTBAN: char = 'j';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelMask<'m> {
    tier: Option<PrefixMode>,
    pattern: &'m str,
}

/// None when the mask is not a well-formed `j` extban.
fn parse_mask(mask: &str) -> Option<ChannelMask<'_>> {
    let rest = mask.strip_prefix(CHANNEL_EXTBAN)?.strip_prefix(':')?;

    let mut chars = rest.chars();
    let first = chars.next()?;
    let mask = if let Some(tier) = find_prefix(first) {
        let pattern = chars.as_str();
        ChannelMask {
            tier: Some(tier),
            pattern: pattern.strip_prefix(':').unwrap_or(pattern),
        }
    } else if chars.next() == Some(':') {
        // an unknown prefix makes the whole mask meaningless
        return None;
    } else {
        ChannelMask {
            tier: None,
            pattern: rest,
        }
    };

    (!mask.pattern.is_empty()).then_some(mask)
}

/// Deny if the user is in a channel matching the mask, with the required tier.
pub fn check_channel_ban(ban: &CheckBan<'_>) -> Verdict {
    let Some(mask) = parse_mask(ban.mask) else {
        return Verdict::Passthru;
    };

    let banned = ban.membership.channels_of(ban.user).any(|member| {
        glob::matches(member.channel, mask.pattern)
            && mask.tier.is_none_or(|tier| member.has_at_least(tier))
    });

    if banned {
        Verdict::Deny
    } else {
        Verdict::Passthru
    }
}

/// Module providing the `j` extended ban.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelExtban;

impl ChannelExtban {
    pub const NAME: &'static str = "channelban";

    pub fn instantiate<S>() -> Arc<dyn Module<S>> {
        Arc::new(ChannelExtban)
    }
}

impl<S> Module<S> for ChannelExtban {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "j: extban matching the channels a user is in"
    }

    fn load(&self, ctx: &mut ModuleContext<S>) -> Result<(), RegistryError> {
        ctx.subscribe(EventKind::CheckBan, Priority::DEFAULT, |event| {
            Ok(match event {
                Event::CheckBan(ban) => check_channel_ban(ban),
                _ => Verdict::Passthru,
            })
        });
        ctx.subscribe(EventKind::BuildISupport, Priority::DEFAULT, |event| {
            if let Event::BuildISupport(isupport) = event {
                isupport.add_extban(CHANNEL_EXTBAN);
            }
            Ok(Verdict::Passthru)
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::{check_channel_ban, parse_mask, ChannelExtban, ChannelMask};
    use crate::event::{CheckBan, Event, EventKind, ISupport, Verdict};
    use crate::membership::testing::FixedMembership;
    use crate::membership::PrefixMode;
    use crate::module::ModuleCatalog;
    use crate::registry::Registry;
    use crate::types::UserID;

    fn scenario(user: UserID) -> FixedMembership {
        FixedMembership::default()
            .with(user, "#general", Some(PrefixMode::OP))
            .with(user, "#random", None)
            .with(UserID::generate(), "#xyzzy", Some(PrefixMode::OP))
    }

    #[rstest]
    #[case("j:@:#gen*", Verdict::Deny)]
    #[case("j:@:#ran*", Verdict::Passthru)]
    #[case("j:@#gen*", Verdict::Deny)]
    #[case("j:@#ran*", Verdict::Passthru)]
    #[case("j:+#general", Verdict::Deny)]
    #[case("j:#xyz*", Verdict::Passthru)]
    #[case("j:#ran*", Verdict::Deny)]
    #[case("j:+:#general", Verdict::Deny)]
    #[case("j:%:#GENERAL", Verdict::Deny)]
    #[case("j:*", Verdict::Deny)]
    #[case("j:!:#gen*", Verdict::Passthru)]
    #[case("j:", Verdict::Passthru)]
    #[case("j:@:", Verdict::Passthru)]
    #[case("j:@", Verdict::Passthru)]
    fn channel_ban(#[case] mask: &str, #[case] expected: Verdict) {
        let user = UserID::generate();
        let membership = scenario(user);
        let ban = CheckBan {
            user,
            channel: "#elsewhere",
            mask,
            membership: &membership,
        };
        assert_eq!(check_channel_ban(&ban), expected);
    }

    #[rstest]
    #[case("nick!*@*")]
    #[case("J:#general")]
    #[case("a:#general")]
    #[case("j#general")]
    fn other_masks_do_not_look_at_membership(#[case] mask: &str) {
        let user = UserID::generate();
        let membership = scenario(user);
        let ban = CheckBan {
            user,
            channel: "#elsewhere",
            mask,
            membership: &membership,
        };
        assert_eq!(check_channel_ban(&ban), Verdict::Passthru);
        assert_eq!(membership.lookups.get(), 0);
    }

    #[test]
    fn parse() {
        assert_eq!(
            parse_mask("j:@:#a*"),
            Some(ChannelMask {
                tier: Some(PrefixMode::OP),
                pattern: "#a*"
            })
        );
        assert_eq!(
            parse_mask("j:#a:b"),
            Some(ChannelMask {
                tier: None,
                pattern: "#a:b"
            })
        );
        assert_eq!(
            parse_mask("j:@#a*"),
            Some(ChannelMask {
                tier: Some(PrefixMode::OP),
                pattern: "#a*"
            })
        );
        assert_eq!(parse_mask("j:x:#a"), None);
    }

    #[test]
    fn loaded_as_a_module() {
        let registry = Registry::<()>::new(
            ModuleCatalog::default().with(ChannelExtban::NAME, ChannelExtban::instantiate),
        );
        let id = registry.load_module_by_name(ChannelExtban::NAME).unwrap();
        assert_eq!(registry.subscriber_count(EventKind::CheckBan), 1);

        let user = UserID::generate();
        let membership = scenario(user);
        let mut event = Event::CheckBan(CheckBan {
            user,
            channel: "#elsewhere",
            mask: "j:@:#gen*",
            membership: &membership,
        });
        assert_eq!(registry.fire(&mut event), Verdict::Deny);

        let mut isupport = ISupport::default();
        registry.fire(&mut Event::BuildISupport(&mut isupport));
        assert_eq!(isupport.get("EXTBAN"), Some(Some(",j")));

        registry.unload_module(id).unwrap();
        assert_eq!(registry.fire(&mut event), Verdict::Passthru);
        assert_eq!(registry.subscriber_count(EventKind::BuildISupport), 0);

        let module = Arc::new(ChannelExtban);
        registry.load_module(module).unwrap();
        assert_eq!(registry.fire(&mut event), Verdict::Deny);
    }
}

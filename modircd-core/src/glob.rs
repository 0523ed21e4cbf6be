/// rfc1459 case mapping: `[]\^` are the upper case forms of `{}|~`.
pub(crate) fn irc_lower(c: u8) -> u8 {
    match c {
        b'A'..=b'Z' => c.to_ascii_lowercase(),
        b'[' => b'{',
        b']' => b'}',
        b'\\' => b'|',
        b'^' => b'~',
        _ => c,
    }
}

/// Compare two names (nicknames, channels) the way clients expect.
pub fn irc_eq(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a
            .bytes()
            .zip(b.bytes())
            .all(|(a, b)| irc_lower(a) == irc_lower(b))
}

/// Key under which a name is stored in case-insensitive maps.
pub fn irc_lowercase(name: &str) -> String {
    let bytes = name.bytes().map(irc_lower).collect::<Vec<_>>();
    // only ascii bytes are remapped, so the string stays valid utf8
    String::from_utf8(bytes).unwrap_or_else(|_| name.to_owned())
}

fn char_width(lead: u8) -> usize {
    match lead {
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => 1,
    }
}

/// Glob match of `candidate` against `pattern`, case-insensitive.
/// `*` matches any run of characters (including none), `?` exactly one character.
pub fn matches(candidate: &str, pattern: &str) -> bool {
    let text = candidate.as_bytes();
    let pattern = pattern.as_bytes();

    let mut p = 0;
    let mut t = 0;
    // position in the pattern after the last '*', and the text position it is matched against
    let mut backtrack: Option<(usize, usize)> = None;

    while let Some(&c) = text.get(t) {
        match pattern.get(p) {
            Some(b'*') => {
                p += 1;
                backtrack = Some((p, t));
            }
            Some(b'?') => {
                p += 1;
                t += char_width(c);
            }
            Some(&pc) if irc_lower(pc) == irc_lower(c) => {
                p += 1;
                t += 1;
            }
            _ => {
                // let the last '*' swallow one more character and retry
                let Some((star_p, star_t)) = backtrack else {
                    return false;
                };
                let star_t = star_t + text.get(star_t).copied().map_or(1, char_width);
                backtrack = Some((star_p, star_t));
                p = star_p;
                t = star_t;
            }
        }
    }

    pattern.get(p..).unwrap_or_default().iter().all(|&c| c == b'*')
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{irc_eq, irc_lowercase, matches};

    #[rstest]
    #[case("#general", "#gen*", true)]
    #[case("#random", "#gen*", false)]
    #[case("#General", "#GEN*", true)]
    #[case("#general", "*", true)]
    #[case("", "*", true)]
    #[case("", "", true)]
    #[case("a", "", false)]
    #[case("abc", "a?c", true)]
    #[case("ac", "a?c", false)]
    #[case("abcd", "a?c", false)]
    #[case("mississippi", "m*iss*ppi", true)]
    #[case("mississippi", "m*iss*ppx", false)]
    #[case("aXbXc", "*b*c", true)]
    #[case("abc", "*d", false)]
    #[case("#chan[1]", "#CHAN{1}", true)]
    #[case("#héllo", "#h?llo", true)]
    #[case("#héllo", "#h*o", true)]
    #[case("nick!user@host.example", "*!*@*.example", true)]
    fn glob(#[case] candidate: &str, #[case] pattern: &str, #[case] expected: bool) {
        assert_eq!(matches(candidate, pattern), expected);
    }

    #[test]
    fn case_mapping() {
        assert!(irc_eq("Nick[a]", "nick{A}"));
        assert!(irc_eq("x^", "X~"));
        assert!(!irc_eq("nick", "nick_"));
        assert_eq!(irc_lowercase("#Foo\\Bar"), "#foo|bar");
    }
}

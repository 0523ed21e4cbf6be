//! Parsing of client-to-server lines into a command token and its parameters.
//! Message tags and the source prefix are recognized and kept aside, they are never
//! interpreted by the server.

use smallvec::SmallVec;

mod parser;
mod stream;

pub use crate::parser::parse_message;
pub use crate::stream::{LendingIterator, StreamParser, MAX_LINE_LENGTH};

pub type Command = [u8];
pub type Parameters<'a> = SmallVec<[&'a [u8]; 15]>;

///
/// See: https://modern.ircdocs.horse/#client-to-server-protocol-structure
///
#[derive(Debug)]
pub struct Message<'m> {
    tags: Option<&'m [u8]>,
    source: Option<&'m [u8]>,
    command: &'m Command,
    parameters: Parameters<'m>,
}

impl<'m> Message<'m> {
    pub fn tags(&self) -> Option<&'m [u8]> {
        self.tags
    }

    pub fn source(&self) -> Option<&'m [u8]> {
        self.source
    }

    pub fn command(&self) -> &'m Command {
        self.command
    }

    pub fn parameters(&self) -> &Parameters<'m> {
        &self.parameters
    }

    pub fn first_parameter(&self) -> Option<&'m [u8]> {
        self.parameters.first().copied()
    }

    /// The command token in upper case, or None if it is not valid utf8.
    /// Commands are matched case-insensitively on the wire but dispatched by exact name.
    pub fn normalized_command(&self) -> Option<String> {
        let command = std::str::from_utf8(self.command).ok()?;
        Some(command.to_ascii_uppercase())
    }

    /// All the parameters decoded as utf8, or None if any of them is not.
    pub fn utf8_parameters(&self) -> Option<SmallVec<[&'m str; 15]>> {
        self.parameters
            .iter()
            .map(|p| std::str::from_utf8(p).ok())
            .collect()
    }
}

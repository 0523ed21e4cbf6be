use ::lending_iterator::prelude::*;
pub use lending_iterator::LendingIterator;

use crate::{parse_message, Message};

/// Lines longer than this (without their end-of-line) are discarded.
pub const MAX_LINE_LENGTH: usize = 8191;

/// Accumulates bytes read from a connection and cuts them into lines.
#[derive(Debug, Default)]
pub struct StreamParser {
    buffer: Vec<u8>,
    /// start of the bytes not yet consumed by a MessageIterator
    head: usize,
    /// set when an unterminated line grew beyond MAX_LINE_LENGTH
    overflowed: bool,
}

fn is_end_of_message(c: &u8) -> bool {
    *c == b'\r' || *c == b'\n'
}

impl StreamParser {
    pub fn feed_from_slice(&mut self, buf: &[u8]) {
        // forget about what was already handed out
        self.buffer.drain(..self.head);
        self.head = 0;

        self.buffer.extend_from_slice(buf);

        if self.buffer.len() > MAX_LINE_LENGTH && !self.buffer.iter().any(is_end_of_message) {
            self.buffer.clear();
            self.overflowed = true;
        }
    }

    pub fn consume_iter(&mut self) -> MessageIterator<'_> {
        MessageIterator {
            stream_parser: self,
        }
    }

    /// Returns the bounds of the next complete line and moves the head past it.
    fn consume_line(&mut self) -> Option<(usize, usize)> {
        let pending = self.buffer.get(self.head..)?;

        // eat the EOL characters left by the previous line
        let skipped = pending.iter().take_while(|c| is_end_of_message(c)).count();
        let start = self.head + skipped;
        let pending = self.buffer.get(start..)?;

        // the line is not finished yet
        let length = pending.iter().position(is_end_of_message)?;

        self.head = start + length;
        Some((start, start + length))
    }
}

pub struct MessageIterator<'a> {
    stream_parser: &'a mut StreamParser,
}

#[gat]
impl LendingIterator for MessageIterator<'_> {
    type Item<'next>
    where
        Self: 'next,
    = Result<Message<'next>, anyhow::Error>;

    fn next(&mut self) -> Option<Result<Message<'_>, anyhow::Error>> {
        if std::mem::take(&mut self.stream_parser.overflowed) {
            return Some(Err(anyhow::anyhow!(
                "line longer than {MAX_LINE_LENGTH} bytes"
            )));
        }

        let (start, end) = self.stream_parser.consume_line()?;
        let line = self.stream_parser.buffer.get(start..end)?;
        let result = parse_message(line)
            .map(|(_, msg)| msg)
            .map_err(|err| anyhow::anyhow!(err.to_string()));
        Some(result)
    }
}

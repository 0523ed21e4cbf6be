use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver, UnboundedSender};

const IRC_MESSAGE_MAX_SIZE: usize = 512;

pub type SerializedMessage = Vec<u8>;

/// Sending half of a user's outgoing queue, owned by the user's state entry.
/// Removing the user drops it, which ends the session once the sink is drained.
#[derive(Debug)]
pub(crate) struct Mailbox {
    sender: UnboundedSender<SerializedMessage>,
}

impl Mailbox {
    pub(crate) fn new() -> (Self, MailboxSink) {
        let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
        (Self { sender }, MailboxSink { receiver })
    }

    /// Only one line can be under construction at a time, so lines leave in order.
    pub(crate) fn new_message(&self) -> OnGoingMessage<'_> {
        OnGoingMessage {
            buf: Vec::with_capacity(IRC_MESSAGE_MAX_SIZE),
            cut: false,
            mailbox: self,
        }
    }
}

#[derive(Debug)]
pub struct MailboxSink {
    receiver: UnboundedReceiver<SerializedMessage>,
}

impl MailboxSink {
    pub async fn recv(&mut self) -> Option<SerializedMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Result<SerializedMessage, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Refuse new lines; the ones already queued can still be received.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

/// Owner MUST call validate() after writing in order to send the line.
#[must_use]
pub(crate) struct OnGoingMessage<'m> {
    buf: Vec<u8>,
    /// Set once a write did not fit; the rest of the line is dropped.
    cut: bool,
    mailbox: &'m Mailbox,
}

impl OnGoingMessage<'_> {
    #[inline]
    pub(crate) fn write<T>(mut self, bytes: &T) -> Self
    where
        T: AsRef<[u8]> + ?Sized,
    {
        if self.cut {
            return self;
        }
        let room = (IRC_MESSAGE_MAX_SIZE - 2).saturating_sub(self.buf.len());
        let bytes = bytes.as_ref();
        let take = if bytes.len() <= room {
            bytes.len()
        } else {
            self.cut = true;
            // never split a UTF-8 sequence
            (0..=room)
                .rev()
                .find(|&i| bytes.get(i).is_some_and(|&b| b & 0xC0 != 0x80))
                .unwrap_or(0)
        };
        self.buf
            .extend_from_slice(bytes.get(..take).unwrap_or_default());
        self
    }

    pub(crate) fn validate(mut self) {
        self.buf.extend_from_slice(b"\r\n");
        // the receiver is gone when the session already ended; nothing to deliver to
        let _ = self.mailbox.sender.send(self.buf);
    }
}

macro_rules! message {
    ($s:expr, $($args:expr),*) => {{
        let mut m = $s.new_message();
        $(
            m = m.write($args);
        )*
        m.validate();
    }}
}

macro_rules! message_push {
    ($m:ident, $($args:expr),*) => {{
        $(
            $m = $m.write($args);
        )*
    }}
}

#[cfg(test)]
mod tests {
    use super::{Mailbox, IRC_MESSAGE_MAX_SIZE};

    #[test]
    fn test_empty() {
        let (_mailbox, mut sink) = Mailbox::new();
        sink.try_recv().unwrap_err();
    }

    #[test]
    fn test_2message() {
        let (mailbox, mut sink) = Mailbox::new();

        message!(mailbox, b"ta", "2");
        let mut m = mailbox.new_message();
        message_push!(m, "to", b"to");
        m.validate();

        let msg = sink.try_recv().unwrap();
        assert_eq!(String::from_utf8(msg).unwrap(), "ta2\r\n");

        let msg = sink.try_recv().unwrap();
        assert_eq!(String::from_utf8(msg).unwrap(), "toto\r\n");

        sink.try_recv().unwrap_err();
    }

    #[test]
    fn test_long_message_is_cut() {
        let (mailbox, mut sink) = Mailbox::new();
        let long = "x".repeat(600);
        message!(mailbox, "PRIVMSG #a :", &long, "tail");

        let msg = sink.try_recv().unwrap();
        assert_eq!(msg.len(), IRC_MESSAGE_MAX_SIZE);
        assert!(msg.ends_with(b"x\r\n"));
    }

    #[test]
    fn test_cut_keeps_characters_whole() {
        let (mailbox, mut sink) = Mailbox::new();
        let filler = "x".repeat(IRC_MESSAGE_MAX_SIZE - 2 - 13);
        message!(mailbox, "PRIVMSG #a :", &filler, "é", "tail");

        let msg = sink.try_recv().unwrap();
        assert_eq!(msg.len(), IRC_MESSAGE_MAX_SIZE - 1);
        let line = String::from_utf8(msg).unwrap();
        assert!(line.ends_with("x\r\n"));
    }

    #[test]
    fn test_closed_when_dropped() {
        let (mailbox, mut sink) = Mailbox::new();
        message!(mailbox, "last");
        drop(mailbox);
        assert!(sink.try_recv().is_ok());
        assert!(matches!(
            sink.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }
}

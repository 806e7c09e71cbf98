use std::io::{self, Read};
use std::thread;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tether_session::SessionHandle;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Ctrl-]
pub const DETACH_KEY: u8 = 0x1d;

pub struct RawModeGuard(bool);

impl RawModeGuard {
    pub fn new(enable: bool) -> Self {
        if !enable {
            return Self(false);
        }
        match enable_raw_mode() {
            Ok(()) => Self(true),
            Err(err) => {
                warn!(target: "tether::app", error = %err, "failed to enable raw mode");
                Self(false)
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.0 {
            let _ = disable_raw_mode();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEnd {
    Detach,
    Eof,
}

/// Reassembles UTF-8 text from reads that may split a character.
#[derive(Debug, Default)]
pub struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    // valid_up_to is always on a char boundary
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // incomplete sequence at the end; keep it for the next read
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }
}

/// Splits a read at the detach key.
pub fn split_detach(bytes: &[u8]) -> (&[u8], bool) {
    match bytes.iter().position(|byte| *byte == DETACH_KEY) {
        Some(at) => (&bytes[..at], true),
        None => (bytes, false),
    }
}

/// Forwards stdin to the session from a blocking thread until EOF or the
/// detach key.
pub fn spawn_stdin_pump(session: SessionHandle) -> io::Result<oneshot::Receiver<InputEnd>> {
    let (done_tx, done_rx) = oneshot::channel();
    thread::Builder::new()
        .name("tether-stdin".into())
        .spawn(move || {
            let end = pump(io::stdin().lock(), &session);
            let _ = done_tx.send(end);
        })?;
    Ok(done_rx)
}

fn pump<R: Read>(mut reader: R, session: &SessionHandle) -> InputEnd {
    let mut carry = Utf8Carry::default();
    let mut buf = [0u8; 4096];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => return InputEnd::Eof,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(target: "tether::app", error = %err, "stdin read failed");
                return InputEnd::Eof;
            }
        };
        let (payload, detach) = split_detach(&buf[..read]);
        let text = carry.push(payload);
        if !text.is_empty() {
            session.write(text);
        }
        if detach {
            debug!(target: "tether::app", "detach key pressed");
            return InputEnd::Detach;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carries_split_characters() {
        let bytes = "héllo".as_bytes();
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(&bytes[..2]), "h");
        assert_eq!(carry.push(&bytes[2..]), "éllo");
        assert_eq!(carry.push(b""), "");
    }

    #[test]
    fn replaces_invalid_bytes() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.push(b"a\xffb"), "a\u{fffd}b");
    }

    #[test]
    fn detach_key_cuts_the_read() {
        assert_eq!(split_detach(b"ls\r\x1dmore"), (&b"ls\r"[..], true));
        assert_eq!(split_detach(b"plain"), (&b"plain"[..], false));
        assert_eq!(split_detach(b"\x1d"), (&b""[..], true));
    }
}

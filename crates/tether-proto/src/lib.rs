//! Wire format for the pty socket.
//!
//! Every frame is a text message: one ASCII prefix character followed by an
//! optional payload. The client and the host use disjoint prefix sets except
//! for `a`, which is the auth request going up and the auth ack coming down.

use std::fmt;

use thiserror::Error;

const PREFIX_AUTH: char = 'a';
const PREFIX_RESUME: char = 'r';
const PREFIX_PAUSE: char = 'p';
const PREFIX_WRITE: char = 'w';
const PREFIX_SIZE: char = 's';
const PREFIX_CLOSE: char = 'c';
const PREFIX_DATA: char = 'd';
const PREFIX_EXIT: char = 'e';
const PREFIX_KEEPALIVE: char = 'k';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame prefix {0:?}")]
    UnknownPrefix(char),
    #[error("malformed size payload {0:?}")]
    MalformedSize(String),
}

/// Frames sent by the terminal front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    Auth(String),
    Resume,
    Pause,
    Write(String),
    Resize { rows: u16, cols: u16 },
    Close,
}

/// Frames sent by the pty host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    AuthAccepted,
    Data(String),
    Exit,
    Keepalive,
}

fn split_prefix(text: &str) -> Result<(char, &str), ProtocolError> {
    let mut chars = text.chars();
    let prefix = chars.next().ok_or(ProtocolError::Empty)?;
    Ok((prefix, chars.as_str()))
}

fn with_prefix(prefix: char, payload: &str) -> String {
    let mut out = String::with_capacity(1 + payload.len());
    out.push(prefix);
    out.push_str(payload);
    out
}

impl ClientFrame {
    pub fn prefix(&self) -> char {
        match self {
            ClientFrame::Auth(_) => PREFIX_AUTH,
            ClientFrame::Resume => PREFIX_RESUME,
            ClientFrame::Pause => PREFIX_PAUSE,
            ClientFrame::Write(_) => PREFIX_WRITE,
            ClientFrame::Resize { .. } => PREFIX_SIZE,
            ClientFrame::Close => PREFIX_CLOSE,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ClientFrame::Auth(token) => with_prefix(PREFIX_AUTH, token),
            ClientFrame::Write(data) => with_prefix(PREFIX_WRITE, data),
            ClientFrame::Resize { rows, cols } => format!("{PREFIX_SIZE}{rows}x{cols}"),
            other => other.prefix().to_string(),
        }
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (prefix, payload) = split_prefix(text)?;
        match prefix {
            PREFIX_AUTH => Ok(ClientFrame::Auth(payload.to_string())),
            PREFIX_RESUME => Ok(ClientFrame::Resume),
            PREFIX_PAUSE => Ok(ClientFrame::Pause),
            PREFIX_WRITE => Ok(ClientFrame::Write(payload.to_string())),
            PREFIX_SIZE => parse_size(payload),
            PREFIX_CLOSE => Ok(ClientFrame::Close),
            other => Err(ProtocolError::UnknownPrefix(other)),
        }
    }
}

fn parse_size(payload: &str) -> Result<ClientFrame, ProtocolError> {
    let malformed = || ProtocolError::MalformedSize(payload.to_string());
    let (rows, cols) = payload.split_once('x').ok_or_else(malformed)?;
    let rows = rows.parse::<u16>().map_err(|_| malformed())?;
    let cols = cols.parse::<u16>().map_err(|_| malformed())?;
    Ok(ClientFrame::Resize { rows, cols })
}

impl ServerFrame {
    pub fn prefix(&self) -> char {
        match self {
            ServerFrame::AuthAccepted => PREFIX_AUTH,
            ServerFrame::Data(_) => PREFIX_DATA,
            ServerFrame::Exit => PREFIX_EXIT,
            ServerFrame::Keepalive => PREFIX_KEEPALIVE,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            ServerFrame::Data(chunk) => with_prefix(PREFIX_DATA, chunk),
            other => other.prefix().to_string(),
        }
    }

    /// Payloads on `a`, `e` and `k` carry no meaning and are ignored.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let (prefix, payload) = split_prefix(text)?;
        match prefix {
            PREFIX_AUTH => Ok(ServerFrame::AuthAccepted),
            PREFIX_DATA => Ok(ServerFrame::Data(payload.to_string())),
            PREFIX_EXIT => Ok(ServerFrame::Exit),
            PREFIX_KEEPALIVE => Ok(ServerFrame::Keepalive),
            other => Err(ProtocolError::UnknownPrefix(other)),
        }
    }
}

impl fmt::Display for ClientFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientFrame::Auth(_) => f.write_str("auth"),
            ClientFrame::Resume => f.write_str("resume"),
            ClientFrame::Pause => f.write_str("pause"),
            ClientFrame::Write(data) => write!(f, "write({} bytes)", data.len()),
            ClientFrame::Resize { rows, cols } => write!(f, "resize({rows}x{cols})"),
            ClientFrame::Close => f.write_str("close"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_single_char_prefixes() {
        assert_eq!(ClientFrame::Auth("s3cret".into()).encode(), "as3cret");
        assert_eq!(ClientFrame::Resume.encode(), "r");
        assert_eq!(ClientFrame::Pause.encode(), "p");
        assert_eq!(ClientFrame::Write("ls -la\r".into()).encode(), "wls -la\r");
        assert_eq!(ClientFrame::Resize { rows: 24, cols: 80 }.encode(), "s24x80");
        assert_eq!(ClientFrame::Close.encode(), "c");
    }

    #[test]
    fn decodes_host_frames() {
        assert_eq!(ServerFrame::decode("a"), Ok(ServerFrame::AuthAccepted));
        assert_eq!(
            ServerFrame::decode("d\x1b[31mred\x1b[0m"),
            Ok(ServerFrame::Data("\x1b[31mred\x1b[0m".into()))
        );
        assert_eq!(ServerFrame::decode("d"), Ok(ServerFrame::Data(String::new())));
        assert_eq!(ServerFrame::decode("e"), Ok(ServerFrame::Exit));
        assert_eq!(ServerFrame::decode("k"), Ok(ServerFrame::Keepalive));
    }

    #[test]
    fn host_control_frames_ignore_trailing_payload() {
        assert_eq!(ServerFrame::decode("kping"), Ok(ServerFrame::Keepalive));
        assert_eq!(ServerFrame::decode("aok"), Ok(ServerFrame::AuthAccepted));
    }

    #[test]
    fn rejects_unknown_and_empty_frames() {
        assert_eq!(ServerFrame::decode(""), Err(ProtocolError::Empty));
        assert_eq!(
            ServerFrame::decode("zzz"),
            Err(ProtocolError::UnknownPrefix('z'))
        );
        assert_eq!(
            ServerFrame::decode("ébc"),
            Err(ProtocolError::UnknownPrefix('é'))
        );
        // client-only prefixes are not valid host frames
        assert_eq!(ServerFrame::decode("w"), Err(ProtocolError::UnknownPrefix('w')));
    }

    #[test]
    fn decodes_client_resize() {
        assert_eq!(
            ClientFrame::decode("s50x132"),
            Ok(ClientFrame::Resize { rows: 50, cols: 132 })
        );
        for bad in ["s", "s50", "s50x", "sx80", "s-1x80", "s70000x80"] {
            assert!(
                matches!(ClientFrame::decode(bad), Err(ProtocolError::MalformedSize(_))),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn write_payload_survives_multibyte_text() {
        let frame = ClientFrame::Write("héllo → wörld".into());
        assert_eq!(ClientFrame::decode(&frame.encode()), Ok(frame));
    }
}

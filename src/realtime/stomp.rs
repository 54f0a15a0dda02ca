//! STOMP 1.2 frame codec for WebSocket text messages

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::StompError;

/// STOMP frame commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED frames carry headers verbatim
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Command::Connect),
            "STOMP" => Ok(Command::Stomp),
            "CONNECTED" => Ok(Command::Connected),
            "SEND" => Ok(Command::Send),
            "SUBSCRIBE" => Ok(Command::Subscribe),
            "UNSUBSCRIBE" => Ok(Command::Unsubscribe),
            "ACK" => Ok(Command::Ack),
            "NACK" => Ok(Command::Nack),
            "DISCONNECT" => Ok(Command::Disconnect),
            "MESSAGE" => Ok(Command::Message),
            "RECEIPT" => Ok(Command::Receipt),
            "ERROR" => Ok(Command::Error),
            other => Err(StompError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heart-beat intervals in milliseconds (0 = disabled)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    /// Interval at which this side sends heart-beats
    pub outgoing_ms: u64,
    /// Interval at which this side expects heart-beats
    pub incoming_ms: u64,
}

impl Heartbeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    pub fn header_value(&self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (outgoing, incoming) = value.split_once(',')?;
        Some(Self {
            outgoing_ms: outgoing.trim().parse().ok()?,
            incoming_ms: incoming.trim().parse().ok()?,
        })
    }

    /// Negotiate the effective client intervals from the client's request and
    /// the server's CONNECTED heart-beat header.
    pub fn negotiate(client: Heartbeat, server: Heartbeat) -> Heartbeat {
        let outgoing_ms = if client.outgoing_ms == 0 || server.incoming_ms == 0 {
            0
        } else {
            client.outgoing_ms.max(server.incoming_ms)
        };
        let incoming_ms = if client.incoming_ms == 0 || server.outgoing_ms == 0 {
            0
        } else {
            client.incoming_ms.max(server.outgoing_ms)
        };
        Heartbeat {
            outgoing_ms,
            incoming_ms,
        }
    }

    pub fn outgoing(&self) -> Option<Duration> {
        (self.outgoing_ms > 0).then(|| Duration::from_millis(self.outgoing_ms))
    }

    pub fn incoming(&self) -> Option<Duration> {
        (self.incoming_ms > 0).then(|| Duration::from_millis(self.incoming_ms))
    }
}

/// A single STOMP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header; repeated headers keep the first occurrence
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn connect(host: &str, token: &str, heartbeat: Heartbeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2,1.1")
            .header("host", host)
            .header("heart-beat", heartbeat.header_value())
            .header("Authorization", format!("Bearer {}", token))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn send_json(destination: &str, body: String) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(body)
    }

    pub fn disconnect(receipt: &str) -> Self {
        Frame::new(Command::Disconnect).header("receipt", receipt)
    }

    /// Serialize to wire format, including the trailing NUL
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');

        let escape = self.command.escapes_headers();
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }

        if !self.body.is_empty() && self.get_header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }

        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

fn escape_header(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(value: &str) -> Result<String, StompError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            Some(other) => {
                return Err(StompError::Malformed(format!(
                    "invalid header escape \\{}",
                    other
                )))
            }
            None => return Err(StompError::Malformed("dangling header escape".to_string())),
        }
    }
    Ok(out)
}

/// Largest frame (headers plus body) the decoder will buffer
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Incremental decoder; buffers partial frames across WebSocket messages
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: String,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buffer: String::new(),
            max_frame_size,
        }
    }

    /// Append input and return every frame completed by it.
    ///
    /// Bare EOLs between frames are heart-beats and are skipped.
    pub fn feed(&mut self, chunk: &str) -> Result<Vec<Frame>, StompError> {
        self.buffer.push_str(chunk);
        let mut frames = Vec::new();

        loop {
            let skipped = self.buffer.len() - self.buffer.trim_start_matches(['\r', '\n']).len();
            self.buffer.drain(..skipped);

            if self.buffer.is_empty() {
                break;
            }

            match self.try_decode()? {
                Some((frame, consumed)) => {
                    self.buffer.drain(..consumed);
                    frames.push(frame);
                }
                None => break,
            }
        }

        if self.buffer.len() > self.max_frame_size {
            return Err(StompError::Malformed(format!(
                "incomplete frame exceeds {} bytes",
                self.max_frame_size
            )));
        }

        Ok(frames)
    }

    fn try_decode(&self) -> Result<Option<(Frame, usize)>, StompError> {
        let Some((head_len, separator_len)) = find_head_end(&self.buffer) else {
            return Ok(None);
        };

        let mut lines = self.buffer[..head_len]
            .split('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line));

        let command: Command = lines
            .next()
            .ok_or_else(|| StompError::Malformed("missing command".to_string()))?
            .parse()?;

        let mut headers = Vec::new();
        for line in lines {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| StompError::Malformed(format!("invalid header line: {}", line)))?;
            if command.escapes_headers() {
                headers.push((unescape_header(name)?, unescape_header(value)?));
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        let body_start = head_len + separator_len;
        let content_length = headers
            .iter()
            .find(|(name, _)| name == "content-length")
            .map(|(_, value)| {
                value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| StompError::Malformed(format!("invalid content-length: {}", value)))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                if len > self.max_frame_size {
                    return Err(StompError::Malformed(format!(
                        "content-length {} exceeds {} bytes",
                        len, self.max_frame_size
                    )));
                }
                let end = body_start
                    .checked_add(len)
                    .ok_or_else(|| StompError::Malformed("content-length overflow".to_string()))?;
                if self.buffer.len() <= end {
                    return Ok(None);
                }
                if self.buffer.as_bytes()[end] != 0 {
                    return Err(StompError::Malformed(
                        "frame body not terminated by NUL".to_string(),
                    ));
                }
                end
            }
            None => match self.buffer[body_start..].find('\0') {
                Some(offset) => body_start + offset,
                None => return Ok(None),
            },
        };

        let body = self
            .buffer
            .get(body_start..body_end)
            .ok_or_else(|| StompError::Malformed("body is not valid UTF-8".to_string()))?
            .to_string();

        Ok(Some((
            Frame {
                command,
                headers,
                body,
            },
            body_end + 1,
        )))
    }
}

/// Locate the blank line ending the header block: (head length, separator length)
fn find_head_end(buffer: &str) -> Option<(usize, usize)> {
    let lf = buffer.find("\n\n").map(|idx| (idx, 2));
    let crlf = buffer.find("\r\n\r\n").map(|idx| (idx, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

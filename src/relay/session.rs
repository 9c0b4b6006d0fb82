use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use super::types::SmtpReply;

const MAX_REPLY_LINE: usize = 4096;
const MAX_REPLY_LINES: usize = 64;

/// Line-oriented SMTP transport driven by the relay state machine.
///
/// `read_reply` must return within `timeout` (an `io::ErrorKind::TimedOut`
/// error once it has elapsed), whatever the peer does.
pub trait SmtpTransport {
    fn send_line(&mut self, line: &str) -> io::Result<()>;
    fn read_reply(&mut self, timeout: Duration) -> io::Result<SmtpReply>;
}

/// Opens transports. Shared by every scan task, hence `Send + Sync`.
pub trait Connect: Send + Sync {
    type Transport: SmtpTransport;

    fn connect(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> io::Result<Self::Transport>;
}

/// Plaintext TCP connector.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connect for TcpConnector {
    type Transport = TcpTransport;

    fn connect(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
        io_timeout: Duration,
    ) -> io::Result<TcpTransport> {
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        stream.set_write_timeout(Some(io_timeout))?;
        stream.set_nodelay(true)?;
        Ok(TcpTransport {
            stream,
            buffer: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl TcpTransport {
    fn read_line(&mut self, deadline: Instant) -> io::Result<String> {
        loop {
            if let Some(line) = take_line(&mut self.buffer) {
                return Ok(line);
            }
            if self.buffer.len() > MAX_REPLY_LINE {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "SMTP reply line too long",
                ));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "timed out waiting for SMTP reply",
                ));
            }
            self.stream.set_read_timeout(Some(remaining))?;

            let mut buf = [0u8; 512];
            let read = match self.stream.read(&mut buf) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "timed out waiting for SMTP reply",
                    ));
                }
                Err(err) => return Err(err),
            };
            if read == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading reply",
                ));
            }
            self.buffer.extend_from_slice(&buf[..read]);
        }
    }
}

/// Removes the first complete line from `buffer`, without its terminator.
/// Banners and replies are free text; bytes that are not UTF-8 (Latin-1
/// greetings, for one) become U+FFFD instead of failing the read.
fn take_line(buffer: &mut Vec<u8>) -> Option<String> {
    let pos = buffer.iter().position(|byte| *byte == b'\n')?;
    let mut line = buffer.drain(..=pos).collect::<Vec<_>>();
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Some(String::from_utf8_lossy(&line).into_owned())
}

impl SmtpTransport for TcpTransport {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        let mut data = line.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        self.stream.write_all(&data)?;
        self.stream.flush()
    }

    fn read_reply(&mut self, timeout: Duration) -> io::Result<SmtpReply> {
        let deadline = Instant::now() + timeout;
        let mut parser = ReplyParser::default();
        loop {
            let line = self.read_line(deadline)?;
            if parser.push(&line)? {
                return parser.finish();
            }
        }
    }
}

/// Accumulates the lines of a (possibly multi-line) reply.
#[derive(Debug, Default)]
pub(crate) struct ReplyParser {
    code: Option<u16>,
    lines: Vec<String>,
}

impl ReplyParser {
    /// Feeds one line without its terminator. Returns `true` once the final
    /// line (no `-` after the code) has been seen.
    pub(crate) fn push(&mut self, raw: &str) -> io::Result<bool> {
        if raw.len() < 3 || !raw.is_char_boundary(3) {
            return Err(invalid_data(format!("invalid SMTP reply: '{raw}'")));
        }
        let code_part = &raw[..3];
        let parsed_code = code_part
            .parse::<u16>()
            .map_err(|_| invalid_data(format!("invalid SMTP status code: '{code_part}'")))?;
        if let Some(existing) = self.code {
            if existing != parsed_code {
                return Err(invalid_data(format!(
                    "inconsistent SMTP reply codes: {existing} vs {parsed_code}"
                )));
            }
        } else {
            self.code = Some(parsed_code);
        }
        if self.lines.len() >= MAX_REPLY_LINES {
            return Err(invalid_data("SMTP reply has too many lines".to_string()));
        }
        let continuation = raw.as_bytes().get(3).copied() == Some(b'-');
        let text = raw.get(4..).unwrap_or("").to_string();
        self.lines.push(text);
        Ok(!continuation)
    }

    pub(crate) fn finish(self) -> io::Result<SmtpReply> {
        let code = self
            .code
            .ok_or_else(|| invalid_data("SMTP reply missing status code".to_string()))?;
        Ok(SmtpReply {
            code,
            message: self.lines.join("\n"),
        })
    }
}

impl SmtpReply {
    /// Parses a complete reply block such as `"250-first\r\n250 last\r\n"`.
    pub fn parse(text: &str) -> io::Result<SmtpReply> {
        let mut parser = ReplyParser::default();
        for line in text.lines() {
            if parser.push(line)? {
                return parser.finish();
            }
        }
        Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "incomplete SMTP reply",
        ))
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

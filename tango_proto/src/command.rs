//! Framing and tokenizing for the command stream.
//!
//! A command on the wire is a list of `:`-joined fields terminated by a
//! single NUL byte. Outbound commands additionally carry a CRLF before the
//! NUL, except the very first command sent on a fresh connection.

/// A tokenised, but not yet interpreted, command from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The mnemonic identifying the command's meaning
    pub mnemonic: String,
    /// The remaining fields, in order
    pub args: Vec<String>,
}

impl Command {
    /// Tokenise a single decoded frame. Trailing CR/LF is stripped before
    /// splitting; an empty frame yields an empty mnemonic (the server's
    /// reply to a keepalive).
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim_end_matches(['\r', '\n']);
        let mut fields = raw.split(':');
        let mnemonic = fields.next().unwrap_or("").to_string();
        let args = fields.map(str::to_string).collect();

        Self { mnemonic, args }
    }

    /// Re-join `args[from..]` with the field delimiter. Several commands
    /// carry free text in their final field, which the tokenizer will have
    /// split on any `:` it contained.
    pub fn rest(&self, from: usize) -> String {
        if from >= self.args.len() {
            return String::new();
        }
        self.args[from..].join(":")
    }
}

/// Serialize an outbound command.
///
/// `first` omits the CRLF line ending, which the server expects only for
/// the handshake frame of a fresh connection.
pub fn serialize<S: AsRef<str>>(fields: &[S], first: bool) -> Vec<u8> {
    let joined = fields
        .iter()
        .map(|f| f.as_ref())
        .collect::<Vec<_>>()
        .join(":");

    let mut out = joined.into_bytes();
    if !first {
        out.extend_from_slice(b"\r\n");
    }
    out.push(0);
    out
}

/// Append-only receive buffer that splits the byte stream into complete
/// NUL-terminated frames. The trailing incomplete frame is retained until
/// the next chunk arrives.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of received data, returning every complete frame
    /// (without its NUL terminator).
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == 0) {
            let mut frame: Vec<u8> = self.buf.drain(..=pos).collect();
            frame.pop();
            frames.push(frame);
        }
        frames
    }
}

//! Message plumbing shared by the client session and the server connection.

use std::io::Cursor;

use binrw::prelude::*;

use crate::{
    packets::{smb2::*, ProtocolId},
    Error,
};

/// How a message travelled on the wire.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MessageForm {
    pub encrypted: bool,
    pub signed: bool,
}

#[derive(Debug)]
pub struct IncomingMessage<T> {
    pub message: T,
    /// The plain message bytes, after decryption.
    pub raw: Vec<u8>,
    pub form: MessageForm,
}

/// Options for receiving a message.
///
/// Use a builder pattern to set the options:
/// ```
/// use smb_handshake::packets::smb2::*;
/// use smb_handshake::msg_handler::ReceiveOptions;
///
/// let options = ReceiveOptions::new()
///    .status(Status::MoreProcessingRequired)
///    .or_status(Status::Success)
///    .cmd(Some(Command::SessionSetup));
/// ```
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// The accepted statuses of the received message. The first one is reported
    /// as the expected status on mismatch.
    pub status: Vec<Status>,

    /// If set, this command will be checked against the received command.
    pub cmd: Option<Command>,

    /// If set, the received message must answer this message id.
    pub msg_id: Option<u64>,
}

impl ReceiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = vec![status];
        self
    }

    pub fn or_status(mut self, status: Status) -> Self {
        self.status.push(status);
        self
    }

    pub fn cmd(mut self, cmd: Option<Command>) -> Self {
        self.cmd = cmd;
        self
    }

    pub fn msg_id(mut self, msg_id: u64) -> Self {
        self.msg_id = Some(msg_id);
        self
    }

    /// Checks a response header against the options.
    pub fn check(&self, header: &Header) -> crate::Result<()> {
        if let Some(cmd) = self.cmd {
            if header.command != cmd {
                return Err(Error::UnexpectedCommand(header.command));
            }
        }
        if let Some(msg_id) = self.msg_id {
            if header.message_id != msg_id {
                return Err(Error::InvalidMessage(format!(
                    "Expected a response to message {}, got {}",
                    msg_id, header.message_id
                )));
            }
        }
        if !self.status.iter().any(|s| *s as u32 == header.status) {
            return Err(Error::UnexpectedStatusCode {
                expected: self.status.first().copied().unwrap_or(Status::Success),
                received: header.status,
            });
        }
        Ok(())
    }
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        ReceiveOptions {
            status: vec![Status::Success],
            cmd: None,
            msg_id: None,
        }
    }
}

pub fn encode_request(request: &PlainRequest) -> crate::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    request.write(&mut cursor)?;
    Ok(cursor.into_inner())
}

pub fn encode_response(response: &PlainResponse) -> crate::Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    response.write(&mut cursor)?;
    Ok(cursor.into_inner())
}

pub fn decode_request(raw: &[u8]) -> crate::Result<PlainRequest> {
    PlainRequest::read(&mut Cursor::new(raw)).map_err(|e| decode_failure("SMB2 request", raw, e))
}

pub fn decode_response(raw: &[u8]) -> crate::Result<PlainResponse> {
    PlainResponse::read(&mut Cursor::new(raw))
        .map_err(|e| decode_failure("SMB2 response", raw, e))
}

fn decode_failure(expected: &str, raw: &[u8], cause: binrw::Error) -> Error {
    log::debug!("Failed to decode {}: {}", expected, cause);
    Error::InvalidPacket {
        expected: expected.to_string(),
        received: ProtocolId::describe(raw),
        raw: raw.to_vec(),
    }
}

/// The session a raw SMB2 message belongs to: the transform header's session id
/// for encrypted messages, the plain header's otherwise.
pub fn session_id_of(raw: &[u8]) -> crate::Result<u64> {
    match ProtocolId::of(raw) {
        Some(ProtocolId::Transform) => Ok(EncryptedHeader::read(&mut Cursor::new(raw))
            .map_err(|e| decode_failure("SMB3 transform header", raw, e))?
            .session_id),
        Some(ProtocolId::Smb2) => Ok(Header::read(&mut Cursor::new(raw))
            .map_err(|e| decode_failure("SMB2 header", raw, e))?
            .session_id),
        _ => Err(Error::InvalidPacket {
            expected: "SMB2 message or SMB3 transform header".to_string(),
            received: ProtocolId::describe(raw),
            raw: raw.to_vec(),
        }),
    }
}

/// Whether the signed flag is set in a serialized SMB2 header.
pub fn is_signed(raw: &[u8]) -> bool {
    raw.get(Header::FLAGS_OFFSET)
        .is_some_and(|flags| flags & Header::FLAGS_SIGNED_BIT != 0)
}

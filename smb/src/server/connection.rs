//! One accepted client connection: negotiation, then request dispatch.

use std::{collections::HashMap, io::Cursor, sync::Arc};

use binrw::prelude::*;
use rand::{rngs::OsRng, RngCore};

use crate::{
    connection::transport::SmbTransport,
    msg_handler::{decode_request, encode_response, is_signed, session_id_of, MessageForm},
    packets::{
        netbios::{NBSSPacketHeader, NBSSPacketType, NBSessionRequest},
        smb2::*,
        transport::SmbTcpMessageHeader,
        ProtocolId,
    },
    session::PeerInfo,
    Error,
};

use super::{
    auth::AuthProvider,
    negotiate::{self, ClientNegotiate, NegotiateOutcome, ServerNegotiation},
    session::{ServerSession, SetupOutcome},
    ServerConfig,
};

/// Whether the connection goes on after handling a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Disconnect,
}

pub struct ServerConnection {
    transport: Box<dyn SmbTransport>,
    peer: String,
    config: Arc<ServerConfig>,
    provider: Arc<dyn AuthProvider>,

    negotiation: Option<ServerNegotiation>,
    sessions: HashMap<u64, ServerSession>,
}

impl ServerConnection {
    pub fn new(
        transport: Box<dyn SmbTransport>,
        peer: String,
        config: Arc<ServerConfig>,
        provider: Arc<dyn AuthProvider>,
    ) -> ServerConnection {
        ServerConnection {
            transport,
            peer,
            config,
            provider,
            negotiation: None,
            sessions: HashMap::new(),
        }
    }

    /// Serves the connection until the peer disconnects or misbehaves.
    ///
    /// A peer closing the socket is a normal end; any other failure is returned
    /// after the connection was dropped.
    pub fn run(mut self) -> crate::Result<()> {
        log::info!("Serving {}.", self.peer);
        let result = self.serve();
        let open_sessions = self.sessions.len();
        for session in self.sessions.values_mut() {
            session.state_mut().expire();
        }
        match result {
            Ok(()) | Err(Error::NotConnected) => {
                log::info!(
                    "Connection from {} closed ({} session(s) dropped).",
                    self.peer,
                    open_sessions
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("Disconnecting {}: {}", self.peer, e);
                Err(e)
            }
        }
    }

    fn serve(&mut self) -> crate::Result<()> {
        loop {
            let raw = self.receive_message()?;
            let flow = if self.negotiation.is_none() {
                self.handle_negotiate(&raw)?
            } else {
                self.handle_request(raw)?
            };
            if flow == Flow::Disconnect {
                return Ok(());
            }
        }
    }

    /// Reads the next SMB message. Answers NetBIOS session requests and skips
    /// keep-alives, so clients may use either framing.
    fn receive_message(&mut self) -> crate::Result<Vec<u8>> {
        loop {
            let mut header = [0u8; SmbTcpMessageHeader::SIZE];
            self.transport.receive_exact(&mut header)?;
            let ptype = NBSSPacketType::read_be(&mut Cursor::new(&header[..1]))?;
            match ptype {
                NBSSPacketType::SessionMessage => {
                    let header = SmbTcpMessageHeader::read(&mut Cursor::new(header))?;
                    let mut data = vec![0; header.stream_protocol_length as usize];
                    self.transport.receive_exact(&mut data)?;
                    log::trace!("Received {} bytes from {}: {:02x?}", data.len(), self.peer, data);
                    return Ok(data);
                }
                NBSSPacketType::SessionRequest => {
                    let header = NBSSPacketHeader::read(&mut Cursor::new(header))?;
                    let mut data = vec![0; header.length as usize];
                    self.transport.receive_exact(&mut data)?;
                    let request = NBSessionRequest::read(&mut Cursor::new(&data))?;
                    log::debug!(
                        "NetBIOS session request from {} for {}.",
                        request.calling_name,
                        request.called_name
                    );
                    self.send_netbios_positive_response()?;
                }
                NBSSPacketType::SessionKeepAlive => {
                    let header = NBSSPacketHeader::read(&mut Cursor::new(header))?;
                    let mut data = vec![0; header.length as usize];
                    self.transport.receive_exact(&mut data)?;
                    log::trace!("Keep-alive from {}.", self.peer);
                }
                other => {
                    return Err(Error::InvalidPacket {
                        expected: "NetBIOS session message".to_string(),
                        received: format!("{:?}", other),
                        raw: header.to_vec(),
                    })
                }
            }
        }
    }

    fn send_netbios_positive_response(&mut self) -> crate::Result<()> {
        let header = NBSSPacketHeader {
            ptype: NBSSPacketType::PositiveSessionResponse,
            flags: 0,
            length: 0,
        };
        let mut buf = Vec::with_capacity(NBSSPacketHeader::SIZE);
        header.write(&mut Cursor::new(&mut buf))?;
        self.transport.send_raw(&buf)
    }

    fn handle_negotiate(&mut self, raw: &[u8]) -> crate::Result<Flow> {
        let token = self.provider.initial_token();
        let outcome = match negotiate::parse_client_negotiate(raw)? {
            ClientNegotiate::Smb1(request) => negotiate::answer_smb1(&request, &self.config, &token)?,
            ClientNegotiate::Smb2 { header, request } => {
                negotiate::answer_smb2(&header, &request, &self.config, &token)?
            }
        };

        match outcome {
            NegotiateOutcome::Wildcard(response) => {
                self.transport.send(&response)?;
                Ok(Flow::Continue)
            }
            NegotiateOutcome::Selected(selected) => {
                self.transport.send(&selected.response)?;
                self.negotiation = Some(ServerNegotiation::new(&selected, raw)?);
                Ok(Flow::Continue)
            }
            NegotiateOutcome::Reject(response) => {
                if let Some(response) = response {
                    self.transport.send(&response)?;
                }
                log::info!("No dialect agreed with {}, disconnecting.", self.peer);
                Ok(Flow::Disconnect)
            }
        }
    }

    fn handle_request(&mut self, raw: Vec<u8>) -> crate::Result<Flow> {
        let (plain, form) = match ProtocolId::of(&raw) {
            Some(ProtocolId::Transform) => {
                let session_id = session_id_of(&raw)?;
                let session = self.sessions.get_mut(&session_id).ok_or_else(|| {
                    Error::encryption(format!(
                        "Encrypted message for unknown session {:#x}",
                        session_id
                    ))
                })?;
                session.state_mut().unprotect(raw)?
            }
            Some(ProtocolId::Smb2) => {
                let signed = is_signed(&raw);
                (
                    raw,
                    MessageForm {
                        encrypted: false,
                        signed,
                    },
                )
            }
            _ => {
                return Err(Error::InvalidPacket {
                    expected: "SMB2 request".to_string(),
                    received: ProtocolId::describe(&raw),
                    raw,
                })
            }
        };

        let header = Header::read(&mut Cursor::new(&plain))?;
        log::debug!(
            "{} from {} (message {}, session {:#x}).",
            header.command,
            self.peer,
            header.message_id,
            header.session_id
        );

        match header.command {
            Command::Negotiate => Err(Error::InvalidState(
                "NEGOTIATE received on a negotiated connection".into(),
            )),
            Command::SessionSetup => self.handle_session_setup(&header, plain),
            command if !RequestContent::is_known(command) => {
                self.reply_error(&header, Status::NotSupported, form)
            }
            _ => self.handle_session_request(&header, plain, form),
        }
    }

    fn handle_session_setup(&mut self, header: &Header, raw: Vec<u8>) -> crate::Result<Flow> {
        let request = match decode_request(&raw)?.content {
            RequestContent::SessionSetup(request) => request,
            other => return Err(Error::UnexpectedCommand(other.associated_cmd())),
        };
        let negotiation = self
            .negotiation
            .as_ref()
            .ok_or_else(|| Error::InvalidState("SESSION_SETUP before NEGOTIATE".into()))?;

        let session_id = if header.session_id == 0 {
            let session_id = self.new_session_id();
            log::debug!("New session {:#x} for {}.", session_id, self.peer);
            self.sessions.insert(
                session_id,
                ServerSession::new(session_id, negotiation, self.provider.new_context()),
            );
            session_id
        } else {
            header.session_id
        };
        let peer = PeerInfo {
            name: self.peer.clone(),
            dialect: negotiation.dialect.to_string(),
        };

        let Some(session) = self.sessions.get_mut(&session_id) else {
            return self.reply_error(header, Status::UserSessionDeleted, MessageForm::default());
        };
        let step = session.setup_step(header, &raw, &request, &self.config, &peer)?;
        if step.outcome == SetupOutcome::Failed {
            self.sessions.remove(&session_id);
        }
        self.transport.send(&step.response)?;
        Ok(Flow::Continue)
    }

    fn handle_session_request(
        &mut self,
        header: &Header,
        raw: Vec<u8>,
        form: MessageForm,
    ) -> crate::Result<Flow> {
        let Some(session) = self.sessions.get_mut(&header.session_id) else {
            return self.reply_error(header, Status::UserSessionDeleted, form);
        };

        let (raw, form) = if form.encrypted {
            (raw, form)
        } else {
            match session.state_mut().unprotect(raw) {
                Ok(unprotected) => unprotected,
                Err(e @ (Error::SignatureVerificationFailed | Error::EncryptionError { .. })) => {
                    log::warn!("Rejecting {} from {}: {}", header.command, self.peer, e);
                    return self.reply_plain_error(header, Status::AccessDenied);
                }
                Err(e) => return Err(e),
            }
        };

        let request = decode_request(&raw)?;
        let (status, content) = match request.content {
            RequestContent::Echo(_) => (Status::Success, ResponseContent::Echo(EchoResponse::default())),
            RequestContent::Logoff(_) => {
                let response = PlainResponse::reply_to(
                    header,
                    Status::Success,
                    ResponseContent::Logoff(LogoffResponse::default()),
                );
                let wire = session.protect_response(encode_response(&response)?, form)?;
                session.state_mut().expire();
                self.sessions.remove(&header.session_id);
                log::info!("Session {:#x} of {} logged off.", header.session_id, self.peer);
                self.transport.send(&wire)?;
                return Ok(Flow::Continue);
            }
            RequestContent::TreeConnect(tree_connect) => {
                let share = tree_connect.share_name();
                if !session.state().is_valid() {
                    (Status::AccessDenied, ResponseContent::Error(ErrorResponse::default()))
                } else if !self.config.has_share(&share) {
                    log::debug!("{} asked for unknown share {}.", self.peer, share);
                    (Status::BadNetworkName, ResponseContent::Error(ErrorResponse::default()))
                } else {
                    let share_type = if share.eq_ignore_ascii_case("IPC$") {
                        TreeConnectShareType::Pipe
                    } else {
                        TreeConnectShareType::Disk
                    };
                    let tree_id = session.connect_tree(share);
                    let mut response = PlainResponse::reply_to(
                        header,
                        Status::Success,
                        ResponseContent::TreeConnect(TreeConnectResponse {
                            share_type,
                            share_flags: TreeShareFlags::new(),
                            capabilities: TreeCapabilities::new(),
                            maximal_access: Self::FULL_ACCESS,
                        }),
                    );
                    response.header.tree_id = tree_id;
                    let wire = session.protect_response(encode_response(&response)?, form)?;
                    self.transport.send(&wire)?;
                    return Ok(Flow::Continue);
                }
            }
            RequestContent::TreeDisconnect(_) => {
                if session.state_mut().remove_tree(header.tree_id).is_some() {
                    (
                        Status::Success,
                        ResponseContent::TreeDisconnect(TreeDisconnectResponse::default()),
                    )
                } else {
                    (
                        Status::NetworkNameDeleted,
                        ResponseContent::Error(ErrorResponse::default()),
                    )
                }
            }
            other => {
                return Err(Error::UnexpectedCommand(other.associated_cmd()));
            }
        };

        let response = PlainResponse::reply_to(header, status, content);
        let wire = session.protect_response(encode_response(&response)?, form)?;
        self.transport.send(&wire)?;
        Ok(Flow::Continue)
    }

    const FULL_ACCESS: u32 = 0x001f_01ff;

    /// Sends an error response, protected by the request's session when it has one.
    fn reply_error(
        &mut self,
        header: &Header,
        status: Status,
        form: MessageForm,
    ) -> crate::Result<Flow> {
        let response =
            PlainResponse::reply_to(header, status, ResponseContent::Error(ErrorResponse::default()));
        let mut wire = encode_response(&response)?;
        if let Some(session) = self.sessions.get_mut(&header.session_id) {
            wire = session.protect_response(wire, form)?;
        }
        self.transport.send(&wire)?;
        Ok(Flow::Continue)
    }

    fn reply_plain_error(&mut self, header: &Header, status: Status) -> crate::Result<Flow> {
        let response =
            PlainResponse::reply_to(header, status, ResponseContent::Error(ErrorResponse::default()));
        self.transport.send(&encode_response(&response)?)?;
        Ok(Flow::Continue)
    }

    fn new_session_id(&self) -> u64 {
        loop {
            let session_id = OsRng.next_u64();
            if session_id != 0 && !self.sessions.contains_key(&session_id) {
                return session_id;
            }
        }
    }
}

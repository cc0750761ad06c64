//! Server side of dialect negotiation.

use std::io::Cursor;

use binrw::prelude::*;
use rand::{rngs::OsRng, RngCore};

use crate::{
    connection::{negotiator::PREAUTH_SALT_SIZE, preauth_hash::PreauthHashState},
    dialects::DialectImpl,
    msg_handler::{decode_request, encode_response},
    packets::{
        binrw_util::prelude::*,
        smb1::{Smb1Dialect, Smb1Header, Smb1NegotiateRequest, Smb1NegotiateResponse,
            Smb1NegotiateResponseBody, Smb1NoDialectResponse},
        smb2::*,
        ProtocolId,
    },
    Error,
};

use super::ServerConfig;

/// The first message of a connection, classified by its protocol magic.
#[derive(Debug)]
pub enum ClientNegotiate {
    Smb1(Smb1NegotiateRequest),
    Smb2 {
        header: Header,
        request: NegotiateRequest,
    },
}

/// What the server does with a negotiate request.
#[derive(Debug)]
pub enum NegotiateOutcome {
    /// Reply with a `0x02FF` SMB2 response and wait for a real SMB2 negotiate.
    Wildcard(Vec<u8>),
    /// Reply and continue with the selected dialect.
    Selected(SelectedDialect),
    /// Send the reply if any, then disconnect.
    Reject(Option<Vec<u8>>),
}

/// The final negotiate response and what it settled.
#[derive(Debug)]
pub struct SelectedDialect {
    pub response: Vec<u8>,
    pub dialect: Dialect,
    pub cipher: Option<EncryptionCipher>,
    pub signing_required: bool,
}

/// The connection-wide outcome of negotiation, as sessions on the server see it.
#[derive(Debug, Clone)]
pub struct ServerNegotiation {
    pub dialect: Dialect,
    pub cipher: Option<EncryptionCipher>,
    pub signing_required: bool,
    /// Covers the final negotiate request and response, under 3.1.1 only.
    pub preauth_hash: Option<PreauthHashState>,
}

impl ServerNegotiation {
    pub fn new(selected: &SelectedDialect, raw_request: &[u8]) -> crate::Result<ServerNegotiation> {
        let preauth_hash = if DialectImpl::new(selected.dialect).preauth_hash_supported() {
            Some(
                PreauthHashState::default()
                    .next(raw_request)?
                    .next(&selected.response)?,
            )
        } else {
            None
        };
        Ok(ServerNegotiation {
            dialect: selected.dialect,
            cipher: selected.cipher,
            signing_required: selected.signing_required,
            preauth_hash,
        })
    }
}

/// Parses the first message of a connection. Anything but a negotiate request is an error.
pub fn parse_client_negotiate(raw: &[u8]) -> crate::Result<ClientNegotiate> {
    match ProtocolId::of(raw) {
        Some(ProtocolId::Smb1) => Smb1NegotiateRequest::read(&mut Cursor::new(raw))
            .map(ClientNegotiate::Smb1)
            .map_err(|_| not_a_negotiate(raw)),
        Some(ProtocolId::Smb2) => {
            let message = decode_request(raw)?;
            match message.content {
                RequestContent::Negotiate(request) => Ok(ClientNegotiate::Smb2 {
                    header: message.header,
                    request,
                }),
                _ => Err(not_a_negotiate(raw)),
            }
        }
        _ => Err(not_a_negotiate(raw)),
    }
}

fn not_a_negotiate(raw: &[u8]) -> Error {
    Error::InvalidPacket {
        expected: "SMB1 or SMB2 negotiate request".to_string(),
        received: ProtocolId::describe(raw),
        raw: raw.to_vec(),
    }
}

/// The highest dialect both sides support, in the server's fixed preference order.
pub fn select_dialect(offered: &[Dialect], supported: &[Dialect]) -> Option<Dialect> {
    ServerConfig::DIALECT_PREFERENCE
        .iter()
        .copied()
        .find(|d| supported.contains(d) && offered.contains(d))
}

/// The server's cipher preference, restricted to what the client lists.
/// Falls back to the server's first choice; the client then fails the negotiation.
pub fn select_cipher(offered: &[EncryptionCipher], preference: &[EncryptionCipher]) -> Option<EncryptionCipher> {
    preference
        .iter()
        .copied()
        .find(|c| offered.contains(c))
        .or_else(|| preference.first().copied())
}

/// Answers an SMB1 negotiate request. There is no SMB1 dialect behind it, so
/// clients not offering the SMB2 wildcard get "no dialect" and a disconnect.
pub fn answer_smb1(
    request: &Smb1NegotiateRequest,
    config: &ServerConfig,
    token: &[u8],
) -> crate::Result<NegotiateOutcome> {
    if !request.offers(Smb1Dialect::SMB_2_WILDCARD) {
        log::info!(
            "SMB1 client offered {:?} without the SMB2 wildcard.",
            request
                .dialects
                .iter()
                .map(|d| d.name.to_string())
                .collect::<Vec<_>>()
        );
        let response = Smb1NegotiateResponse {
            header: Smb1Header::reply_to(&request.header),
            body: Smb1NegotiateResponseBody::NoDialect(Smb1NoDialectResponse::default()),
        };
        let mut cursor = Cursor::new(Vec::new());
        response.write(&mut cursor)?;
        return Ok(NegotiateOutcome::Reject(Some(cursor.into_inner())));
    }

    let mut header = Header::new(Command::Negotiate);
    header.message_id = request.header.mid.into();
    let response = PlainResponse::reply_to(
        &header,
        Status::Success,
        ResponseContent::Negotiate(base_response(
            config,
            NegotiateDialect::Smb02Wildcard,
            token,
            GlobalCapabilities::new().with_large_mtu(true),
        )),
    );
    log::debug!("Answering multi-protocol negotiate with the SMB2 wildcard.");
    Ok(NegotiateOutcome::Wildcard(encode_response(&response)?))
}

/// Answers an SMB2 negotiate request.
pub fn answer_smb2(
    header: &Header,
    request: &NegotiateRequest,
    config: &ServerConfig,
    token: &[u8],
) -> crate::Result<NegotiateOutcome> {
    let Some(dialect) = select_dialect(&request.dialects, &config.dialects) else {
        log::warn!(
            "No common dialect: client offered {:?}, server supports {:?}.",
            request.dialects,
            config.dialects
        );
        if !config.reject_unsupported_dialects {
            return Ok(NegotiateOutcome::Reject(None));
        }
        let response = PlainResponse::reply_to(
            header,
            Status::NotSupported,
            ResponseContent::Error(ErrorResponse::default()),
        );
        return Ok(NegotiateOutcome::Reject(Some(encode_response(&response)?)));
    };

    let mut capabilities = GlobalCapabilities::new().with_large_mtu(true);
    let mut cipher = None;
    let mut contexts = None;
    match dialect {
        Dialect::Smb0311 => {
            let preauth = request.preauth_integrity_ctx().ok_or_else(|| {
                Error::InvalidMessage("3.1.1 negotiate without preauth integrity context".into())
            })?;
            if !preauth.hash_algorithms.contains(&HashAlgorithm::Sha512) {
                return Err(Error::InvalidMessage(
                    "3.1.1 negotiate does not offer SHA-512".into(),
                ));
            }
            let offered = request
                .encryption_ctx()
                .map(|c| c.ciphers.clone())
                .unwrap_or_default();
            cipher = select_cipher(&offered, &config.encryption_ciphers);
            contexts = Some(smb311_contexts(cipher)?);
        }
        Dialect::Smb0302 | Dialect::Smb030 => {
            capabilities.set_encryption(true);
            if request.capabilities.encryption() {
                cipher = Some(EncryptionCipher::Aes128Ccm);
            }
        }
        Dialect::Smb021 | Dialect::Smb0202 => {}
    }

    let mut body = base_response(config, dialect.into(), token, capabilities);
    body.negotiate_context_list = contexts;
    let response = PlainResponse::reply_to(header, Status::Success, ResponseContent::Negotiate(body));

    log::info!("Negotiated {} (cipher {:?}).", dialect, cipher);
    Ok(NegotiateOutcome::Selected(SelectedDialect {
        response: encode_response(&response)?,
        dialect,
        cipher,
        signing_required: config.signing_required || request.security_mode.signing_required(),
    }))
}

fn base_response(
    config: &ServerConfig,
    dialect: NegotiateDialect,
    token: &[u8],
    capabilities: GlobalCapabilities,
) -> NegotiateResponse {
    NegotiateResponse {
        security_mode: NegotiateSecurityMode::new()
            .with_signing_enabled(true)
            .with_signing_required(config.signing_required),
        dialect_revision: dialect,
        server_guid: config.server_guid,
        capabilities,
        max_transact_size: config.max_transact_size,
        max_read_size: config.max_read_size,
        max_write_size: config.max_write_size,
        system_time: FileTime::now(),
        server_start_time: FileTime::default(),
        buffer: token.to_vec(),
        negotiate_context_list: None,
    }
}

fn smb311_contexts(cipher: Option<EncryptionCipher>) -> crate::Result<Vec<NegotiateContext>> {
    let cipher = cipher.ok_or_else(|| {
        Error::InvalidConfiguration("3.1.1 needs an encryption cipher to advertise".into())
    })?;
    let mut salt = vec![0u8; PREAUTH_SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    Ok(vec![
        NegotiateContextValue::PreauthIntegrityCapabilities(PreauthIntegrityCapabilities {
            hash_algorithms: vec![HashAlgorithm::Sha512],
            salt,
        })
        .into(),
        NegotiateContextValue::EncryptionCapabilities(EncryptionCapabilities {
            ciphers: vec![cipher],
        })
        .into(),
    ])
}

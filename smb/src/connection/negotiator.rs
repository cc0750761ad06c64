//! Negotiate request construction and response classification.
//!
//! Everything here is pure: the [`Connection`](super::Connection) owns the I/O
//! and the state updates, this module only shapes and recognizes packets.

use std::io::Cursor;

use binrw::prelude::*;
use rand::{rngs::OsRng, RngCore};

use crate::{
    dialects::DialectImpl,
    packets::{guid::Guid, smb1::*, smb2::*, ProtocolId},
    Error,
};

use super::config::ConnectionConfig;

/// Salt length of the preauth integrity context we send.
pub const PREAUTH_SALT_SIZE: usize = 32;

/// A negotiate request, in either wire family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiateRequestPacket {
    /// A multi-protocol negotiate, carrying SMB1 dialect strings.
    Smb1(Smb1NegotiateRequest),
    Smb2(PlainRequest),
}

impl NegotiateRequestPacket {
    pub fn encode(&self) -> crate::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        match self {
            NegotiateRequestPacket::Smb1(request) => request.write(&mut cursor)?,
            NegotiateRequestPacket::Smb2(request) => request.write(&mut cursor)?,
        }
        Ok(cursor.into_inner())
    }

    /// The offered dialects, for diagnostics.
    pub fn describe(&self) -> String {
        match self {
            NegotiateRequestPacket::Smb1(request) => format!(
                "SMB1 dialects [{}]",
                request
                    .dialects
                    .iter()
                    .map(|d| d.name.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            NegotiateRequestPacket::Smb2(request) => match &request.content {
                RequestContent::Negotiate(negotiate) => format!(
                    "SMB2 dialects [{}]",
                    negotiate
                        .dialects
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                other => format!("{}", other.associated_cmd()),
            },
        }
    }

    /// Whether the request offers `dialect` as an SMB2 revision.
    pub fn offers_smb2(&self, dialect: Dialect) -> bool {
        match self {
            NegotiateRequestPacket::Smb1(request) => {
                dialect == Dialect::Smb0202 && request.offers(Smb1Dialect::SMB_2_002)
            }
            NegotiateRequestPacket::Smb2(request) => match &request.content {
                RequestContent::Negotiate(negotiate) => negotiate.dialects.contains(&dialect),
                _ => false,
            },
        }
    }

    /// The SMB1 dialect string at `index` of the request.
    fn smb1_dialect(&self, index: u16) -> Option<String> {
        match self {
            NegotiateRequestPacket::Smb1(request) => request
                .dialects
                .get(index as usize)
                .map(|d| d.name.to_string()),
            NegotiateRequestPacket::Smb2(_) => None,
        }
    }
}

/// A recognized negotiate response.
#[derive(Debug)]
pub enum NegotiateResponseKind {
    /// The server accepted none of the SMB1 dialect strings.
    Smb1NoDialect,
    Smb1Basic {
        dialect: String,
        response: Smb1BasicNegotiateResponse,
    },
    Smb1Extended {
        dialect: String,
        response: Smb1ExtendedNegotiateResponse,
    },
    Smb2 {
        header: Header,
        response: NegotiateResponse,
    },
    /// A well-formed SMB2 negotiate reply carrying an error status.
    Smb2Error { status: u32 },
}

/// The SMB1 request of a multi-protocol negotiation.
pub fn smb1_request(config: &ConnectionConfig) -> Smb1NegotiateRequest {
    let mut dialects = vec![Smb1Dialect::NT_LM_0_12];
    if config.protocols.smb2 {
        dialects.push(Smb1Dialect::SMB_2_002);
    }
    if config.protocols.smb2 || config.protocols.smb3 {
        dialects.push(Smb1Dialect::SMB_2_WILDCARD);
    }
    Smb1NegotiateRequest::new(&dialects)
}

/// An SMB2 negotiate request offering the configured dialects.
pub fn smb2_request(
    config: &ConnectionConfig,
    client_guid: Guid,
    server_name: &str,
    message_id: u64,
) -> crate::Result<PlainRequest> {
    let dialects = config.dialects();
    let highest = *dialects.last().ok_or_else(|| {
        Error::InvalidConfiguration("No SMB2 dialect is enabled for negotiation".to_string())
    })?;

    let security_mode = NegotiateSecurityMode::new()
        .with_signing_enabled(true)
        .with_signing_required(config.signing_required);

    let negotiate_context_list = if dialects.contains(&Dialect::Smb0311) {
        Some(negotiate_contexts(config, server_name))
    } else {
        None
    };

    let mut request = PlainRequest::new(RequestContent::Negotiate(NegotiateRequest {
        security_mode,
        capabilities: DialectImpl::new(highest).negotiate_caps(),
        client_guid,
        dialects,
        negotiate_context_list,
    }));
    request.header.message_id = message_id;
    request.header.credit_request = 1;
    Ok(request)
}

fn negotiate_contexts(config: &ConnectionConfig, server_name: &str) -> Vec<NegotiateContext> {
    let mut salt = vec![0u8; PREAUTH_SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let mut contexts: Vec<NegotiateContext> = vec![
        NegotiateContextValue::PreauthIntegrityCapabilities(PreauthIntegrityCapabilities {
            hash_algorithms: vec![HashAlgorithm::Sha512],
            salt,
        })
        .into(),
        NegotiateContextValue::EncryptionCapabilities(EncryptionCapabilities {
            ciphers: DialectImpl::CIPHER_PREFERENCE.to_vec(),
        })
        .into(),
    ];
    if !config.compression_algorithms.is_empty() {
        contexts.push(
            NegotiateContextValue::CompressionCapabilities(CompressionCapabilities {
                flags: CompressionCapsFlags::new(),
                compression_algorithms: config.compression_algorithms.clone(),
            })
            .into(),
        );
    }
    contexts.push(
        NegotiateContextValue::NetnameNegotiateContextId(NetnameNegotiateContextId {
            netname: server_name.into(),
        })
        .into(),
    );
    contexts
}

/// Recognizes a negotiate response to `request`.
///
/// The packet must carry the SMB1 or SMB2 magic and the negotiate command, and decode
/// completely. Anything else is an [`Error::InvalidPacket`].
pub fn classify_response(
    raw: &[u8],
    request: &NegotiateRequestPacket,
) -> crate::Result<NegotiateResponseKind> {
    match ProtocolId::of(raw) {
        Some(ProtocolId::Smb1) => classify_smb1(raw, request),
        Some(ProtocolId::Smb2) => classify_smb2(raw),
        _ => Err(invalid_packet(raw, None)),
    }
}

fn classify_smb1(
    raw: &[u8],
    request: &NegotiateRequestPacket,
) -> crate::Result<NegotiateResponseKind> {
    let response = Smb1NegotiateResponse::read(&mut Cursor::new(raw))
        .map_err(|e| invalid_packet(raw, Some(e)))?;

    match response.body {
        Smb1NegotiateResponseBody::NoDialect(_) => Ok(NegotiateResponseKind::Smb1NoDialect),
        Smb1NegotiateResponseBody::Extended(response) => Ok(NegotiateResponseKind::Smb1Extended {
            dialect: selected_smb1_dialect(raw, request, response.dialect_index)?,
            response,
        }),
        Smb1NegotiateResponseBody::Basic(response) => Ok(NegotiateResponseKind::Smb1Basic {
            dialect: selected_smb1_dialect(raw, request, response.dialect_index)?,
            response,
        }),
    }
}

fn selected_smb1_dialect(
    raw: &[u8],
    request: &NegotiateRequestPacket,
    index: u16,
) -> crate::Result<String> {
    request.smb1_dialect(index).ok_or_else(|| Error::InvalidPacket {
        expected: "an index into the offered SMB1 dialects".to_string(),
        received: format!("SMB1 dialect index {index}"),
        raw: raw.to_vec(),
    })
}

fn classify_smb2(raw: &[u8]) -> crate::Result<NegotiateResponseKind> {
    let response = PlainResponse::read(&mut Cursor::new(raw))
        .map_err(|e| invalid_packet(raw, Some(e)))?;
    if response.header.command != Command::Negotiate {
        return Err(invalid_packet(raw, None));
    }
    match response.content {
        ResponseContent::Negotiate(negotiate) => Ok(NegotiateResponseKind::Smb2 {
            header: response.header,
            response: negotiate,
        }),
        _ => Ok(NegotiateResponseKind::Smb2Error {
            status: response.header.status,
        }),
    }
}

fn invalid_packet(raw: &[u8], cause: Option<binrw::Error>) -> Error {
    if let Some(cause) = cause {
        log::debug!("Negotiate response failed to decode: {}", cause);
    }
    Error::InvalidPacket {
        expected: "SMB1 or SMB2 negotiate response".to_string(),
        received: ProtocolId::describe(raw),
        raw: raw.to_vec(),
    }
}

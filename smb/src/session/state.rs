//! Session state

use std::collections::BTreeMap;
use std::io::Cursor;

use binrw::prelude::*;

use crate::{
    connection::preauth_hash::{PreauthHashState, PreauthHashValue},
    crypto::{self, DerivedKey, KeyToDerive},
    dialects::{DialectImpl, KdfInput},
    msg_handler::{is_signed, MessageForm},
    packets::{binrw_util::prelude::*, smb2::*, ProtocolId},
    Error,
};

use super::{MessageDecryptor, MessageEncryptor, MessageSigner};

/// Lifecycle of a session: `Negotiating -> InProgress -> Valid | AuthenticationFailed -> Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Negotiating,
    InProgress,
    Valid,
    AuthenticationFailed,
    Expired,
}

/// Which end of the connection owns the session. Decides the key used for each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// Keys derived from a session key, each computed on first use and cached.
#[derive(Debug, Clone)]
pub struct SessionKeys {
    session_key: KeyToDerive,
    empty: bool,
    dialect: DialectImpl,
    preauth_hash: Option<PreauthHashValue>,

    signing_key: Option<DerivedKey>,
    c2s_encryption_key: Option<DerivedKey>,
    s2c_encryption_key: Option<DerivedKey>,
}

impl SessionKeys {
    /// Session keys shorter than 16 bytes are zero-padded; longer ones are truncated.
    pub fn new(
        session_key: &[u8],
        dialect: DialectImpl,
        preauth_hash: Option<PreauthHashValue>,
    ) -> SessionKeys {
        let mut key: KeyToDerive = [0; 16];
        let len = session_key.len().min(key.len());
        key[..len].copy_from_slice(&session_key[..len]);
        SessionKeys {
            session_key: key,
            empty: session_key.is_empty(),
            dialect,
            preauth_hash,
            signing_key: None,
            c2s_encryption_key: None,
            s2c_encryption_key: None,
        }
    }

    pub fn session_key(&self) -> &KeyToDerive {
        &self.session_key
    }

    /// Anonymous and guest sessions have no key material.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn signing_key(&mut self) -> crate::Result<DerivedKey> {
        memoized(&mut self.signing_key, || {
            match self.dialect.signing_key_kdf(self.preauth_hash.as_ref())? {
                Some(input) => derive(&self.session_key, input),
                None => Ok(self.session_key),
            }
        })
    }

    pub fn c2s_encryption_key(&mut self) -> crate::Result<DerivedKey> {
        memoized(&mut self.c2s_encryption_key, || {
            derive(
                &self.session_key,
                self.dialect.c2s_encrypt_key_kdf(self.preauth_hash.as_ref())?,
            )
        })
    }

    pub fn s2c_encryption_key(&mut self) -> crate::Result<DerivedKey> {
        memoized(&mut self.s2c_encryption_key, || {
            derive(
                &self.session_key,
                self.dialect.s2c_encrypt_key_kdf(self.preauth_hash.as_ref())?,
            )
        })
    }
}

fn memoized(
    slot: &mut Option<DerivedKey>,
    compute: impl FnOnce() -> crate::Result<DerivedKey>,
) -> crate::Result<DerivedKey> {
    if let Some(key) = slot {
        return Ok(*key);
    }
    let key = compute()?;
    *slot = Some(key);
    Ok(key)
}

fn derive(session_key: &KeyToDerive, input: KdfInput) -> crate::Result<DerivedKey> {
    crypto::kbkdf_hmacsha256::<16>(session_key, input.label, &input.context).map_err(|e| {
        Error::EncryptionError {
            message: "Key derivation failed".to_string(),
            source: Some(e),
        }
    })
}

/// Holds the state of a session: its status, keys, and the message protection built on them.
///
/// Shared by the client session and the server's per-session table.
#[derive(Debug)]
pub struct SessionState {
    session_id: u64,
    role: SessionRole,
    status: SessionStatus,

    dialect: DialectImpl,
    cipher: Option<EncryptionCipher>,
    signing_required: bool,
    encrypt_data: bool,
    flags: SessionFlags,

    preauth_hash: Option<PreauthHashState>,
    keys: Option<SessionKeys>,

    signer: Option<MessageSigner>,
    encryptor: Option<MessageEncryptor>,
    decryptor: Option<MessageDecryptor>,

    trees: BTreeMap<u32, String>,
    identity: Option<String>,
    created: FileTime,
}

impl SessionState {
    /// A new session, forking the connection's preauth hash when it has one.
    pub fn new(
        role: SessionRole,
        dialect: Dialect,
        cipher: Option<EncryptionCipher>,
        signing_required: bool,
        preauth_hash: Option<PreauthHashState>,
    ) -> SessionState {
        SessionState {
            session_id: 0,
            role,
            status: SessionStatus::Negotiating,
            dialect: DialectImpl::new(dialect),
            cipher,
            signing_required,
            encrypt_data: false,
            flags: SessionFlags::new(),
            preauth_hash,
            keys: None,
            signer: None,
            encryptor: None,
            decryptor: None,
            trees: BTreeMap::new(),
            identity: None,
            created: FileTime::now(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn set_session_id(&mut self, session_id: u64) {
        self.session_id = session_id;
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == SessionStatus::Valid
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect.dialect
    }

    pub fn flags(&self) -> SessionFlags {
        self.flags
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub fn created(&self) -> &FileTime {
        &self.created
    }

    pub fn signing_required(&self) -> bool {
        self.signing_required
    }

    pub fn set_signing_required(&mut self, signing_required: bool) {
        self.signing_required |= signing_required;
    }

    pub fn preauth_hash(&self) -> Option<&PreauthHashState> {
        self.preauth_hash.as_ref()
    }

    /// The first SESSION_SETUP message was sent or received.
    pub fn begin(&mut self) -> crate::Result<()> {
        match self.status {
            SessionStatus::Negotiating => {
                self.status = SessionStatus::InProgress;
                Ok(())
            }
            SessionStatus::InProgress => Ok(()),
            other => Err(Error::InvalidState(format!(
                "Cannot set up a session in state {:?}",
                other
            ))),
        }
    }

    /// Folds a SESSION_SETUP message into this session's preauth hash, under 3.1.1 only.
    pub fn fold_preauth(&mut self, raw: &[u8]) -> crate::Result<()> {
        if let Some(preauth_hash) = self.preauth_hash.as_mut() {
            preauth_hash.update(raw)?;
        }
        Ok(())
    }

    /// Authentication succeeded: freezes the preauth hash and installs the session key.
    pub fn complete(
        &mut self,
        session_key: &[u8],
        identity: Option<String>,
        flags: SessionFlags,
    ) -> crate::Result<()> {
        if self.status != SessionStatus::InProgress {
            return Err(Error::InvalidState(format!(
                "Cannot complete a session in state {:?}",
                self.status
            )));
        }

        let preauth_hash = match self.preauth_hash.take() {
            Some(state) => {
                let finished = state.finish();
                let value = *finished.final_hash()?;
                self.preauth_hash = Some(finished);
                Some(value)
            }
            None => None,
        };
        self.keys = Some(SessionKeys::new(session_key, self.dialect, preauth_hash));
        self.identity = identity;
        self.flags = flags;
        self.status = SessionStatus::Valid;

        log::info!(
            "Session {:#x} established ({}).",
            self.session_id,
            self.identity.as_deref().unwrap_or("anonymous")
        );
        Ok(())
    }

    pub fn fail(&mut self) {
        log::warn!("Session {:#x} authentication failed.", self.session_id);
        self.status = SessionStatus::AuthenticationFailed;
    }

    /// Logs the session off: closes every tree connect and drops the key material.
    pub fn expire(&mut self) {
        let closed = self.close_trees();
        log::debug!(
            "Session {:#x} expired, {} tree connect(s) closed.",
            self.session_id,
            closed
        );
        self.status = SessionStatus::Expired;
        self.keys = None;
        self.signer = None;
        self.encryptor = None;
        self.decryptor = None;
    }

    pub fn encrypt_data(&self) -> bool {
        self.encrypt_data
    }

    pub fn encryption_cipher(&self) -> Option<EncryptionCipher> {
        self.cipher
    }

    /// Turns on encryption of all traffic for this session.
    pub fn set_encrypt_data(&mut self) -> crate::Result<()> {
        if !self.dialect.supports_encryption() {
            return Err(Error::encryption(
                "Dialect is incompatible with SMBv3 encryption/decryption",
            ));
        }
        if self.cipher.is_none() {
            return Err(Error::encryption(
                "Encryption was requested, but no cipher was negotiated",
            ));
        }
        self.encrypt_data = true;
        Ok(())
    }

    fn has_key(&self) -> bool {
        self.keys.as_ref().is_some_and(|keys| !keys.is_empty())
    }

    pub fn should_sign(&self) -> bool {
        self.signing_required && self.has_key()
    }

    pub fn should_encrypt(&self) -> bool {
        self.encrypt_data && self.has_key()
    }

    fn keys(&mut self) -> crate::Result<&mut SessionKeys> {
        self.keys
            .as_mut()
            .ok_or_else(|| Error::InvalidState("The session has no key yet".into()))
    }

    pub fn signing_key(&mut self) -> crate::Result<DerivedKey> {
        self.keys()?.signing_key()
    }

    /// Encryption key for outgoing traffic.
    pub fn encryption_key(&mut self) -> crate::Result<DerivedKey> {
        match self.role {
            SessionRole::Client => self.keys()?.c2s_encryption_key(),
            SessionRole::Server => self.keys()?.s2c_encryption_key(),
        }
    }

    /// Decryption key for incoming traffic.
    pub fn decryption_key(&mut self) -> crate::Result<DerivedKey> {
        match self.role {
            SessionRole::Client => self.keys()?.s2c_encryption_key(),
            SessionRole::Server => self.keys()?.c2s_encryption_key(),
        }
    }

    fn signer(&mut self) -> crate::Result<&MessageSigner> {
        if self.signer.is_none() {
            let key = self.signing_key()?;
            self.signer = Some(MessageSigner::new(
                self.dialect.default_signing_algo(),
                key,
            ));
        }
        self.signer
            .as_ref()
            .ok_or_else(|| Error::InvalidState("No message signer".into()))
    }

    fn cipher(&self) -> crate::Result<EncryptionCipher> {
        self.cipher
            .ok_or_else(|| Error::encryption("No cipher was negotiated"))
    }

    fn encryptor(&mut self) -> crate::Result<&mut MessageEncryptor> {
        if self.encryptor.is_none() {
            let key = self.encryption_key()?;
            let algo = crypto::make_encrypting_algo(self.cipher()?, &key)?;
            self.encryptor = Some(MessageEncryptor::new(algo));
        }
        self.encryptor
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No message encryptor".into()))
    }

    fn decryptor(&mut self) -> crate::Result<&mut MessageDecryptor> {
        if self.decryptor.is_none() {
            let key = self.decryption_key()?;
            let algo = crypto::make_encrypting_algo(self.cipher()?, &key)?;
            self.decryptor = Some(MessageDecryptor::new(algo));
        }
        self.decryptor
            .as_mut()
            .ok_or_else(|| Error::InvalidState("No message decryptor".into()))
    }

    /// Signs `raw` when the session requires signing; returns it untouched otherwise.
    pub fn sign(&mut self, mut raw: Vec<u8>) -> crate::Result<Vec<u8>> {
        if self.should_sign() {
            self.sign_now(&mut raw)?;
        }
        Ok(raw)
    }

    /// Signs `raw` regardless of the signing requirement.
    pub fn sign_now(&mut self, raw: &mut [u8]) -> crate::Result<()> {
        self.signer()?.sign_message(raw)?;
        Ok(())
    }

    pub fn verify(&mut self, raw: &[u8]) -> crate::Result<()> {
        self.signer()?.verify_signature(raw)
    }

    /// Wraps a serialized message into a serialized transform message.
    pub fn encrypt(&mut self, raw: Vec<u8>) -> crate::Result<Vec<u8>> {
        let session_id = self.session_id;
        let encrypted = self.encryptor()?.encrypt_message(raw, session_id)?;
        let mut cursor = Cursor::new(Vec::new());
        encrypted.write(&mut cursor)?;
        Ok(cursor.into_inner())
    }

    /// Unwraps a serialized transform message addressed to this session.
    pub fn decrypt(&mut self, raw: &[u8]) -> crate::Result<Vec<u8>> {
        let message = EncryptedMessage::read(&mut Cursor::new(raw)).map_err(|_| {
            Error::InvalidPacket {
                expected: "SMB3 transform message".to_string(),
                received: ProtocolId::describe(raw),
                raw: raw.to_vec(),
            }
        })?;
        if message.header.session_id != self.session_id {
            return Err(Error::encryption(format!(
                "Transform header is for session {:#x}, not {:#x}",
                message.header.session_id, self.session_id
            )));
        }
        self.decryptor()?.decrypt_message(&message)
    }

    /// Applies the session's outgoing protection: encryption when enabled, signing otherwise.
    pub fn protect(&mut self, raw: Vec<u8>) -> crate::Result<Vec<u8>> {
        if self.should_encrypt() {
            self.encrypt(raw)
        } else {
            self.sign(raw)
        }
    }

    /// Removes the protection of an incoming message, checking it matches the session's requirements.
    pub fn unprotect(&mut self, raw: Vec<u8>) -> crate::Result<(Vec<u8>, MessageForm)> {
        if ProtocolId::of(&raw) == Some(ProtocolId::Transform) {
            let plain = self.decrypt(&raw)?;
            return Ok((
                plain,
                MessageForm {
                    encrypted: true,
                    signed: false,
                },
            ));
        }

        if self.should_encrypt() {
            return Err(Error::encryption(format!(
                "Session {:#x} requires encryption, but a plain message was received",
                self.session_id
            )));
        }

        let signed = is_signed(&raw);
        if signed && self.has_key() {
            self.verify(&raw)?;
        } else if self.should_sign() {
            log::warn!(
                "Session {:#x} requires signing, but the message is unsigned.",
                self.session_id
            );
            return Err(Error::SignatureVerificationFailed);
        }
        Ok((
            raw,
            MessageForm {
                encrypted: false,
                signed,
            },
        ))
    }

    pub fn add_tree(&mut self, tree_id: u32, share: String) {
        self.trees.insert(tree_id, share);
    }

    pub fn remove_tree(&mut self, tree_id: u32) -> Option<String> {
        self.trees.remove(&tree_id)
    }

    pub fn tree(&self, tree_id: u32) -> Option<&str> {
        self.trees.get(&tree_id).map(String::as_str)
    }

    pub fn tree_ids(&self) -> Vec<u32> {
        self.trees.keys().copied().collect()
    }

    /// Closes every tree connect, returning how many were open.
    pub fn close_trees(&mut self) -> usize {
        let count = self.trees.len();
        self.trees.clear();
        count
    }
}

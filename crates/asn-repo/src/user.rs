//! Per-user cached state.
//!
//! Each user directory carries hard links for the reserved names; the cache
//! is the parsed form of those files, loaded at startup and refreshed as
//! new versions are stored.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use asn_proto::{
    ASN_AUTH, ASN_AUTHOR, ASN_EDITORS, ASN_INVITES, ASN_MARK, ASN_MODERATORS, ASN_SUBSCRIBERS,
    Blob, PubAuth, PubEncr, TOP_LEN,
};

use crate::error::RepoError;

/// One user: identity key, cached reserved-name state, session flag.
#[derive(Debug)]
pub(crate) struct User {
    pub key: PubEncr,
    pub cache: UserCache,
    pub logged_in: bool,
}

impl User {
    pub fn new(key: PubEncr) -> Self {
        Self { key, cache: UserCache::default(), logged_in: false }
    }

    /// Repository-relative user directory: `<hex[..2]>/<hex[2..]>`.
    pub fn rel_dir(&self) -> PathBuf {
        let hex = self.key.to_hex();
        PathBuf::from(&hex[..TOP_LEN]).join(&hex[TOP_LEN..])
    }
}

/// Parsed reserved-name state for one user.
#[derive(Debug, Default, Clone)]
pub struct UserCache {
    /// Last-known location/status payload, kept opaque
    pub mark: Option<Vec<u8>>,
    /// Signing public key from `asn/auth`
    pub auth: Option<PubAuth>,
    /// Encryption public key from `asn/author` (authorization root)
    pub author: Option<PubEncr>,
    /// Keys permitted to edit/remove on this user's behalf
    pub editors: Vec<PubEncr>,
    /// Keys whose approval gates this user's messages
    pub moderators: Vec<PubEncr>,
    /// Keys this user's messages fan out to
    pub subscribers: Vec<PubEncr>,
    /// Keys permitted to open a bridge to this user
    pub invites: Vec<PubEncr>,
}

impl UserCache {
    /// Load every reserved-name file present under `dir` (the user's
    /// directory). Missing files leave their field empty.
    pub fn load(&mut self, dir: &Path) -> Result<(), RepoError> {
        if let Some(payload) = read_payload(&dir.join(ASN_MARK))? {
            self.mark = Some(payload);
        }
        if let Some(payload) = read_payload(&dir.join(ASN_AUTH))? {
            self.auth = one_key(&payload).map(PubAuth);
        }
        if let Some(payload) = read_payload(&dir.join(ASN_AUTHOR))? {
            self.author = one_key(&payload).map(PubEncr);
        }
        if let Some(payload) = read_payload(&dir.join(ASN_EDITORS))? {
            self.editors = key_list(&payload);
        }
        if let Some(payload) = read_payload(&dir.join(ASN_MODERATORS))? {
            self.moderators = key_list(&payload);
        }
        if let Some(payload) = read_payload(&dir.join(ASN_SUBSCRIBERS))? {
            self.subscribers = key_list(&payload);
        }
        if let Some(payload) = read_payload(&dir.join(ASN_INVITES))? {
            self.invites = key_list(&payload);
        }
        Ok(())
    }

    /// Whether `author` may publish on behalf of the owner of this cache.
    pub fn may_approve_for(&self, owner: &PubEncr, author: &PubEncr) -> bool {
        author == owner || self.editors.contains(author)
    }

    /// Whether `author` may edit or remove on behalf of the owner of this
    /// cache. Same rule as approval; kept distinct because the operations
    /// are gated independently.
    pub fn may_edit(&self, owner: &PubEncr, author: &PubEncr) -> bool {
        author == owner || self.editors.contains(author)
    }
}

/// Canonical reader for a reserved-name file: consume
/// `{version, type id, blob header}`, return the payload. `Ok(None)` when
/// the file does not exist.
pub(crate) fn read_payload(path: &Path) -> Result<Option<Vec<u8>>, RepoError> {
    let mut f = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Blob::read_with_preamble(&mut f)?;
    let mut payload = Vec::new();
    f.read_to_end(&mut payload)?;
    Ok(Some(payload))
}

/// A single 32-byte key payload. Short payloads are dropped with a
/// diagnostic rather than failing the load.
pub(crate) fn one_key(payload: &[u8]) -> Option<[u8; 32]> {
    match <[u8; 32]>::try_from(payload.get(..32)?) {
        Ok(raw) => Some(raw),
        Err(_) => None,
    }
}

/// A payload of concatenated 32-byte keys; a trailing partial key is
/// diagnosed and dropped.
pub(crate) fn key_list(payload: &[u8]) -> Vec<PubEncr> {
    let mut keys = Vec::with_capacity(payload.len() / 32);
    let mut chunks = payload.chunks_exact(32);
    for chunk in &mut chunks {
        let mut raw = [0u8; 32];
        raw.copy_from_slice(chunk);
        keys.push(PubEncr(raw));
    }
    if !chunks.remainder().is_empty() {
        tracing::debug!(trailing = chunks.remainder().len(), "dropping partial key in list");
    }
    keys
}

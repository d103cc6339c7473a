//! The content-addressed repository.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/
//!   tmp/                              staged temp files
//!   <2-hex top>/
//!     <remaining 126 hex>             content-addressed object
//!     <remaining 62 hex>/             user directory
//!       asn/{mark,auth,author,...}    hard links to content files
//!       asn/messages/<link name>      hard links
//! ```
//!
//! Store is stat-then-link: the temp file is hard-linked to its sum path
//! only if that path does not exist, and a lost race surfaces as
//! [`RepoError::Exist`], which callers treat as success.

use std::{
    fs::{self, File},
    io::{self, Read, Seek, SeekFrom, Write},
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
    time::SystemTime,
};

use asn_proto::{
    ASN_APPROVALS, ASN_AUTH, ASN_AUTHOR, ASN_BRIDGE, ASN_EDITORS, ASN_INVITES, ASN_MARK,
    ASN_MESSAGES, ASN_MODERATORS, ASN_REMOVALS, ASN_SUBSCRIBERS, BLOB_ID, Blob, PubAuth, PubEncr,
    Sum, TOP_LEN, Version,
};
use sha2::{Digest, Sha512};

use crate::{
    error::RepoError,
    send::{Recipient, Sender},
    tmp::TmpStore,
    user::{key_list, one_key, read_payload},
    users::UserTable,
};

/// Hex length of a content-object leaf name (128 sum digits minus the top).
const BLOB_LEAF_LEN: usize = 128 - TOP_LEN;

/// Hex length of a user-directory leaf name (64 key digits minus the top).
const USER_LEAF_LEN: usize = 64 - TOP_LEN;

/// Service keys that bypass the permission gate.
#[derive(Debug, Clone)]
pub struct ServiceKeys {
    /// The administrator's public encryption key
    pub admin: PubEncr,
    /// This server's public encryption key
    pub server: PubEncr,
}

/// True when `s` is entirely lowercase-or-digit hex.
#[must_use]
pub fn is_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_hexdigit())
}

/// The repository: root directory, temp store, user arena.
#[derive(Debug)]
pub struct Repos {
    dn: PathBuf,
    tmp: TmpStore,
    users: Mutex<UserTable>,
}

impl Repos {
    /// Open (creating if needed) a repository at `root` and load every
    /// user's cache from its reserved-name files.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RepoError> {
        let dn = root.into();
        fs::create_dir_all(&dn)?;
        let tmp = TmpStore::open(&dn)?;
        let repos = Self { dn, tmp, users: Mutex::new(UserTable::default()) };
        repos.load_users()?;
        Ok(repos)
    }

    /// Repository root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.dn
    }

    /// The staged temp-file pool (also used for PDU spill).
    #[must_use]
    pub fn tmp(&self) -> &TmpStore {
        &self.tmp
    }

    /// Join a repository-relative path onto the root.
    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.dn.join(rel)
    }

    /// Strip the root prefix from `s`, if present.
    #[must_use]
    pub fn de_prefix<'a>(&self, s: &'a str) -> &'a str {
        self.dn
            .to_str()
            .and_then(|root| s.strip_prefix(root))
            .map_or(s, |rest| rest.strip_prefix('/').unwrap_or(rest))
    }

    /// Expand a hex user key or sum to its directory form, with optional
    /// trailing elements.
    pub fn expand(&self, hex: &str, elements: &[&str]) -> PathBuf {
        let mut path = self.dn.join(&hex[..TOP_LEN]).join(&hex[TOP_LEN..]);
        for x in elements {
            path.push(x);
        }
        path
    }

    /// Open a file inside the repository; `path` may be absolute under the
    /// root or repository-relative.
    pub fn open_object(&self, path: impl AsRef<Path>) -> io::Result<File> {
        let p = path.as_ref();
        if p.starts_with(&self.dn) { File::open(p) } else { File::open(self.dn.join(p)) }
    }

    fn lock(&self) -> MutexGuard<'_, UserTable> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `key` as a user: sorted arena insert plus directory creation.
    pub fn ensure_user(&self, key: &PubEncr) -> Result<(), RepoError> {
        if key.is_zero() {
            tracing::debug!("user with null key");
        }
        let rel = self.lock().ensure(*key).rel_dir();
        fs::create_dir_all(self.dn.join(rel))?;
        Ok(())
    }

    /// Whether `key` names a known user.
    #[must_use]
    pub fn is_user(&self, key: &PubEncr) -> bool {
        self.lock().contains(key)
    }

    /// Snapshot of the owner's subscriber list.
    #[must_use]
    pub fn subscribers_of(&self, owner: &PubEncr) -> Vec<PubEncr> {
        self.lock().get(owner).map(|u| u.cache.subscribers.clone()).unwrap_or_default()
    }

    /// Snapshot of the owner's moderator list.
    #[must_use]
    pub fn moderators_of(&self, owner: &PubEncr) -> Vec<PubEncr> {
        self.lock().get(owner).map(|u| u.cache.moderators.clone()).unwrap_or_default()
    }

    /// Snapshot of the owner's invite list.
    #[must_use]
    pub fn invites_of(&self, owner: &PubEncr) -> Vec<PubEncr> {
        self.lock().get(owner).map(|u| u.cache.invites.clone()).unwrap_or_default()
    }

    /// The owner's cached mark payload.
    #[must_use]
    pub fn mark_of(&self, owner: &PubEncr) -> Option<Vec<u8>> {
        self.lock().get(owner).and_then(|u| u.cache.mark.clone())
    }

    /// Whether `author` may edit or remove on `owner`'s behalf.
    #[must_use]
    pub fn may_edit(&self, author: &PubEncr, owner: &PubEncr) -> bool {
        self.lock().get(owner).is_some_and(|u| u.cache.may_edit(owner, author))
    }

    /// Whether `author` may publish on `owner`'s behalf.
    #[must_use]
    pub fn may_approve_for(&self, author: &PubEncr, owner: &PubEncr) -> bool {
        self.lock().get(owner).is_some_and(|u| u.cache.may_approve_for(owner, author))
    }

    /// Flag a user's session state; creates the user if unknown.
    pub fn set_logged_in(&self, key: &PubEncr, logged_in: bool) -> Result<(), RepoError> {
        self.ensure_user(key)?;
        if let Some(u) = self.lock().get_mut(key) {
            u.logged_in = logged_in;
        }
        Ok(())
    }

    /// Keys of every currently logged-in user.
    #[must_use]
    pub fn logged_in(&self) -> Vec<PubEncr> {
        self.lock().iter().filter(|u| u.logged_in).map(|u| u.key).collect()
    }

    /// Permission gate for a blob authored by `author` in `owner`'s
    /// namespace. Service keys bypass; message-class names are open;
    /// anything else needs edit rights.
    pub fn permission(
        &self,
        owner: &PubEncr,
        author: &PubEncr,
        svc: &ServiceKeys,
        name: &str,
    ) -> Result<(), RepoError> {
        if author == &svc.admin || author == &svc.server {
            return Ok(());
        }
        if Blob::is_message_name(name) {
            return Ok(());
        }
        if self.may_edit(author, owner) {
            return Ok(());
        }
        Err(RepoError::Permission)
    }

    /// Scan the top directories for users and load their caches.
    fn load_users(&self) -> Result<(), RepoError> {
        for top in fs::read_dir(&self.dn)? {
            let top = top?;
            let top_name = top.file_name();
            let Some(top_name) = top_name.to_str() else { continue };
            if !top.file_type()?.is_dir() || top_name.len() != TOP_LEN || !is_hex(top_name) {
                continue;
            }
            for sub in fs::read_dir(top.path())? {
                let sub = sub?;
                let sub_name = sub.file_name();
                let Some(sub_name) = sub_name.to_str() else { continue };
                if !sub.file_type()?.is_dir()
                    || sub_name.len() != USER_LEAF_LEN
                    || !is_hex(sub_name)
                {
                    continue;
                }
                let Ok(key) = format!("{top_name}{sub_name}").parse::<PubEncr>() else {
                    continue;
                };
                let mut table = self.lock();
                let user = table.ensure(key);
                user.cache.load(&sub.path())?;
            }
        }
        Ok(())
    }

    /// Iterate every content-addressed object whose modification time is
    /// strictly after `epoch` (or all of them when `epoch` is `None`),
    /// seeding peer catch-up.
    pub fn filter(
        &self,
        epoch: Option<SystemTime>,
        f: &mut dyn FnMut(&Path) -> Result<(), RepoError>,
    ) -> Result<(), RepoError> {
        for top in fs::read_dir(&self.dn)? {
            let top = top?;
            let top_name = top.file_name();
            let Some(top_name) = top_name.to_str() else { continue };
            if !top.file_type()?.is_dir() || top_name.len() != TOP_LEN || !is_hex(top_name) {
                continue;
            }
            for sub in fs::read_dir(top.path())? {
                let sub = sub?;
                let sub_name = sub.file_name();
                let Some(sub_name) = sub_name.to_str() else { continue };
                if !sub.file_type()?.is_file()
                    || sub_name.len() != BLOB_LEAF_LEN
                    || !is_hex(sub_name)
                {
                    continue;
                }
                let after = match epoch {
                    None => true,
                    Some(e) => sub.metadata()?.modified()? > e,
                };
                if after {
                    f(&sub.path())?;
                }
            }
        }
        Ok(())
    }

    /// Find the unique object or user whose hex name starts with `prefix`.
    ///
    /// # Errors
    ///
    /// [`RepoError::Ambiguous`] when more than one entry matches,
    /// [`RepoError::NoEnt`] when none does.
    pub fn search(&self, prefix: &str) -> Result<PathBuf, RepoError> {
        if prefix.len() < TOP_LEN || !is_hex(prefix) {
            return Err(RepoError::NoEnt);
        }
        let (top, rest) = prefix.split_at(TOP_LEN);
        let dir = self.dn.join(top);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(RepoError::NoEnt),
            Err(e) => return Err(e.into()),
        };
        let mut matched = None;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(rest) {
                if matched.is_some() {
                    return Err(RepoError::Ambiguous);
                }
                matched = Some(entry.path());
            }
        }
        matched.ok_or(RepoError::NoEnt)
    }

    /// Short user-facing reference for an absolute or relative repository
    /// path: `$<16-hex>` for a bare content sum, the bare name when owned by
    /// the logged-in user, `~<16-hex>/<name>` otherwise. `None` for paths
    /// outside the known layout.
    #[must_use]
    pub fn fn2ref(&self, login: Option<&PubEncr>, path: &str) -> Option<String> {
        let s = self.de_prefix(path);
        if s.as_bytes().get(TOP_LEN) != Some(&b'/') {
            return Some(s.to_owned());
        }
        let top = &s[..TOP_LEN];
        let rest = &s[TOP_LEN + 1..];
        match rest.find('/') {
            None => {
                if is_hex(rest) && rest.len() > 14 {
                    let sum = format!("{top}{rest}");
                    Some(format!("${}", &sum[..16]))
                } else {
                    None
                }
            },
            Some(slash) => {
                if is_hex(&rest[..slash]) && slash > 14 {
                    let suser = format!("{top}{}", &rest[..slash]);
                    let name = &rest[slash + 1..];
                    if login.map(PubEncr::to_hex).as_deref() == Some(&suser) {
                        Some(name.to_owned())
                    } else {
                        Some(format!("~{}/{name}", &suser[..16]))
                    }
                } else {
                    None
                }
            },
        }
    }

    /// Inverse of [`Repos::fn2ref`]: parse `~<keyhex>/<name>`, `<keyhex>`,
    /// `<keyhex>/<name>`, the on-disk `<top>/<rest>` forms, or a bare name.
    /// The key half resolves only to known users.
    #[must_use]
    pub fn parse_path(&self, xn: &str) -> (Option<PubEncr>, Option<String>) {
        let xn = self.de_prefix(xn);
        let xn = xn.strip_prefix('~').unwrap_or(xn);

        // Unsplit 64-hex user key, optionally followed by /name.
        if xn.len() >= 64 && is_hex(&xn[..64]) {
            if let Ok(key) = xn[..64].parse::<PubEncr>() {
                let rest = &xn[64..];
                if self.is_user(&key) && (rest.is_empty() || rest.starts_with('/')) {
                    let name =
                        rest.strip_prefix('/').filter(|r| !r.is_empty()).map(str::to_owned);
                    return (Some(key), name);
                }
            }
        }

        // On-disk 2/rest form.
        if xn.as_bytes().get(TOP_LEN) == Some(&b'/') {
            let top = &xn[..TOP_LEN];
            let rest = &xn[TOP_LEN + 1..];
            let (keystr, name) = match rest.find('/') {
                None if is_hex(rest) => (format!("{top}{rest}"), None),
                Some(slash) if slash > 0 && is_hex(&rest[..slash]) => {
                    (format!("{top}{}", &rest[..slash]), Some(rest[slash + 1..].to_owned()))
                },
                _ => return (None, Some(format!("{top}{rest}"))),
            };
            let user = keystr.parse::<PubEncr>().ok().filter(|k| self.is_user(k));
            return (user, name);
        }

        (None, Some(xn.to_owned()))
    }

    /// Stream an object into the repository and dispatch it.
    ///
    /// Bytes are teed into a staged temp file and a SHA-512 accumulator.
    /// When `blob` is given, the preamble and header are written locally and
    /// `payload` supplies payload bytes only; when `blob` is `None` (tee
    /// mode), `payload` supplies `{header, payload}` and the header is
    /// parsed back out of the staged file. On completion the temp file is
    /// hard-linked to `<top>/<leaf>` and the object dispatched by name.
    ///
    /// # Errors
    ///
    /// [`RepoError::Exist`] when the sum is already present; the store had
    /// no side effects and callers treat it as success.
    pub fn store(
        &self,
        x: &dyn Sender,
        v: Version,
        blob: Option<&Blob>,
        payload: &mut dyn Read,
    ) -> Result<Sum, RepoError> {
        let mut tmp = self.tmp.create()?;
        let mut hasher = Sha512::new();
        {
            let mut tee = Tee { file: tmp.as_file_mut(), hasher: &mut hasher };
            match blob {
                Some(b) => b.write_with_preamble(v, &mut tee)?,
                None => {
                    v.write_to(&mut tee)?;
                    tee.write_all(&[BLOB_ID])?;
                },
            }
            io::copy(payload, &mut tee)?;
        }
        let blob = match blob {
            Some(b) => b.clone(),
            None => {
                let f = tmp.as_file_mut();
                f.seek(SeekFrom::Start(0))?;
                let (_, b) = Blob::read_with_preamble(f)?;
                b
            },
        };

        let sum = Sum::from_digest(hasher);
        let sum_fn = self.join(sum.rel_path());
        if sum_fn.exists() {
            return Err(RepoError::Exist);
        }
        // Two stores racing on the same sum are serialized by the link
        // itself: the loser sees AlreadyExists and reports Exist.
        match ln(tmp.path(), &sum_fn) {
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(RepoError::Exist),
            other => other?,
        }
        self.dispatch(x, &sum, &sum_fn, &blob)?;
        Ok(sum)
    }

    /// Resolve typed semantics of a freshly stored object.
    fn dispatch(
        &self,
        x: &dyn Sender,
        sum: &Sum,
        sum_fn: &Path,
        blob: &Blob,
    ) -> Result<(), RepoError> {
        self.ensure_user(&blob.owner)?;
        self.ensure_user(&blob.author)?;
        let owner_dir = user_rel(&blob.owner);

        match blob.name.as_str() {
            ASN_MARK => {
                let payload = read_payload(sum_fn)?.unwrap_or_default();
                if let Some(u) = self.lock().get_mut(&blob.owner) {
                    u.cache.mark = Some(payload);
                }
                ln_replace(sum_fn, &self.join(owner_dir.join(ASN_MARK)))?;
                for k in self.logged_in() {
                    if k != blob.owner {
                        x.send(Recipient::Key(k), sum_fn);
                    }
                }
                // no need to recover a mark, so the sum link is not retained
                fs::remove_file(sum_fn)?;
            },
            ASN_AUTH => {
                let payload = read_payload(sum_fn)?.unwrap_or_default();
                if let Some(u) = self.lock().get_mut(&blob.owner) {
                    u.cache.auth = one_key(&payload).map(PubAuth);
                }
                x.send(Recipient::Mirrors, sum_fn);
                ln_replace(sum_fn, &self.join(owner_dir.join(ASN_AUTH)))?;
            },
            ASN_AUTHOR => {
                let payload = read_payload(sum_fn)?.unwrap_or_default();
                if let Some(u) = self.lock().get_mut(&blob.owner) {
                    u.cache.author = one_key(&payload).map(PubEncr);
                }
                x.send(Recipient::Mirrors, sum_fn);
                ln_replace(sum_fn, &self.join(owner_dir.join(ASN_AUTHOR)))?;
            },
            name @ (ASN_EDITORS | ASN_INVITES | ASN_MODERATORS | ASN_SUBSCRIBERS) => {
                let payload = read_payload(sum_fn)?.unwrap_or_default();
                let keys = key_list(&payload);
                if let Some(u) = self.lock().get_mut(&blob.owner) {
                    match name {
                        ASN_EDITORS => u.cache.editors = keys,
                        ASN_INVITES => u.cache.invites = keys,
                        ASN_MODERATORS => u.cache.moderators = keys,
                        _ => u.cache.subscribers = keys,
                    }
                }
                x.send(Recipient::Mirrors, sum_fn);
                ln_replace(sum_fn, &self.join(owner_dir.join(name)))?;
            },
            ASN_BRIDGE | "asn/bridge/" => {
                // never retained; just relayed to each invited key
                for k in self.invites_of(&blob.owner) {
                    x.send(Recipient::Key(k), sum_fn);
                }
                fs::remove_file(sum_fn)?;
            },
            name @ (ASN_APPROVALS | ASN_REMOVALS) => {
                let mut f = File::open(sum_fn)?;
                f.seek(SeekFrom::Start(blob.payload_off()))?;
                self.proc_sums(x, &mut f, blob)?;
                x.send(Recipient::Mirrors, sum_fn);
                ln(sum_fn, &self.join(owner_dir.join(name).join(blob.link_name(sum))))?;
            },
            name if Blob::is_message_name(name) => {
                x.send(Recipient::Mirrors, sum_fn);
                let moderators = self.moderators_of(&blob.owner);
                if !moderators.is_empty() && !self.may_approve_for(&blob.author, &blob.owner) {
                    tracing::debug!(owner = ?blob.owner, "message held for moderation");
                    for k in moderators {
                        x.send(Recipient::Key(k), sum_fn);
                    }
                    return Ok(());
                }
                self.lsm(x, sum, sum_fn, blob)?;
            },
            name if name.ends_with('/') => {
                x.send(Recipient::Mirrors, sum_fn);
                ln(sum_fn, &self.join(owner_dir.join(name).join(blob.link_name(sum))))?;
            },
            name => {
                let named = self.join(owner_dir.join(name));
                if named.exists() {
                    if Blob::time_of(&named)? > blob.time_ns {
                        // an older incoming blob neither links nor mirrors
                        return Ok(());
                    }
                    fs::remove_file(&named)?;
                }
                x.send(Recipient::Mirrors, sum_fn);
                ln(sum_fn, &named)?;
            },
        }
        Ok(())
    }

    /// Link and send a message: owner, then author if distinct, then every
    /// subscriber not already covered. One hard link and one send per key.
    fn lsm(&self, x: &dyn Sender, sum: &Sum, path: &Path, blob: &Blob) -> Result<(), RepoError> {
        let link = blob.link_name(sum);

        x.send(Recipient::Key(blob.owner), path);
        ln_diag(path, &self.join(user_rel(&blob.owner).join(ASN_MESSAGES).join(&link)));

        if blob.author != blob.owner {
            x.send(Recipient::Key(blob.author), path);
            ln_diag(path, &self.join(user_rel(&blob.author).join(ASN_MESSAGES).join(&link)));
        }

        for k in self.subscribers_of(&blob.owner) {
            if k != blob.owner && k != blob.author {
                self.ensure_user(&k)?;
                x.send(Recipient::Key(k), path);
                ln_diag(path, &self.join(user_rel(&k).join(ASN_MESSAGES).join(&link)));
            }
        }
        Ok(())
    }

    /// Process an approval or removal sum list.
    ///
    /// `f` must be positioned at the payload. Per-sum failures (missing
    /// target, missing rights, wrong class, wrong link count) are diagnosed
    /// and skipped; processing continues.
    fn proc_sums(&self, x: &dyn Sender, f: &mut File, blob: &Blob) -> Result<(), RepoError> {
        let approvals = blob.name == ASN_APPROVALS;
        while let Some(sum) = Sum::read_from(f)? {
            let target_fn = self.join(sum.rel_path());
            let Ok(meta) = fs::metadata(&target_fn) else { continue };

            let mut tf = File::open(&target_fn)?;
            let target = match Blob::read_with_preamble(&mut tf) {
                Ok((_, b)) => b,
                Err(e) => {
                    tracing::debug!(%sum, "unreadable target: {e}");
                    continue;
                },
            };
            drop(tf);

            if !self.is_user(&target.owner) {
                continue;
            }

            if approvals {
                if meta.nlink() > 1 {
                    tracing::debug!(%sum, "already linked");
                    continue;
                }
                if !self.may_approve_for(&blob.author, &target.owner) {
                    tracing::debug!(author = ?blob.author, owner = ?target.owner,
                        "may not approve");
                    continue;
                }
                if !Blob::is_message_name(&target.name) {
                    tracing::debug!(name = %target.name, "only messages may be approved");
                    continue;
                }
                self.lsm(x, &sum, &target_fn, &target)?;
            } else {
                if meta.nlink() == 1 {
                    tracing::debug!(%sum, "has no links");
                    continue;
                }
                if !self.may_edit(&blob.author, &target.owner) {
                    tracing::debug!(author = ?blob.author, owner = ?target.owner,
                        "may not remove");
                    continue;
                }
                let root = self.join(user_rel(&target.owner));
                unlink_same_inode(&root, meta.dev(), meta.ino())?;
            }
        }
        Ok(())
    }
}

/// Repository-relative user directory for a key.
fn user_rel(key: &PubEncr) -> PathBuf {
    let hex = key.to_hex();
    PathBuf::from(&hex[..TOP_LEN]).join(&hex[TOP_LEN..])
}

/// Hard link `src` to `dst`, creating parent directories.
fn ln(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::hard_link(src, dst)
}

/// Hard link, replacing any existing `dst` (reserved single-name links).
fn ln_replace(src: &Path, dst: &Path) -> io::Result<()> {
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    ln(src, dst)
}

/// Hard link for fan-out; an already-present link is a diagnostic, not a
/// failure.
fn ln_diag(src: &Path, dst: &Path) {
    match ln(src, dst) {
        Ok(()) => {},
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            tracing::debug!(dst = %dst.display(), "link already present");
        },
        Err(e) => tracing::warn!(dst = %dst.display(), "link failed: {e}"),
    }
}

/// Walk `root` and unlink every regular file sharing the target's inode.
fn unlink_same_inode(root: &Path, dev: u64, ino: u64) -> io::Result<()> {
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let ft = entry.file_type()?;
        if ft.is_dir() {
            unlink_same_inode(&entry.path(), dev, ino)?;
        } else if ft.is_file() {
            let meta = entry.metadata()?;
            if meta.dev() == dev && meta.ino() == ino {
                fs::remove_file(entry.path())?;
                tracing::debug!(path = %entry.path().display(), "unlinked");
            }
        }
    }
    Ok(())
}

/// Tee writer: staged temp file plus the SHA-512 accumulator.
struct Tee<'a> {
    file: &'a mut File,
    hasher: &'a mut Sha512,
}

impl Write for Tee<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_all(buf)?;
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use crate::send::NullSender;

    use super::*;

    fn key(b: u8) -> PubEncr {
        PubEncr([b; 32])
    }

    fn store_named(repos: &Repos, owner: PubEncr, name: &str, payload: &[u8]) -> Sum {
        let blob = Blob::new(owner, owner, name, [0; 8]);
        repos
            .store(&NullSender, Version::LATEST, Some(&blob), &mut io::Cursor::new(payload))
            .unwrap()
    }

    #[test]
    fn store_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();

        let blob = Blob::new(key(1), key(1), "hello", [0; 8]);
        let mut object = Vec::new();
        blob.write_with_preamble(Version::LATEST, &mut object).unwrap();
        object.extend_from_slice(b"world");

        let sum = repos
            .store(&NullSender, Version::LATEST, Some(&blob), &mut io::Cursor::new(b"world"))
            .unwrap();

        // The filename is the sum of the bytes written, in write order.
        assert_eq!(sum, Sum::of(&object));
        let stored = fs::read(repos.join(sum.rel_path())).unwrap();
        assert_eq!(stored, object);
    }

    #[test]
    fn tee_mode_parses_header_from_stream() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();

        let blob = Blob::new(key(4), key(4), "notes", [7; 8]);
        let mut stream = Vec::new();
        blob.write_to(&mut stream).unwrap();
        stream.extend_from_slice(b"tee payload");

        let sum = repos
            .store(&NullSender, Version::LATEST, None, &mut io::Cursor::new(&stream))
            .unwrap();

        // Dispatch saw the parsed owner: the named link exists.
        let named = repos.expand(&key(4).to_hex(), &["notes"]);
        assert!(named.exists());
        assert!(repos.join(sum.rel_path()).exists());
    }

    #[test]
    fn search_prefix_modes() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();

        let sum = store_named(&repos, key(1), "a-name", b"payload");
        let hex = sum.to_hex();

        let found = repos.search(&hex[..10]).unwrap();
        assert_eq!(found, repos.join(sum.rel_path()));

        assert!(matches!(repos.search("zz"), Err(RepoError::NoEnt)));
    }

    #[test]
    fn search_reports_ambiguity() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();

        let a = store_named(&repos, key(1), "one", b"1");
        let _b = store_named(&repos, key(1), "two", b"2");

        // The empty suffix matches everything under the top dir; seed a
        // second entry under the same top to guarantee ambiguity.
        let top = &a.to_hex()[..TOP_LEN];
        fs::write(dir.path().join(top).join("f".repeat(BLOB_LEAF_LEN)), b"x").unwrap();
        assert!(matches!(repos.search(top), Err(RepoError::Ambiguous)));
    }

    #[test]
    fn fn2ref_forms() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();
        let owner = key(0xab);
        let hex = owner.to_hex();

        let sum = Sum::of(b"x");
        let sum_path = repos.join(sum.rel_path());
        let r = repos.fn2ref(None, sum_path.to_str().unwrap()).unwrap();
        assert_eq!(r, format!("${}", &sum.to_hex()[..16]));

        let own_path = format!("{}/{}/asn/mark", &hex[..2], &hex[2..]);
        assert_eq!(repos.fn2ref(Some(&owner), &own_path).unwrap(), "asn/mark");

        let other = key(0xcd);
        let r = repos.fn2ref(Some(&other), &own_path).unwrap();
        assert_eq!(r, format!("~{}/asn/mark", &hex[..16]));

        assert_eq!(repos.fn2ref(None, "plain-name").unwrap(), "plain-name");
    }

    #[test]
    fn parse_path_inverts_refs() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();
        let owner = key(0xab);
        repos.ensure_user(&owner).unwrap();
        let hex = owner.to_hex();

        let (user, name) = repos.parse_path(&hex);
        assert_eq!(user, Some(owner));
        assert_eq!(name, None);

        let (user, name) = repos.parse_path(&format!("~{hex}/asn/messages"));
        assert_eq!(user, Some(owner));
        assert_eq!(name.as_deref(), Some("asn/messages"));

        let (user, name) = repos.parse_path(&format!("{}/{}/notes", &hex[..2], &hex[2..]));
        assert_eq!(user, Some(owner));
        assert_eq!(name.as_deref(), Some("notes"));

        let (user, name) = repos.parse_path("just-a-name");
        assert_eq!(user, None);
        assert_eq!(name.as_deref(), Some("just-a-name"));
    }

    #[test]
    fn permission_gate_rules() {
        let dir = tempfile::tempdir().unwrap();
        let repos = Repos::open(dir.path()).unwrap();
        let svc = ServiceKeys { admin: key(0xa0), server: key(0xb0) };
        let owner = key(1);
        repos.ensure_user(&owner).unwrap();

        // Service keys bypass, messages are open, strangers are denied.
        let admin = svc.admin;
        repos.permission(&owner, &admin, &svc, "asn/editors").unwrap();
        repos.permission(&owner, &key(9), &svc, "asn/messages").unwrap();
        assert!(matches!(
            repos.permission(&owner, &key(9), &svc, "asn/editors"),
            Err(RepoError::Permission)
        ));
        repos.permission(&owner, &owner, &svc, "asn/editors").unwrap();
    }

    #[test]
    fn load_users_restores_caches() {
        let dir = tempfile::tempdir().unwrap();
        let owner = key(3);
        {
            let repos = Repos::open(dir.path()).unwrap();
            let mut payload = Vec::new();
            payload.extend_from_slice(key(7).as_bytes());
            let blob = Blob::new(owner, owner, ASN_SUBSCRIBERS, [0; 8]);
            repos
                .store(&NullSender, Version::LATEST, Some(&blob), &mut io::Cursor::new(&payload))
                .unwrap();
        }

        // A fresh open rebuilds the cache from the reserved-name links.
        let repos = Repos::open(dir.path()).unwrap();
        assert!(repos.is_user(&owner));
        assert_eq!(repos.subscribers_of(&owner), vec![key(7)]);
    }
}

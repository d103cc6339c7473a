//! The user arena: every known user, sorted by key bytes.

use asn_proto::PubEncr;

use crate::user::User;

/// All known users, sorted by key bytes for binary-search lookup and
/// ordered insertion. Owned by the repository behind a single mutex.
#[derive(Debug, Default)]
pub(crate) struct UserTable {
    list: Vec<User>,
}

impl UserTable {
    fn position(&self, key: &PubEncr) -> Result<usize, usize> {
        self.list.binary_search_by(|u| u.key.as_bytes().cmp(key.as_bytes()))
    }

    pub fn get(&self, key: &PubEncr) -> Option<&User> {
        self.position(key).ok().map(|i| &self.list[i])
    }

    pub fn get_mut(&mut self, key: &PubEncr) -> Option<&mut User> {
        self.position(key).ok().map(|i| &mut self.list[i])
    }

    /// Insert at the binary-search point; existing entries are returned
    /// untouched.
    pub fn ensure(&mut self, key: PubEncr) -> &mut User {
        let i = match self.position(&key) {
            Ok(i) => i,
            Err(i) => {
                self.list.insert(i, User::new(key));
                i
            },
        };
        &mut self.list[i]
    }

    pub fn contains(&self, key: &PubEncr) -> bool {
        self.position(key).is_ok()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.list.iter()
    }
}

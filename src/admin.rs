//! User table helpers.
//!
//! Users live in the `_meta_.user` table as `(name, password, is_admin, perm)`
//! rows, where `password` is the SHA-1 hex digest of the password and `perm`
//! is a `;`-separated list of `database=read|write` entries.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};

pub(crate) const SELECT_USERS: &str = "select * from _meta_.user";
pub(crate) const SELECT_USER: &str = "select * from _meta_.user where name=?";
pub(crate) const INSERT_USER: &str = "insert into _meta_.user values(?, ?, ?, ?)";
pub(crate) const DELETE_USER: &str = "delete from _meta_.user where name=?";

/// Access level granted on a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    /// Select only
    Read,
    /// Select and modify
    Write,
}

impl Perm {
    /// Name used in the user table.
    pub fn as_str(self) -> &'static str {
        match self {
            Perm::Read => "read",
            Perm::Write => "write",
        }
    }
}

/// A row of the user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    /// Username
    pub name: String,
    /// SHA-1 hex digest of the password
    pub password_digest: String,
    /// Administrators may reload the user table and access every database
    pub is_admin: bool,
    /// Raw permission string, e.g. `test=read;prod=write`
    pub perm: String,
}

impl UserInfo {
    pub(crate) fn from_tuple(
        (name, password_digest, is_admin, perm): (String, String, bool, Option<String>),
    ) -> Self {
        Self {
            name,
            password_digest,
            is_admin,
            perm: perm.unwrap_or_default(),
        }
    }
}

/// SHA-1 hex digest stored in the user table.
pub(crate) fn password_digest(password: &str) -> String {
    format!("{:x}", Sha1::digest(password.as_bytes()))
}

/// Apply permission updates to a permission string.
///
/// `None` revokes access to that database. Entries are written back sorted
/// by database name.
pub(crate) fn merge_perms(current: &str, updates: &[(&str, Option<Perm>)]) -> Result<String> {
    let mut perms: BTreeMap<String, String> = current
        .split(';')
        .filter_map(|entry| entry.split_once('='))
        .filter(|(db, _)| !db.is_empty())
        .map(|(db, perm)| (db.to_string(), perm.to_string()))
        .collect();
    for (db, perm) in updates {
        if db.is_empty() || db.contains([';', '=']) {
            return Err(Error::InvalidUsage(format!("invalid database name: {:?}", db)));
        }
        match perm {
            Some(perm) => perms.insert(db.to_string(), perm.as_str().to_string()),
            None => perms.remove(*db),
        };
    }
    Ok(perms
        .iter()
        .map(|(db, perm)| format!("{}={}", db, perm))
        .collect::<Vec<_>>()
        .join(";"))
}

//! User identity resolution for credential enrichment.
//!
//! The controller can enrich a credential with the user's name,
//! supplementary group list, and (for nss passthrough) home directory and
//! shell, so compute nodes never consult their own passwd database.
//! Resolution goes through the [`IdentityResolver`] seam: production code
//! uses [`SystemResolver`], tests and pre-resolving controllers use
//! [`StaticResolver`].

use std::collections::HashMap;
use std::ffi::CString;

use nix::unistd::{getgrouplist, Gid, Uid, User};
use thiserror::Error;

/// Errors raised during identity resolution.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// No passwd entry for the uid.
    #[error("no identity for uid {uid}")]
    NotFound {
        /// The uid that failed to resolve.
        uid: u32,
    },

    /// The underlying lookup failed.
    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

/// A resolved user identity carried inside credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Primary user name.
    pub user_name: String,
    /// Primary group id.
    pub primary_gid: u32,
    /// Supplementary group list (includes the primary gid).
    pub gids: Vec<u32>,
    /// Home directory, populated only for extended lookups.
    pub home: Option<String>,
    /// Login shell, populated only for extended lookups.
    pub shell: Option<String>,
}

/// Resolves identities and supplementary group lists.
pub trait IdentityResolver: Send + Sync {
    /// Resolves the identity for `uid`/`gid`. `with_extended` additionally
    /// populates home directory and shell.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] when the uid cannot be resolved.
    fn fetch(&self, uid: u32, gid: u32, with_extended: bool) -> Result<Identity, IdentityError>;

    /// Supplementary group list for `uid`/`gid`. `user_name` short-cuts
    /// the passwd lookup when the caller already resolved it.
    ///
    /// # Errors
    ///
    /// Returns an [`IdentityError`] when the group list cannot be built.
    fn group_list(
        &self,
        uid: u32,
        gid: u32,
        user_name: Option<&str>,
    ) -> Result<Vec<u32>, IdentityError>;
}

/// Identity resolution against the local passwd/group database.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl SystemResolver {
    fn passwd_entry(uid: u32) -> Result<User, IdentityError> {
        User::from_uid(Uid::from_raw(uid))
            .map_err(|e| IdentityError::Lookup(e.to_string()))?
            .ok_or(IdentityError::NotFound { uid })
    }
}

impl IdentityResolver for SystemResolver {
    fn fetch(&self, uid: u32, gid: u32, with_extended: bool) -> Result<Identity, IdentityError> {
        let entry = Self::passwd_entry(uid)?;
        let gids = self.group_list(uid, gid, Some(&entry.name))?;

        Ok(Identity {
            user_name: entry.name.clone(),
            primary_gid: gid,
            gids,
            home: with_extended.then(|| entry.dir.to_string_lossy().into_owned()),
            shell: with_extended.then(|| entry.shell.to_string_lossy().into_owned()),
        })
    }

    fn group_list(
        &self,
        uid: u32,
        gid: u32,
        user_name: Option<&str>,
    ) -> Result<Vec<u32>, IdentityError> {
        let name = match user_name {
            Some(n) => n.to_string(),
            None => Self::passwd_entry(uid)?.name,
        };
        let cname =
            CString::new(name).map_err(|_| IdentityError::Lookup("NUL in user name".into()))?;
        let groups = getgrouplist(&cname, Gid::from_raw(gid))
            .map_err(|e| IdentityError::Lookup(e.to_string()))?;
        Ok(groups.into_iter().map(Gid::as_raw).collect())
    }
}

/// In-memory identity table.
#[derive(Debug, Default)]
pub struct StaticResolver {
    users: HashMap<u32, Identity>,
}

impl StaticResolver {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user; the builder form used by tests.
    #[must_use]
    pub fn with_user(mut self, uid: u32, identity: Identity) -> Self {
        self.users.insert(uid, identity);
        self
    }

    /// Adds a user.
    pub fn insert(&mut self, uid: u32, identity: Identity) {
        self.users.insert(uid, identity);
    }
}

impl IdentityResolver for StaticResolver {
    fn fetch(&self, uid: u32, _gid: u32, with_extended: bool) -> Result<Identity, IdentityError> {
        let mut id = self
            .users
            .get(&uid)
            .cloned()
            .ok_or(IdentityError::NotFound { uid })?;
        if !with_extended {
            id.home = None;
            id.shell = None;
        }
        Ok(id)
    }

    fn group_list(
        &self,
        uid: u32,
        gid: u32,
        _user_name: Option<&str>,
    ) -> Result<Vec<u32>, IdentityError> {
        Ok(self
            .users
            .get(&uid)
            .map_or_else(|| vec![gid], |id| id.gids.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_name: "alice".to_string(),
            primary_gid: 1000,
            gids: vec![1000, 2000, 3000],
            home: Some("/home/alice".to_string()),
            shell: Some("/bin/sh".to_string()),
        }
    }

    #[test]
    fn test_static_fetch_extended() {
        let resolver = StaticResolver::new().with_user(1000, alice());
        let id = resolver.fetch(1000, 1000, true).unwrap();
        assert_eq!(id.user_name, "alice");
        assert_eq!(id.home.as_deref(), Some("/home/alice"));
    }

    #[test]
    fn test_static_fetch_basic_strips_extended() {
        let resolver = StaticResolver::new().with_user(1000, alice());
        let id = resolver.fetch(1000, 1000, false).unwrap();
        assert_eq!(id.home, None);
        assert_eq!(id.shell, None);
        assert_eq!(id.gids, vec![1000, 2000, 3000]);
    }

    #[test]
    fn test_static_unknown_uid() {
        let resolver = StaticResolver::new();
        assert!(matches!(
            resolver.fetch(42, 42, false),
            Err(IdentityError::NotFound { uid: 42 })
        ));
    }

    #[test]
    fn test_static_group_list_falls_back_to_primary() {
        let resolver = StaticResolver::new();
        assert_eq!(resolver.group_list(42, 99, None).unwrap(), vec![99]);
    }

    #[test]
    fn test_system_resolver_current_user() {
        // Every build environment has an entry for the current uid.
        let uid = nix::unistd::getuid().as_raw();
        let gid = nix::unistd::getgid().as_raw();
        let resolver = SystemResolver;

        let id = resolver.fetch(uid, gid, false).unwrap();
        assert!(!id.user_name.is_empty());
        assert!(id.gids.contains(&gid));
        assert_eq!(id.home, None);

        let extended = resolver.fetch(uid, gid, true).unwrap();
        assert!(extended.home.is_some());
    }
}

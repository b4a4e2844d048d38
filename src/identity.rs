//! Caller identity.
//!
//! Every request header carries the uid, gid and pid of the caller that triggered it. They
//! are resolved once, when the operation context is created, and never re-read: a privilege
//! change while the operation is in flight cannot alter a request that was already issued.

use log::debug;
use nix::unistd::getgid;
use nix::unistd::getpid;
use nix::unistd::getuid;

use crate::status::NtStatus;

/// Which identity of a credential to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenClass {
    /// The user the credential acts for.
    User,
    /// The default owner of objects created with the credential.
    Owner,
    /// The primary group of the credential.
    PrimaryGroup,
}

/// Maps a caller's security credential to the numeric ids embedded in requests.
pub trait IdentityResolver {
    /// Opaque credential handle of the platform.
    type Credential: ?Sized;

    /// Resolve one identity of `credential` to a numeric id.
    fn resolve(&self, credential: &Self::Credential, class: TokenClass) -> Result<u32, NtStatus>;
}

/// Snapshot of the caller identity written into every request of one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallerIdentity {
    /// User id
    pub uid: u32,
    /// Group id
    pub gid: u32,
    /// Process id
    pub pid: u32,
}

impl CallerIdentity {
    /// Identity used for requests the driver issues on its own behalf (Init, Forget).
    pub const KERNEL: CallerIdentity = CallerIdentity {
        uid: 0,
        gid: 0,
        pid: 0,
    };

    /// Resolves uid and gid of `credential`; fails before any operation state exists.
    pub fn resolve<R: IdentityResolver>(
        resolver: &R,
        credential: &R::Credential,
        pid: u32,
    ) -> Result<Self, NtStatus> {
        let uid = resolver.resolve(credential, TokenClass::User)?;
        let gid = resolver.resolve(credential, TokenClass::PrimaryGroup)?;
        debug!("resolved caller uid {uid} gid {gid} pid {pid}");
        Ok(CallerIdentity { uid, gid, pid })
    }
}

/// Resolves the credentials of the current process.
///
/// The credential is the unit type; `Owner` resolves like `User`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessIdentity;

impl ProcessIdentity {
    /// Identity of the current process.
    pub fn current() -> CallerIdentity {
        CallerIdentity {
            uid: getuid().as_raw(),
            gid: getgid().as_raw(),
            pid: getpid().as_raw() as u32,
        }
    }
}

impl IdentityResolver for ProcessIdentity {
    type Credential = ();

    fn resolve(&self, _credential: &(), class: TokenClass) -> Result<u32, NtStatus> {
        Ok(match class {
            TokenClass::User | TokenClass::Owner => getuid().as_raw(),
            TokenClass::PrimaryGroup => getgid().as_raw(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Table;

    impl IdentityResolver for Table {
        type Credential = str;

        fn resolve(&self, credential: &str, class: TokenClass) -> Result<u32, NtStatus> {
            match (credential, class) {
                ("alice", TokenClass::User) => Ok(1000),
                ("alice", TokenClass::PrimaryGroup) => Ok(100),
                ("nogroup", TokenClass::User) => Ok(1001),
                _ => Err(NtStatus::INVALID_PARAMETER),
            }
        }
    }

    #[test]
    fn resolve_snapshot() {
        let id = CallerIdentity::resolve(&Table, "alice", 42).unwrap();
        assert_eq!(
            id,
            CallerIdentity {
                uid: 1000,
                gid: 100,
                pid: 42
            }
        );
    }

    #[test]
    fn resolve_failure_propagates() {
        assert_eq!(
            CallerIdentity::resolve(&Table, "nogroup", 1),
            Err(NtStatus::INVALID_PARAMETER)
        );
    }

    #[test]
    fn process_identity_matches_current() {
        let id = CallerIdentity::resolve(&ProcessIdentity, &(), 7).unwrap();
        let current = ProcessIdentity::current();
        assert_eq!(id.uid, current.uid);
        assert_eq!(id.gid, current.gid);
        assert_eq!(id.pid, 7);
    }
}

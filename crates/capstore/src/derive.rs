//! Capability mode derivation (spec.md §4.1, "Capability mode derivation").

use std::time::Duration;

use fusex_common::{AuthId, CapMode, Inode, QuotaSnapshot, Timestamp};

use crate::acl::{self, Acl};

const S_IRUSR: u32 = 0o400;
const S_IWUSR: u32 = 0o200;
const S_IXUSR: u32 = 0o100;
const S_IRGRP: u32 = 0o040;
const S_IWGRP: u32 = 0o020;
const S_IXGRP: u32 = 0o010;
const S_IROTH: u32 = 0o004;
const S_IWOTH: u32 = 0o002;
const S_IXOTH: u32 = 0o001;

pub const DEFAULT_LEASE: Duration = Duration::from_secs(300);
pub const MAX_LEASE: Duration = Duration::from_secs(7 * 24 * 3600);

/// The parent directory's metadata and ACL context, as the namespace store
/// presents it for cap derivation.
pub struct ParentContext<'a> {
    pub mode: u32,
    pub owner_uid: u32,
    pub owner_gid: u32,
    /// Already OR-combined per spec.md §9's "suspected typo" resolution
    /// (see [`crate::acl::Acl::from_sources`]).
    pub acl: Option<&'a Acl>,
    /// `sys.mask` octal mask, pre-translated to the capability bits it
    /// permits group/other grants to carry.
    pub mask: Option<CapMode>,
    /// `sys.owner.auth`: `None` (unset), `Some("*")`, or a comma-separated
    /// `scheme:principal` allow-list.
    pub owner_auth: Option<&'a str>,
    pub path_is_public: bool,
    pub quota: Option<QuotaSnapshot>,
}

/// The client's virtual identity for this request.
pub struct VirtualIdentity<'a> {
    pub uid: u32,
    pub gid: u32,
    pub sudoer: bool,
    pub auth_scheme: &'a str,
    pub principal: &'a str,
    /// Privileged identities bypass the public-subtree browse-only collapse
    /// (spec.md §4.1 step 7).
    pub privileged: bool,
}

#[derive(Clone, Debug)]
pub struct CapDerivation {
    pub mode: CapMode,
    pub uid: u32,
    pub gid: u32,
    pub vtime: Timestamp,
    pub authid: AuthId,
    pub quota: QuotaSnapshot,
}

/// Core algorithm of spec.md §4.1, steps 1-11. `lease_hint` is the client's
/// announced lease; `reuse_authid` lets [`crate::store::CapStore::issue`]
/// reuse an existing authid (e.g. for a refresh) instead of minting one.
#[allow(clippy::too_many_arguments)]
pub fn derive_cap_mode(
    parent: &ParentContext,
    identity: &VirtualIdentity,
    now: Timestamp,
    lease_hint: Option<Duration>,
    reuse_authid: Option<AuthId>,
) -> CapDerivation {
    let mode = if identity.uid == 0 {
        CapMode::ALL
    } else {
        compute_mode(parent, identity)
    };

    let (uid, gid) = effective_owner(parent, identity);

    let lease = lease_hint.unwrap_or(DEFAULT_LEASE).min(MAX_LEASE);
    let vtime = now + lease;

    let authid = reuse_authid.unwrap_or_else(new_authid);

    let quota = parent.quota.unwrap_or_else(QuotaSnapshot::unlimited);

    CapDerivation {
        mode,
        uid,
        gid,
        vtime,
        authid,
        quota,
    }
}

/// `ValidatePERM`'s fallback path (spec.md §4.4 "Capability validation"):
/// re-derive permission straight from the parent's mode/ACL without minting
/// or touching a cap, then test it against `required`.
pub fn evaluate_parent_permission(
    parent: &ParentContext,
    identity: &VirtualIdentity,
    required: CapMode,
) -> bool {
    let mode = if identity.uid == 0 {
        CapMode::ALL
    } else {
        compute_mode(parent, identity)
    };
    mode.contains(required)
}

fn compute_mode(parent: &ParentContext, identity: &VirtualIdentity) -> CapMode {
    // spec.md: "mode := dir.mode & S_IFDIR" — in the source this recycles a
    // POSIX-mode scratch variable that, for the capability-bit encoding used
    // here, never contributes a meaningful bit. Starting from empty is the
    // faithful translation.
    let mut mode = CapMode::empty();

    if identity.sudoer {
        mode.insert(CapMode::SUDOER_EXTRA);
    }

    if identity.uid == parent.owner_uid {
        apply_bits(
            &mut mode,
            parent.mode,
            S_IRUSR,
            S_IWUSR,
            S_IXUSR,
            parent.mask,
            true,
        );
    }
    if identity.gid == parent.owner_gid {
        apply_bits(
            &mut mode,
            parent.mode,
            S_IRGRP,
            S_IWGRP,
            S_IXGRP,
            parent.mask,
            false,
        );
    }
    apply_bits(
        &mut mode,
        parent.mode,
        S_IROTH,
        S_IWOTH,
        S_IXOTH,
        parent.mask,
        false,
    );

    if let Some(acl) = parent.acl {
        acl::evaluate(acl, identity, parent.owner_uid, &mut mode);
    }

    if !parent.path_is_public && !identity.privileged {
        mode &= CapMode::BROWSE_ONLY;
    }

    mode
}

/// Apply one of owner/group/other's r/w/x bits. `mask_execute_only` is true
/// for the owner line, where spec.md only calls out the execute grant as
/// masked; group/other mask every grant from that line.
fn apply_bits(
    mode: &mut CapMode,
    dir_mode: u32,
    r_bit: u32,
    w_bit: u32,
    x_bit: u32,
    mask: Option<CapMode>,
    mask_execute_only: bool,
) {
    let mut grant = CapMode::empty();
    if dir_mode & r_bit != 0 {
        grant.insert(CapMode::READ_GRANT);
    }
    if dir_mode & w_bit != 0 {
        grant.insert(CapMode::MUTATE);
    }
    let mut execute_grant = CapMode::empty();
    if dir_mode & x_bit != 0 {
        execute_grant.insert(CapMode::EXECUTE);
    }

    if let Some(mask) = mask {
        if mask_execute_only {
            execute_grant &= mask;
        } else {
            grant &= mask;
            execute_grant &= mask;
        }
    }

    mode.insert(grant);
    mode.insert(execute_grant);
}

/// spec.md §4.1 step 8.
fn effective_owner(parent: &ParentContext, identity: &VirtualIdentity) -> (u32, u32) {
    match parent.owner_auth {
        Some("*") => (parent.owner_uid, parent.owner_gid),
        Some(list) => {
            let key = format!("{}:{}", identity.auth_scheme, identity.principal);
            if list.split(',').any(|entry| entry == key) {
                (parent.owner_uid, parent.owner_gid)
            } else {
                (identity.uid, identity.gid)
            }
        }
        None => (identity.uid, identity.gid),
    }
}

fn new_authid() -> AuthId {
    AuthId::from(uuid::Uuid::new_v4().to_simple().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parent(mode: u32) -> ParentContext<'static> {
        ParentContext {
            mode,
            owner_uid: 1000,
            owner_gid: 1000,
            acl: None,
            mask: None,
            owner_auth: None,
            path_is_public: true,
            quota: None,
        }
    }

    fn identity(uid: u32) -> VirtualIdentity<'static> {
        VirtualIdentity {
            uid,
            gid: 2000,
            sudoer: false,
            auth_scheme: "krb5",
            principal: "bob",
            privileged: false,
        }
    }

    #[test]
    fn evaluate_parent_permission_matches_derive_cap_mode() {
        assert!(evaluate_parent_permission(
            &parent(0o755),
            &identity(1000),
            CapMode::WRITE
        ));
        assert!(!evaluate_parent_permission(
            &parent(0o500),
            &identity(1000),
            CapMode::WRITE
        ));
    }

    #[test]
    fn root_gets_full_mode() {
        let d = derive_cap_mode(&parent(0o755), &identity(0), Timestamp::ZERO, None, None);
        assert_eq!(d.mode, CapMode::ALL);
    }

    #[test]
    fn owner_full_bits_grant_read_execute_and_write() {
        // 0755: owner rwx, group rx, other rx
        let d = derive_cap_mode(&parent(0o755), &identity(1000), Timestamp::ZERO, None, None);
        assert!(d.mode.contains(CapMode::READ));
        assert!(d.mode.contains(CapMode::EXECUTE));
        assert!(d.mode.contains(CapMode::WRITE));
    }

    #[test]
    fn owner_read_only_directory_does_not_grant_write() {
        // 0500: owner r-x, no write bit
        let d = derive_cap_mode(&parent(0o500), &identity(1000), Timestamp::ZERO, None, None);
        assert!(d.mode.contains(CapMode::READ));
        assert!(!d.mode.contains(CapMode::WRITE));
    }

    #[test]
    fn stranger_on_public_tree_gets_other_bits_only() {
        // 0751: owner rwx, group rx, other x
        let mut ctx = parent(0o751);
        ctx.owner_uid = 5;
        ctx.owner_gid = 5;
        let d = derive_cap_mode(&ctx, &identity(1001), Timestamp::ZERO, None, None);
        assert_eq!(d.mode, CapMode::EXECUTE);
    }

    #[test]
    fn non_public_subtree_collapses_to_browse_only() {
        let mut ctx = parent(0o777);
        ctx.owner_uid = 5;
        ctx.owner_gid = 5;
        ctx.path_is_public = false;
        let d = derive_cap_mode(&ctx, &identity(1001), Timestamp::ZERO, None, None);
        assert_eq!(d.mode, CapMode::BROWSE_ONLY);
    }

    #[test]
    fn privileged_identity_bypasses_collapse() {
        let mut ctx = parent(0o777);
        ctx.owner_uid = 5;
        ctx.owner_gid = 5;
        ctx.path_is_public = false;
        let mut id = identity(1001);
        id.privileged = true;
        let d = derive_cap_mode(&ctx, &id, Timestamp::ZERO, None, None);
        assert!(d.mode.contains(CapMode::WRITE));
    }

    #[test]
    fn lease_is_clamped_to_one_week() {
        let d = derive_cap_mode(
            &parent(0o755),
            &identity(0),
            Timestamp::new(1_000, 0),
            Some(Duration::from_secs(999_999_999)),
            None,
        );
        assert_eq!(d.vtime, Timestamp::new(1_000, 0) + MAX_LEASE);
    }

    #[test]
    fn default_lease_is_300_seconds() {
        let d = derive_cap_mode(&parent(0o755), &identity(0), Timestamp::new(0, 0), None, None);
        assert_eq!(d.vtime, Timestamp::new(300, 0));
    }

    #[test]
    fn owner_auth_star_reowns_to_directory_owner() {
        let mut ctx = parent(0o755);
        ctx.owner_auth = Some("*");
        let d = derive_cap_mode(&ctx, &identity(1001), Timestamp::ZERO, None, None);
        assert_eq!((d.uid, d.gid), (1000, 1000));
    }

    #[test]
    fn owner_auth_list_matches_scheme_principal() {
        let mut ctx = parent(0o755);
        ctx.owner_auth = Some("unix:root,krb5:bob");
        let d = derive_cap_mode(&ctx, &identity(1001), Timestamp::ZERO, None, None);
        assert_eq!((d.uid, d.gid), (1000, 1000));
    }

    #[test]
    fn owner_auth_list_miss_keeps_client_identity() {
        let mut ctx = parent(0o755);
        ctx.owner_auth = Some("unix:root");
        let d = derive_cap_mode(&ctx, &identity(1001), Timestamp::ZERO, None, None);
        assert_eq!((d.uid, d.gid), (1001, 2000));
    }
}

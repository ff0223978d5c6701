//! `ValidateCAP` / `ValidatePERM` (spec.md §4.4 "Capability validation"):
//! prefer an already-issued cap; fall back to re-deriving permission from
//! the parent ACL/mode when the cap is missing, mismatched, underpowered,
//! or about to expire.

use std::sync::Arc;
use std::time::Duration;

use fusex_capstore::{evaluate_parent_permission, Cap, CapStore, ParentContext, VirtualIdentity};
use fusex_common::{AuthId, CapMode, Errno, Inode, Timestamp};

/// Caps within this margin of expiry are treated as already expired, so a
/// client doesn't race a write against its own lease running out mid-flight
/// (spec.md §4.4: "`cap.vtime` at most 60 seconds out").
pub const EXPIRY_GRACE: Duration = Duration::from_secs(60);

/// `ValidateCAP(authid, md, required)`, falling back to `ValidatePERM` on
/// any of the four rejection reasons spec.md §4.4 lists. Returns the valid
/// cap when one exists, or `None` when the caller must proceed on bare
/// permission (no cap to attach/renew).
pub fn validate_cap(
    caps: &CapStore,
    authid: &AuthId,
    md_inode: Inode,
    md_parent_inode: Inode,
    required: CapMode,
    now: Timestamp,
    parent: &ParentContext,
    identity: &VirtualIdentity,
) -> Result<Option<Arc<Cap>>, Errno> {
    match validate_cap_only(caps, authid, md_inode, md_parent_inode, required, now) {
        Ok(cap) => Ok(Some(cap)),
        Err(_) => {
            if evaluate_parent_permission(parent, identity, required) {
                Ok(None)
            } else {
                Err(Errno::Eperm)
            }
        }
    }
}

/// The cap-only half of `ValidateCAP`, broken out so callers that must
/// distinguish the four specific failure reasons (tests, diagnostics) can
/// see them before the `ValidatePERM` fallback collapses them to `EPERM`.
pub fn validate_cap_only(
    caps: &CapStore,
    authid: &AuthId,
    md_inode: Inode,
    md_parent_inode: Inode,
    required: CapMode,
    now: Timestamp,
) -> Result<Arc<Cap>, Errno> {
    let cap = caps.get(authid, false).ok_or(Errno::Enoent)?;

    if cap.inode != md_inode && cap.inode != md_parent_inode {
        return Err(Errno::Einval);
    }
    if !cap.mode.contains(required) {
        return Err(Errno::Eperm);
    }
    if cap.vtime <= now + EXPIRY_GRACE {
        return Err(Errno::Etimedout);
    }
    Ok(cap)
}

//! Parent-directory ACL evaluation (spec.md §4.1 step 6).
//!
//! spec.md §9's "Open question" flags a suspected typo in the source's ACL
//! presence check — `if (sysacl.length() || useracl.length(), shareacl.length())`
//! — and directs treating it as a logical OR of all three non-empty checks.
//! That decision is pushed up to the caller: [`Acl::from_sources`] is the
//! single place that decides "is there an ACL to evaluate at all", by OR-ing
//! the three raw attribute strings' non-emptiness before parsing any of
//! them.

use fusex_common::CapMode;

use crate::derive::VirtualIdentity;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AclSubject {
    Uid(u32),
    Gid(u32),
    /// `scheme:principal`, matched against the client's own auth identity.
    AuthKey(String, String),
    Everyone,
}

#[derive(Clone, Debug, Default)]
pub struct AclEntry {
    pub subject: Option<AclSubject>,
    pub allow: CapMode,
    pub deny: CapMode,
    /// The inode this ACL protects is immutable: write/update/delete/
    /// set-xattr/chmod are cleared regardless of other grants.
    pub immutable: bool,
    /// A write-once grant: `update` is excluded even if otherwise granted.
    pub write_once: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Acl {
    pub entries: Vec<AclEntry>,
}

impl Acl {
    /// Build a merged ACL only if at least one of the three sources is
    /// non-empty (the OR-of-three-lengths resolution above). `parse_source`
    /// is applied independently to each non-empty source and concatenated,
    /// matching the source evaluating sysacl, then useracl, then shareacl
    /// in sequence.
    pub fn from_sources(sysacl: &str, useracl: &str, shareacl: &str) -> Option<Acl> {
        if sysacl.is_empty() && useracl.is_empty() && shareacl.is_empty() {
            return None;
        }
        let mut entries = Vec::new();
        for src in [sysacl, useracl, shareacl] {
            if !src.is_empty() {
                entries.extend(parse_acl_string(src));
            }
        }
        Some(Acl { entries })
    }
}

/// Parses a comma-separated ACL rule list. Each rule is
/// `subject:permissions`, where `subject` is `u:<uid>`, `g:<gid>`,
/// `k:<scheme>:<principal>`, or `*` for everyone, and `permissions` is a
/// string of single-letter flags: `r` read, `w` write+update, `d` delete,
/// `m` chmod, `c` chown, `x` execute, `q` set-xattr, `t` set-utime (the
/// `update`-bearing flags also carry a leading `!` for an explicit denial,
/// `i` marks the ACL immutable, `o` marks it write-once).
fn parse_acl_string(src: &str) -> Vec<AclEntry> {
    src.split(',')
        .filter_map(|rule| rule.split_once(':').map(|(subj, perms)| (subj, perms)))
        .filter_map(|(subj, perms)| {
            let subject = parse_subject(subj)?;
            let (allow, deny, immutable, write_once) = parse_permissions(perms);
            Some(AclEntry {
                subject: Some(subject),
                allow,
                deny,
                immutable,
                write_once,
            })
        })
        .collect()
}

fn parse_subject(raw: &str) -> Option<AclSubject> {
    if raw == "*" {
        return Some(AclSubject::Everyone);
    }
    let mut parts = raw.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("u"), Some(uid), None) => uid.parse().ok().map(AclSubject::Uid),
        (Some("g"), Some(gid), None) => gid.parse().ok().map(AclSubject::Gid),
        (Some("k"), Some(scheme), Some(principal)) => {
            Some(AclSubject::AuthKey(scheme.to_string(), principal.to_string()))
        }
        _ => None,
    }
}

fn parse_permissions(perms: &str) -> (CapMode, CapMode, bool, bool) {
    let mut allow = CapMode::empty();
    let mut deny = CapMode::empty();
    let mut immutable = false;
    let mut write_once = false;
    let mut denying = false;
    for ch in perms.chars() {
        match ch {
            '!' => denying = true,
            'i' => immutable = true,
            'o' => write_once = true,
            _ => {
                if let Some(bit) = flag_to_mode(ch) {
                    if denying {
                        deny |= bit;
                    } else {
                        allow |= bit;
                    }
                }
                denying = false;
            }
        }
    }
    (allow, deny, immutable, write_once)
}

fn flag_to_mode(ch: char) -> Option<CapMode> {
    match ch {
        'r' => Some(CapMode::READ),
        'w' => Some(CapMode::WRITE | CapMode::UPDATE),
        'd' => Some(CapMode::DELETE),
        'm' => Some(CapMode::CHMOD),
        'c' => Some(CapMode::CHOWN),
        'x' => Some(CapMode::EXECUTE),
        'q' => Some(CapMode::SET_XATTR),
        't' => Some(CapMode::SET_UTIME),
        _ => None,
    }
}

fn subject_matches(subject: &AclSubject, identity: &VirtualIdentity) -> bool {
    match subject {
        AclSubject::Uid(uid) => *uid == identity.uid,
        AclSubject::Gid(gid) => *gid == identity.gid,
        AclSubject::AuthKey(scheme, principal) => {
            scheme == identity.auth_scheme && principal == identity.principal
        }
        AclSubject::Everyone => true,
    }
}

/// Evaluate `acl` against `identity`, mutating `mode` in place per spec.md
/// §4.1 step 6. `owner_uid` is consulted so a deny-delete rule still leaves
/// the owner able to delete.
pub fn evaluate(acl: &Acl, identity: &VirtualIdentity, owner_uid: u32, mode: &mut CapMode) {
    let mut immutable = false;
    let mut write_once = false;
    let mut denied_delete = false;

    for entry in &acl.entries {
        let matches = match &entry.subject {
            Some(subject) => subject_matches(subject, identity),
            None => false,
        };
        if !matches {
            continue;
        }
        mode.insert(entry.allow);
        mode.remove(entry.deny);
        if entry.deny.contains(CapMode::DELETE) {
            denied_delete = true;
        }
        immutable |= entry.immutable;
        write_once |= entry.write_once;
    }

    if denied_delete && identity.uid == owner_uid {
        mode.insert(CapMode::DELETE);
    }
    if immutable {
        mode.remove(
            CapMode::WRITE | CapMode::UPDATE | CapMode::DELETE | CapMode::SET_XATTR | CapMode::CHMOD,
        );
    }
    if write_once {
        mode.remove(CapMode::UPDATE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(uid: u32) -> VirtualIdentity<'static> {
        VirtualIdentity {
            uid,
            gid: 100,
            sudoer: false,
            auth_scheme: "krb5",
            principal: "alice",
            privileged: false,
        }
    }

    #[test]
    fn grant_adds_bits() {
        let acl = Acl::from_sources("u:1000:rw", "", "").unwrap();
        let mut mode = CapMode::empty();
        evaluate(&acl, &identity(1000), 1000, &mut mode);
        assert!(mode.contains(CapMode::READ | CapMode::WRITE | CapMode::UPDATE));
    }

    #[test]
    fn deny_delete_still_allows_owner() {
        let acl = Acl::from_sources("*:rwd!d", "", "").unwrap();
        let mut mode = CapMode::DELETE;
        evaluate(&acl, &identity(1000), 1000, &mut mode);
        assert!(mode.contains(CapMode::DELETE));
    }

    #[test]
    fn deny_delete_removes_for_non_owner() {
        let acl = Acl::from_sources("*:rwd!d", "", "").unwrap();
        let mut mode = CapMode::DELETE;
        evaluate(&acl, &identity(1001), 1000, &mut mode);
        assert!(!mode.contains(CapMode::DELETE));
    }

    #[test]
    fn immutable_clears_mutation_bits() {
        let acl = Acl::from_sources("*:rwdi", "", "").unwrap();
        let mut mode = CapMode::empty();
        evaluate(&acl, &identity(1000), 1000, &mut mode);
        assert_eq!(mode, CapMode::READ);
    }

    #[test]
    fn write_once_excludes_update() {
        let acl = Acl::from_sources("*:wo", "", "").unwrap();
        let mut mode = CapMode::empty();
        evaluate(&acl, &identity(1000), 1000, &mut mode);
        assert!(mode.contains(CapMode::WRITE));
        assert!(!mode.contains(CapMode::UPDATE));
    }

    #[test]
    fn any_nonempty_source_triggers_evaluation() {
        assert!(Acl::from_sources("", "", "").is_none());
        assert!(Acl::from_sources("", "u:1:r", "").is_some());
        assert!(Acl::from_sources("", "", "u:1:r").is_some());
    }
}

//! Non-leaking helpers shared by the handlers: building a
//! [`ParentContext`]/[`VirtualIdentity`] pair from an [`EntryMetadata`]
//! without ever allocating past the request's own stack frame.

use fusex_capstore::{Acl, ParentContext, VirtualIdentity};
use fusex_common::collaborators::EntryMetadata;
use fusex_common::{CapMode, QuotaSnapshot};

/// Owned scratch the borrowed [`ParentContext`] is built over. Kept in one
/// struct so a handler can hold it in a local and borrow from it for the
/// lifetime of one `ValidateCAP`/`ValidatePERM` call.
pub struct ParentScratch {
    acl: Option<Acl>,
}

impl ParentScratch {
    pub fn from_entry(entry: &EntryMetadata) -> Self {
        Self {
            acl: Acl::from_sources(
                entry.attr("sys.acl").unwrap_or(""),
                entry.attr("user.acl").unwrap_or(""),
                entry.attr("share.acl").unwrap_or(""),
            ),
        }
    }

    pub fn context<'a>(&'a self, entry: &'a EntryMetadata, quota: QuotaSnapshot) -> ParentContext<'a> {
        ParentContext {
            mode: entry.mode,
            owner_uid: entry.uid,
            owner_gid: entry.gid,
            acl: self.acl.as_ref(),
            mask: entry.attr("sys.mask").and_then(parse_octal_mask),
            owner_auth: entry.attr("sys.owner.auth"),
            path_is_public: entry.attr("sys.public") != Some("0"),
            quota: Some(quota),
        }
    }
}

fn parse_octal_mask(raw: &str) -> Option<CapMode> {
    u32::from_str_radix(raw.trim_start_matches("0o"), 8)
        .ok()
        .map(CapMode::from_bits_truncate)
}

/// `uid`/`gid` is all the wire carries about a requester's identity (no
/// separate auth-scheme/principal credential field exists on [`Request`];
/// see `DESIGN.md`'s open-question note). `principal` is synthesized from
/// `uid` so ACL `k:scheme:principal` entries and `owner_auth` allow-lists
/// still have something stable to match against.
pub struct IdentityScratch {
    principal: String,
}

impl IdentityScratch {
    pub fn new(uid: u32) -> Self {
        Self {
            principal: uid.to_string(),
        }
    }

    pub fn identity(&self, uid: u32, gid: u32) -> VirtualIdentity<'_> {
        VirtualIdentity {
            uid,
            gid,
            sudoer: uid == 0,
            auth_scheme: "uid",
            principal: &self.principal,
            privileged: uid == 0,
        }
    }
}

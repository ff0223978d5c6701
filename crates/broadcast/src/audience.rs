//! Audience selection over a capability's inode index (spec.md §4.3
//! "Audience selection").

use std::collections::HashSet;
use std::sync::Arc;

use fusex_capstore::Cap;
use fusex_common::{AuthId, ClientUuid};
use log::warn;
use regex::Regex;

#[derive(Debug, Default)]
pub struct AudienceResult {
    pub recipients: Vec<Arc<Cap>>,
    pub suppressed: usize,
}

/// Filters `candidates` (typically `CapStore::caps_for_inode`) down to the
/// peers that should receive a notification about the reference cap's
/// inode, per spec.md §4.3.
///
/// `dedupe_by_uuid` should be `true` for metadata-update broadcasts only
/// ("each UUID receives at most one update per broadcast"); release/delete/
/// refresh broadcasts leave every candidate cap addressed individually.
pub fn select_audience(
    candidates: Vec<Arc<Cap>>,
    reference_authid: &AuthId,
    reference_clientuuid: &ClientUuid,
    originating_uuid: &ClientUuid,
    suppression_threshold: usize,
    suppression_pattern: Option<&str>,
    dedupe_by_uuid: bool,
) -> AudienceResult {
    let mut candidates: Vec<Arc<Cap>> = candidates
        .into_iter()
        .filter(|cap| &cap.authid != reference_authid)
        .filter(|cap| &cap.clientuuid != reference_clientuuid)
        .filter(|cap| &cap.clientuuid != originating_uuid)
        .collect();

    let mut suppressed = 0;
    if candidates.len() > suppression_threshold {
        if let Some(pattern) = suppression_pattern {
            match Regex::new(pattern) {
                Ok(re) => {
                    let before = candidates.len();
                    candidates.retain(|cap| !re.is_match(cap.clientid.as_str()));
                    suppressed = before - candidates.len();
                }
                Err(err) => {
                    warn!(
                        "broadcast suppression pattern {pattern:?} failed to compile ({err}); \
                         suppression disabled for this broadcast"
                    );
                }
            }
        }
    }

    if dedupe_by_uuid {
        let mut seen = HashSet::new();
        candidates.retain(|cap| seen.insert(cap.clientuuid.clone()));
    }

    AudienceResult {
        recipients: candidates,
        suppressed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusex_common::{CapMode, Inode, QuotaSnapshot, Timestamp};

    fn cap(authid: &str, clientid: &str, clientuuid: &str) -> Arc<Cap> {
        Arc::new(Cap {
            authid: authid.into(),
            inode: Inode(0x100),
            clientid: clientid.into(),
            clientuuid: clientuuid.into(),
            uid: 1000,
            gid: 1000,
            mode: CapMode::READ,
            vtime: Timestamp::ZERO,
            quota: QuotaSnapshot::unlimited(),
            max_file_size: 0,
            errc: 0,
        })
    }

    #[test]
    fn drops_reference_and_same_uuid_and_originator() {
        let candidates = vec![
            cap("self", "c0", "u0"),
            cap("other-mount", "c0b", "u0"),
            cap("originator", "c-orig", "u-orig"),
            cap("peer", "c1", "u1"),
        ];
        let result = select_audience(
            candidates,
            &"self".into(),
            &"u0".into(),
            &"u-orig".into(),
            100,
            None,
            false,
        );
        assert_eq!(result.recipients.len(), 1);
        assert_eq!(result.recipients[0].authid, AuthId::from("peer"));
    }

    #[test]
    fn suppression_applies_only_above_threshold() {
        let candidates = vec![cap("a", "match-me", "u1"), cap("b", "keep-me", "u2")];
        let below = select_audience(
            candidates.clone(),
            &"ref".into(),
            &"u0".into(),
            &"u-orig".into(),
            10,
            Some("^match-"),
            false,
        );
        assert_eq!(below.recipients.len(), 2);

        let above = select_audience(
            candidates,
            &"ref".into(),
            &"u0".into(),
            &"u-orig".into(),
            1,
            Some("^match-"),
            false,
        );
        assert_eq!(above.recipients.len(), 1);
        assert_eq!(above.suppressed, 1);
    }

    #[test]
    fn bad_regex_disables_suppression_instead_of_failing() {
        let candidates = vec![cap("a", "c1", "u1"), cap("b", "c2", "u2")];
        let result = select_audience(
            candidates,
            &"ref".into(),
            &"u0".into(),
            &"u-orig".into(),
            1,
            Some("("),
            false,
        );
        assert_eq!(result.recipients.len(), 2);
        assert_eq!(result.suppressed, 0);
    }

    #[test]
    fn dedupe_by_uuid_keeps_one_recipient_per_uuid() {
        let candidates = vec![
            cap("a", "c1", "u1"),
            cap("b", "c1-other-mount", "u1"),
            cap("c", "c2", "u2"),
        ];
        let result = select_audience(
            candidates,
            &"ref".into(),
            &"u0".into(),
            &"u-orig".into(),
            100,
            None,
            true,
        );
        assert_eq!(result.recipients.len(), 2);
    }
}

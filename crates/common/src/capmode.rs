//! Capability-local mode bits (spec.md §3 "Capability mode bits" — distinct
//! from POSIX file mode bits).

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Default, Deserialize, Serialize)]
    pub struct CapMode: u32 {
        const READ       = 0b0000_0001;
        const WRITE      = 0b0000_0010;
        const UPDATE     = 0b0000_0100;
        const DELETE     = 0b0000_1000;
        const CHMOD      = 0b0001_0000;
        const CHOWN      = 0b0010_0000;
        const SET_XATTR  = 0b0100_0000;
        const SET_UTIME  = 0b1000_0000;
        const EXECUTE    = 0b1_0000_0000;

        /// The "browse-only" collapse target (spec.md §4.1 step 7).
        const BROWSE_ONLY = Self::EXECUTE.bits;

        /// The bits granted to `uid == 0` (spec.md §4.1 step 1).
        const ALL = Self::READ.bits
            | Self::WRITE.bits
            | Self::UPDATE.bits
            | Self::DELETE.bits
            | Self::CHMOD.bits
            | Self::CHOWN.bits
            | Self::SET_XATTR.bits
            | Self::SET_UTIME.bits
            | Self::EXECUTE.bits;

        /// The bits a sudoer is additionally granted (spec.md §4.1 step 2).
        const SUDOER_EXTRA = Self::CHOWN.bits
            | Self::CHMOD.bits
            | Self::WRITE.bits
            | Self::UPDATE.bits
            | Self::DELETE.bits
            | Self::SET_XATTR.bits
            | Self::SET_UTIME.bits;

        /// The full mutate set granted by an owner/group/other write bit.
        const MUTATE = Self::WRITE.bits
            | Self::UPDATE.bits
            | Self::DELETE.bits
            | Self::CHOWN.bits
            | Self::SET_XATTR.bits
            | Self::SET_UTIME.bits;

        /// What an owner/group/other read bit grants.
        const READ_GRANT = Self::READ.bits | Self::CHMOD.bits | Self::SET_UTIME.bits;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn browse_only_collapse_keeps_execute() {
        let mode = CapMode::ALL;
        let collapsed = mode & CapMode::BROWSE_ONLY;
        assert_eq!(collapsed, CapMode::EXECUTE);
    }
}

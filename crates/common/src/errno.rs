//! The POSIX errno surface exposed at the wire (spec.md §6/§7).

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    AsRefStr, Clone, Copy, Debug, Deserialize, Display, EnumString, Eq, Hash, PartialEq, Serialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Errno {
    Enoent,
    Einval,
    Eperm,
    Eacces,
    Eexist,
    Enotempty,
    Edquot,
    Etimedout,
    El2nsync,
    Enametoolong,
    Enospc,
    Erange,
    Eio,
}

impl Errno {
    /// The raw numeric value a POSIX client expects, matching the platform
    /// libc constants these names stand for.
    pub fn raw(self) -> i32 {
        match self {
            Errno::Enoent => 2,
            Errno::Eio => 5,
            Errno::Eacces => 13,
            Errno::Eexist => 17,
            Errno::Einval => 22,
            Errno::Enametoolong => 36,
            Errno::Enotempty => 39,
            Errno::Erange => 34,
            Errno::Edquot => 122,
            Errno::Etimedout => 110,
            Errno::El2nsync => 45,
            Errno::Enospc => 28,
            Errno::Eperm => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_spelling() {
        assert_eq!(Errno::Enotempty.to_string(), "ENOTEMPTY");
        assert_eq!(Errno::El2nsync.to_string(), "EL2NSYNC");
    }
}

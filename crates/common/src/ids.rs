//! Identifier newtypes (spec.md §3 "Identifiers").

use std::fmt;

use serde::{Deserialize, Serialize};

/// 64-bit opaque inode identifier. The low bit distinguishes file inodes
/// (`1`) from container/directory inodes (`0`).
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Inode(pub u64);

impl Inode {
    pub const ZERO: Inode = Inode(0);

    /// `true` if this inode names a regular file (low bit set).
    pub fn is_file(self) -> bool {
        self.0 & 1 == 1
    }

    /// `true` if this inode names a directory (low bit clear, non-zero).
    pub fn is_container(self) -> bool {
        self.0 != 0 && self.0 & 1 == 0
    }
}

impl fmt::Display for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<u64> for Inode {
    fn from(v: u64) -> Self {
        Inode(v)
    }
}

macro_rules! string_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(v: String) -> Self {
                $name(v)
            }
        }

        impl From<&str> for $name {
            fn from(v: &str) -> Self {
                $name(v.to_string())
            }
        }
    };
}

string_id!(ClientId, "Stable tag for a mounted client session.");
string_id!(
    ClientUuid,
    "Stable tag for a client instance; several ClientIds may share one."
);
string_id!(AuthId, "Primary key of an issued capability.");
string_id!(ReqId, "Correlation token echoed back to the client.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inode_parity_classifies_kind() {
        assert!(Inode(0x101).is_file());
        assert!(!Inode(0x101).is_container());
        assert!(Inode(0x100).is_container());
        assert!(!Inode::ZERO.is_container());
    }
}

//! Build outcomes and the flags that steer a traversal.

use std::fmt;

/// The outcome of running one phase of one node, or of a whole traversal.
///
/// Variants are ordered; combining two results keeps the "worse" one, so a
/// single failure anywhere in a batch makes the whole batch fail.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(u8)]
pub enum BuildResult {
    #[default]
    Unbuilt = 0,
    UpToDate = 1,
    Built = 2,
    Failed = 3,
}

impl BuildResult {
    pub fn combine(self, other: BuildResult) -> BuildResult {
        std::cmp::max(self, other)
    }

    pub fn is_failed(self) -> bool {
        self == BuildResult::Failed
    }

    pub(crate) fn from_u8(v: u8) -> BuildResult {
        match v {
            0 => BuildResult::Unbuilt,
            1 => BuildResult::UpToDate,
            2 => BuildResult::Built,
            _ => BuildResult::Failed,
        }
    }
}

impl fmt::Display for BuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BuildResult::Unbuilt => "unbuilt",
            BuildResult::UpToDate => "up to date",
            BuildResult::Built => "built",
            BuildResult::Failed => "failed",
        })
    }
}

impl std::iter::FromIterator<BuildResult> for BuildResult {
    fn from_iter<I: IntoIterator<Item = BuildResult>>(iter: I) -> Self {
        iter.into_iter()
            .fold(BuildResult::Unbuilt, BuildResult::combine)
    }
}

/// Bitmask of options for a single Scan/Build/Clean call.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct BuildFlags(u32);

impl BuildFlags {
    pub const NONE: BuildFlags = BuildFlags(0);
    /// Run Process even on nodes that report being up to date.
    pub const REBUILD: BuildFlags = BuildFlags(1);
    pub const CACHE_READ: BuildFlags = BuildFlags(2);
    pub const CACHE_WRITE: BuildFlags = BuildFlags(4);
    /// Report what would run, without spawning commands or deleting files.
    pub const DRY_RUN: BuildFlags = BuildFlags(8);
    /// Stop dispatching new work below a node once a failure is seen.
    pub const STOP_ON_ERROR: BuildFlags = BuildFlags(16);
    pub const VERBOSE: BuildFlags = BuildFlags(32);
    pub const CACHE: BuildFlags = BuildFlags(2 | 4);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BuildFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: BuildFlags) -> BuildFlags {
        BuildFlags(self.0 | other.0)
    }

    pub fn without(self, other: BuildFlags) -> BuildFlags {
        BuildFlags(self.0 & !other.0)
    }
}

impl Default for BuildFlags {
    fn default() -> Self {
        BuildFlags::CACHE
    }
}

impl std::ops::BitOr for BuildFlags {
    type Output = BuildFlags;
    fn bitor(self, rhs: BuildFlags) -> BuildFlags {
        self.with(rhs)
    }
}

impl std::ops::BitOrAssign for BuildFlags {
    fn bitor_assign(&mut self, rhs: BuildFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BuildFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(BuildFlags, &str); 6] = [
            (BuildFlags::REBUILD, "REBUILD"),
            (BuildFlags::CACHE_READ, "CACHE_READ"),
            (BuildFlags::CACHE_WRITE, "CACHE_WRITE"),
            (BuildFlags::DRY_RUN, "DRY_RUN"),
            (BuildFlags::STOP_ON_ERROR, "STOP_ON_ERROR"),
            (BuildFlags::VERBOSE, "VERBOSE"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "BuildFlags(NONE)")
        } else {
            write!(f, "BuildFlags({})", set.join(" | "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BuildResult; 4] = [
        BuildResult::Unbuilt,
        BuildResult::UpToDate,
        BuildResult::Built,
        BuildResult::Failed,
    ];

    #[test]
    fn combine_keeps_worst() {
        assert_eq!(
            BuildResult::UpToDate.combine(BuildResult::Built),
            BuildResult::Built
        );
        assert_eq!(
            BuildResult::Built.combine(BuildResult::Failed),
            BuildResult::Failed
        );
        assert_eq!(
            BuildResult::Unbuilt.combine(BuildResult::UpToDate),
            BuildResult::UpToDate
        );
    }

    #[test]
    fn combine_laws() {
        for &a in &ALL {
            assert_eq!(a.combine(BuildResult::Unbuilt), a);
            for &b in &ALL {
                assert_eq!(a.combine(b), b.combine(a));
                for &c in &ALL {
                    assert_eq!(a.combine(b).combine(c), a.combine(b.combine(c)));
                }
            }
        }
    }

    #[test]
    fn u8_repr() {
        for &r in &ALL {
            assert_eq!(BuildResult::from_u8(r as u8), r);
        }
    }

    #[test]
    fn collect() {
        let r: BuildResult = vec![BuildResult::UpToDate, BuildResult::Built]
            .into_iter()
            .collect();
        assert_eq!(r, BuildResult::Built);
        let empty: BuildResult = std::iter::empty().collect();
        assert_eq!(empty, BuildResult::Unbuilt);
    }

    #[test]
    fn flag_values() {
        assert_eq!(BuildFlags::REBUILD.bits(), 1);
        assert_eq!(BuildFlags::CACHE.bits(), 6);
        assert_eq!(BuildFlags::STOP_ON_ERROR.bits(), 16);
        assert_eq!(BuildFlags::VERBOSE.bits(), 32);
        assert_eq!(BuildFlags::default(), BuildFlags::CACHE);
        let f = BuildFlags::default() | BuildFlags::DRY_RUN;
        assert!(f.contains(BuildFlags::CACHE_READ));
        assert!(f.contains(BuildFlags::DRY_RUN));
        assert!(!f.without(BuildFlags::CACHE).contains(BuildFlags::CACHE_WRITE));
        assert_eq!(format!("{:?}", BuildFlags::NONE), "BuildFlags(NONE)");
    }
}

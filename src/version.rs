//! Semantic version identifiers and their ordering.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use snafu::{ResultExt, Snafu, ensure};

#[derive(Debug, Snafu)]
pub enum VersionError {
    #[snafu(display("Version identifier is empty"))]
    Empty,
    #[snafu(display("Malformed version identifier {:?}: {}", input, source))]
    Malformed {
        input: String,
        source: semver::Error,
    },
}

/// A parsed semantic version.
///
/// Parsing tolerates a leading `v` and a missing patch component (`1.12` is
/// read as `1.12.0`), which is how platform versions are usually spelled.
/// Anything else that is not valid semver is rejected. Build metadata is
/// dropped: it takes no part in precedence.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(semver::Version);

impl Version {
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let trimmed = input.trim();
        ensure!(!trimmed.is_empty(), EmptySnafu);

        let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let mut version =
            semver::Version::parse(&pad_patch(bare)).context(MalformedSnafu { input })?;
        version.build = semver::BuildMetadata::EMPTY;
        Ok(Self(version))
    }

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(semver::Version::new(major, minor, patch))
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Greater
    }

    pub fn is_before(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Less
    }

    pub fn equal(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }

    pub const fn major(&self) -> u64 {
        self.0.major
    }

    pub const fn minor(&self) -> u64 {
        self.0.minor
    }
}

/// Inserts a `.0` patch component into `MAJOR.MINOR[-pre][+build]`.
fn pad_patch(input: &str) -> String {
    let core_end = input.find(['-', '+']).unwrap_or(input.len());
    let (core, rest) = input.split_at(core_end);
    if core.matches('.').count() == 1 {
        format!("{core}.0{rest}")
    } else {
        input.to_owned()
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}

//! Stencil groups
//!
//! Every scene set partitions its contents into groups `1..MAXIMUM_GROUPS`.
//! Group 0 is reserved: the stencil value zero means "no group".

use super::SceneError;
use std::fmt;

/// Number of group values, including the reserved group 0
pub const MAXIMUM_GROUPS: u8 = 16;

/// A validated group number in `1..MAXIMUM_GROUPS`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Group(u8);

impl Group {
    /// The group used when none is given
    pub const DEFAULT: Self = Self(1);

    /// Validate a group number
    pub const fn new(value: u8) -> Result<Self, SceneError> {
        if value == 0 || value >= MAXIMUM_GROUPS {
            Err(SceneError::InvalidGroup(value))
        } else {
            Ok(Self(value))
        }
    }

    /// The raw group number
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Every valid group in ascending order
    pub fn all() -> impl Iterator<Item = Self> {
        (1..MAXIMUM_GROUPS).map(Self)
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        Self(index as u8)
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl TryFrom<u8> for Group {
    type Error = SceneError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group {}", self.0)
    }
}

//! Block-state codes.
//!
//! A [`BlockState`] is an opaque 16-bit code identifying a material and its
//! variant. Air is always code 0 so that zeroed cell memory is empty space.

use serde::{Deserialize, Serialize};

/// Opaque block-state code stored in every voxel cell (2 bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockState(pub u16);

/// The empty block state.
pub const AIR: BlockState = BlockState(0);

impl BlockState {
    /// Returns `true` if this is the air state.
    pub fn is_air(self) -> bool {
        self == AIR
    }
}

impl From<u16> for BlockState {
    fn from(code: u16) -> Self {
        Self(code)
    }
}

//! Two-party room addressing.
//!
//! A room is the channel grouping all messages between exactly two
//! identities. The id is order-independent: both sides derive the same
//! value without coordination.

use crate::error::{Error, Result};

/// Separator between the two sorted identity ids.
pub const ROOM_SEPARATOR: char = '_';

/// Derive the room id for a pair of identities.
///
/// Sorts the two ids lexicographically and joins them with
/// [`ROOM_SEPARATOR`], so `room_id(a, b) == room_id(b, a)`. Identity ids
/// are unique tokens already, which keeps distinct pairs collision-free —
/// provided no id contains the separator, which is rejected here.
pub fn room_id(a: &str, b: &str) -> Result<String> {
    for id in [a, b] {
        if id.is_empty() {
            return Err(Error::InvalidIdentifier("empty identity id".into()));
        }
        if id.contains(ROOM_SEPARATOR) {
            return Err(Error::InvalidIdentifier(format!(
                "identity id may not contain '{}'",
                ROOM_SEPARATOR
            )));
        }
    }

    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    Ok(format!("{}{}{}", lo, ROOM_SEPARATOR, hi))
}

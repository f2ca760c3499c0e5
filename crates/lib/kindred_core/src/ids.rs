//! Record identifiers.
//!
//! Session and verification ids carry their creation time in the high bits,
//! so ordering by id lists a device's sessions newest-first without a
//! separate sort key. Account ids stay random (v4) since nothing lists them.

use uuid::Uuid;

/// Time-ordered id for a session or verification record.
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}

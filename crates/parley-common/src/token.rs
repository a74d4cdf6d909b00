//! Room token generation.
//!
//! A room token is the capability that scopes one call session: whoever holds
//! it can route signaling payloads through the relay for that call, so it has
//! to be unguessable. 16 random bytes, hex-encoded.

use rand::RngCore;

/// Generate a fresh room token for a call session.
pub fn room_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

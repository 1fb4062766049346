//! Connection identifier generation.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Hex characters kept from the digest.
const ID_LEN: usize = 32;

/// Fresh connection id: two random draws and the wall clock, hashed.
///
/// Uniqueness is probabilistic; there is no collision check.
pub fn generate_id() -> String {
    let mut rng = rand::rng();
    let seed = format!(
        "{}:{}:{}",
        rng.random::<u64>(),
        rng.random::<u64>(),
        chrono::Utc::now().timestamp_millis()
    );

    let mut id = format!("{:x}", Sha256::digest(seed.as_bytes()));
    id.truncate(ID_LEN);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_id_shape() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_ids_are_distinct() {
        let ids: HashSet<String> = (0..1_000).map(|_| generate_id()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}

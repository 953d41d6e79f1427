use rand::Rng;

use crate::error::{Result, TunnelError};

const MIN_LEN: usize = 4;
const MAX_LEN: usize = 63;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const DEFAULT_GENERATED_LEN: usize = 8;

/// Validates a caller-supplied client id against `^[a-z0-9]{4,63}$`.
pub fn validate(id: &str) -> Result<()> {
    if id.len() < MIN_LEN || id.len() > MAX_LEN {
        return Err(TunnelError::InvalidId(id.to_string()));
    }
    if !id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return Err(TunnelError::InvalidId(id.to_string()));
    }
    Ok(())
}

/// Generates a uniformly random lowercase-alphanumeric id of `DEFAULT_GENERATED_LEN`.
pub fn generate() -> String {
    let mut rng = rand::thread_rng();
    (0..DEFAULT_GENERATED_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        assert!(validate("abcd").is_ok());
        assert!(validate("a1b2c3").is_ok());
        assert!(validate(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_bad_length() {
        assert!(validate("abc").is_err());
        assert!(validate(&"a".repeat(64)).is_err());
    }

    #[test]
    fn rejects_non_lowercase_alphanumeric() {
        assert!(validate("Abcd").is_err());
        assert!(validate("ab-d").is_err());
        assert!(validate("ab_d").is_err());
        assert!(validate("ab cd").is_err());
    }

    #[test]
    fn generated_ids_are_valid_and_vary() {
        let a = generate();
        let b = generate();
        assert!(validate(&a).is_ok());
        assert!(validate(&b).is_ok());
        // Not a hard guarantee, but collision probability at this length is negligible.
        assert_ne!(a, b);
    }
}

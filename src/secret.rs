//! Credential generation.

use rand::rngs::OsRng;
use rand::RngCore;

/// Generated secret for one credential slot. Created at the stage that
/// needs it and never regenerated unless that stage re-executes.
#[derive(Debug, Clone)]
pub struct Credential {
    pub value: String,
}

impl Credential {
    pub fn generate(length: usize) -> Self {
        Self {
            value: generate_password(length),
        }
    }
}

/// Produce an alphanumeric password of exactly `length` characters from the
/// operating system's CSPRNG. Non-alphanumeric bytes are discarded and the
/// loop keeps drawing until the requested length is reached, so the result
/// is never silently shorter.
pub fn generate_password(length: usize) -> String {
    let mut out = String::with_capacity(length);
    let mut buf = [0u8; 64];
    while out.len() < length {
        OsRng.fill_bytes(&mut buf);
        for &byte in buf.iter() {
            if byte.is_ascii_alphanumeric() {
                out.push(byte as char);
                if out.len() == length {
                    break;
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_length_for_requested_sizes() {
        for length in [1, 8, 16, 25, 64, 100] {
            let password = generate_password(length);
            assert_eq!(password.len(), length);
            assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn zero_length_is_empty() {
        assert_eq!(generate_password(0), "");
    }

    #[test]
    fn successive_values_are_independent() {
        let a = generate_password(25);
        let b = generate_password(25);
        assert_ne!(a, b);
    }
}

//! Human-readable id generation.
//!
//! Business ids (`trainer_id`, `client_id`, `habit_id`) are short
//! prefixed codes that users type back into the chat, not raw row keys.

use rand::Rng;

/// Alphabet without easily confused characters (no 0/O, 1/I/L).
const ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Length of the random suffix after the prefix.
const SUFFIX_LEN: usize = 6;

/// Generate an id like `TR7K2MXQ` from a prefix.
pub fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut id = String::with_capacity(prefix.len() + SUFFIX_LEN);
    id.push_str(prefix);
    for _ in 0..SUFFIX_LEN {
        let idx = rng.gen_range(0..ALPHABET.len());
        id.push(ALPHABET[idx] as char);
    }
    id
}

pub fn trainer_id() -> String {
    generate("TR")
}

pub fn client_id() -> String {
    generate("CL")
}

pub fn habit_id() -> String {
    generate("HB")
}

pub fn invitation_id() -> String {
    generate("INV")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_carry_prefix_and_length() {
        let id = trainer_id();
        assert!(id.starts_with("TR"));
        assert_eq!(id.len(), 2 + SUFFIX_LEN);

        let id = invitation_id();
        assert!(id.starts_with("INV"));
        assert_eq!(id.len(), 3 + SUFFIX_LEN);
    }

    #[test]
    fn ids_use_unambiguous_alphabet() {
        for _ in 0..50 {
            let id = habit_id();
            for c in id[2..].chars() {
                assert!(
                    ALPHABET.contains(&(c as u8)),
                    "unexpected character {c} in {id}"
                );
            }
        }
    }

    #[test]
    fn ids_are_unlikely_to_collide() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(client_id()));
        }
    }
}

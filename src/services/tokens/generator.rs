use rand::{rngs::OsRng, RngCore};

use super::TokenError;

/// Shortest token the generator will mint.
pub const MIN_TOKEN_LENGTH: usize = 20;

/// Digits and letters without the visually ambiguous `0 O o 1 I l`.
pub const SAFE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnpqrstuvwxyz";

/// Characters that never appear in a generated token.
pub const AMBIGUOUS_CHARS: &[char] = &['0', 'O', 'o', '1', 'I', 'l'];

/// Random bytes drawn per output character.
const OVERSAMPLE_FACTOR: usize = 2;

/// Mints a token of exactly `length` characters from [`SAFE_ALPHABET`].
pub fn generate_secure_token(length: usize) -> Result<String, TokenError> {
    generate_with_min_length(length, MIN_TOKEN_LENGTH)
}

pub(crate) fn generate_with_min_length(
    length: usize,
    min_length: usize,
) -> Result<String, TokenError> {
    if length < min_length {
        return Err(TokenError::TooShort {
            requested: length,
            minimum: min_length,
        });
    }

    let mut bytes = vec![0u8; length * OVERSAMPLE_FACTOR];
    OsRng.fill_bytes(&mut bytes);

    let token: String = bytes
        .iter()
        .map(|b| SAFE_ALPHABET[*b as usize % SAFE_ALPHABET.len()] as char)
        .take(length)
        .collect();
    Ok(token)
}

/// Display form of a token for logs: `tok_` plus at most three leading characters.
pub fn mask_token(token: &str) -> String {
    let head: String = token.chars().take(3).collect();
    format!("tok_{}***", head)
}

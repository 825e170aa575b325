//! Random credential material and identifier checks.
//!
//! Generated usernames and passwords start with a letter and are otherwise
//! alphanumeric, so they are valid unquoted SQL identifiers and never contain
//! characters the cloud provider rejects in master passwords (`/`, `@`, `"`,
//! space).

use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, rngs::OsRng, seq::SliceRandom, Rng};
use regex::Regex;

/// Length of generated usernames
pub const USERNAME_LENGTH: usize = 24;

/// Length of generated passwords
pub const PASSWORD_LENGTH: usize = 24;

const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

lazy_static! {
    static ref SIMPLE_IDENTIFIER_REGEX: Regex = Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)?$")
        .expect("SIMPLE_IDENTIFIER_REGEX should be a valid regex pattern");
    static ref EXTENSION_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z0-9_-]+$")
        .expect("EXTENSION_NAME_REGEX should be a valid regex pattern");
}

/// Random string of `length` characters: one letter followed by alphanumerics
pub fn random_alphanumeric(length: usize) -> String {
    if length == 0 {
        return String::new();
    }

    let first = *LETTERS.choose(&mut OsRng).unwrap_or(&b'u') as char;
    std::iter::once(first)
        .chain(OsRng.sample_iter(&Alphanumeric).take(length - 1).map(char::from))
        .collect()
}

/// Random database username
pub fn random_username() -> String {
    random_alphanumeric(USERNAME_LENGTH)
}

/// Random database password
pub fn random_password() -> String {
    random_alphanumeric(PASSWORD_LENGTH)
}

/// True for the empty string or a letter followed by letters, digits or `_`
pub fn is_simple_identifier(value: &str) -> bool {
    SIMPLE_IDENTIFIER_REGEX.is_match(value)
}

/// True for names PostgreSQL extensions are published under
pub fn is_valid_extension_name(value: &str) -> bool {
    EXTENSION_NAME_REGEX.is_match(value)
}

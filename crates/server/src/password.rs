//! One-time SSH password generation

use rand::Rng;

/// Length of generated passwords
pub const GENERATED_PASSWORD_LEN: usize = 20;

const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789!@#$%^&*";

/// Generate a random password from letters, digits, and `!@#$%^&*`
///
/// Uses the thread-local CSPRNG.
pub fn generate_password(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

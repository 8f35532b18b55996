use crate::error::{CoreError, CoreResult};
use rand::Rng;
use tracing::debug;

pub const MAX_ATTEMPTS: usize = 1000;

/// Draws `prefix` + `digit_count` random digits until `exists` reports the
/// code unused. Randomness and the uniqueness oracle are both injected so
/// callers can seed one and stub the other.
pub fn generate_unique_code<R, F>(
    prefix: &str,
    digit_count: usize,
    rng: &mut R,
    mut exists: F,
) -> CoreResult<String>
where
    R: Rng,
    F: FnMut(&str) -> CoreResult<bool>,
{
    for attempt in 1..=MAX_ATTEMPTS {
        let mut code = String::with_capacity(prefix.len() + digit_count);
        code.push_str(prefix);
        for _ in 0..digit_count {
            let d: u32 = rng.random_range(0..10);
            code.push(char::from(b'0' + d as u8));
        }
        if !exists(&code)? {
            return Ok(code);
        }
        debug!(prefix, attempt, "generated code already taken, retrying");
    }
    Err(CoreError::CodeSpaceExhausted {
        prefix: prefix.to_string(),
        attempts: MAX_ATTEMPTS,
    })
}

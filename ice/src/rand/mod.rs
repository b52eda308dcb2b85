#[cfg(test)]
mod rand_test;

use rand::{thread_rng, Rng};

// ufrag/pwd lengths and alphabet of the session-description credentials.
const RUNES_CREDENTIAL: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const LEN_UFRAG: usize = 4;
const LEN_PWD: usize = 22;

fn generate_string(n: usize, runes: &[u8]) -> String {
    let mut rng = thread_rng();
    (0..n)
        .map(|_| runes[rng.gen_range(0..runes.len())] as char)
        .collect()
}

/// ICE user fragment for `a=ice-ufrag`.
pub fn generate_ufrag() -> String {
    generate_string(LEN_UFRAG, RUNES_CREDENTIAL)
}

/// ICE password for `a=ice-pwd`.
pub fn generate_pwd() -> String {
    generate_string(LEN_PWD, RUNES_CREDENTIAL)
}

/// 8-byte tie-breaker used to resolve role conflicts.
pub fn generate_tie_breaker() -> u64 {
    thread_rng().gen()
}

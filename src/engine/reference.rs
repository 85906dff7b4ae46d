use rand::Rng;

/// No 0/O or 1/I, so codes survive being read out over the phone.
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const PREFIX: &str = "BK-";
pub const CODE_LEN: usize = 8;

/// Random human-facing booking reference, e.g. `BK-7KQ2MXPA`.
/// Uniqueness is the store's job; callers retry on collision.
pub fn generate_reference_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut code = String::with_capacity(PREFIX.len() + CODE_LEN);
    code.push_str(PREFIX);
    for _ in 0..CODE_LEN {
        code.push(char::from(ALPHABET[rng.gen_range(0..ALPHABET.len())]));
    }
    code
}

pub fn is_reference_code(s: &str) -> bool {
    s.strip_prefix(PREFIX).is_some_and(|body| {
        body.len() == CODE_LEN && body.bytes().all(|b| ALPHABET.contains(&b))
    })
}

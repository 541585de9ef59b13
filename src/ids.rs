use rand::Rng;

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Both game and player ids are 7 base-36 characters, the format the
/// browser clients mint and the share links carry.
pub const SHORT_ID_LEN: usize = 7;

/// Uncoordinated pseudo-random identifier. There is no collision check
/// against existing records; at this entropy collisions stay a theoretical,
/// unhandled edge case.
pub fn short_id<R: Rng>(rng: &mut R) -> String {
    (0..SHORT_ID_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Local token estimate used when the remote counting capability is
/// unavailable: ASCII runs about one token per four characters, everything
/// else closer to one per 1.5, plus a small boundary overhead. Advisory
/// only; must never fail.
pub fn approximate_tokens(text: &str) -> u32 {
    let ascii = text.chars().filter(|c| c.is_ascii()).count() as f64;
    let non_ascii = text.chars().count() as f64 - ascii;
    (ascii / 4.0 + non_ascii / 1.5 + 5.0) as u32
}

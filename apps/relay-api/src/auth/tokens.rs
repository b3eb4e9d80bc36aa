use rand::Rng;

/// Generate an opaque, URL-safe random token with a type prefix.
pub fn generate_opaque_token(prefix: &str, bytes: usize) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill(&mut buf[..]);
    format!("{}_{}", prefix, URL_SAFE_NO_PAD.encode(&buf))
}

/// Generate an OAuth state token (`st_` prefix), single use.
pub fn generate_state_token() -> String {
    generate_opaque_token("st", 32)
}

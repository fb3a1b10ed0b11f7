use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Random opaque value for the authorize URL's `state` parameter.
pub fn generate_state() -> String {
    let mut buf = [0u8; 32];
    rand::Rng::fill_bytes(&mut rand::rng(), &mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_length() {
        // 32 bytes base64url-encoded without padding
        assert_eq!(generate_state().len(), 43);
    }

    #[test]
    fn states_are_unique() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn state_uses_url_safe_chars() {
        for ch in generate_state().chars() {
            assert!(
                ch.is_ascii_alphanumeric() || ch == '-' || ch == '_',
                "Invalid char in state: '{ch}'"
            );
        }
    }
}

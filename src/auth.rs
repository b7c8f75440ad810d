//! GitHub OAuth flow helpers.
//!
//! `/login` redirects the browser to GitHub's authorize page with a signed
//! `state` parameter; `/login/callback` verifies the state and exchanges the
//! returned code for an access token. State signing uses HMAC-SHA256 over a
//! random nonce (`hmac` + `sha2` crates), so a callback can only complete a
//! flow this server started.

use anyhow::{bail, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::config::GithubConfig;

type HmacSha256 = Hmac<Sha256>;

/// Scope requested from GitHub. `repo` grants read access to private
/// repositories and pull request data.
const OAUTH_SCOPE: &str = "read:user repo";

/// Build the GitHub authorize URL the browser is redirected to.
pub fn authorize_url(config: &GithubConfig) -> String {
    format!(
        "{}/login/oauth/authorize?client_id={}&redirect_uri={}&scope={}&state={}",
        config.oauth_base,
        config.client_id,
        urlencode(&config.redirect_uri),
        urlencode(OAUTH_SCOPE),
        issue_state(&config.state_secret),
    )
}

/// Mint a fresh signed state value: `<nonce>.<hex hmac of nonce>`.
pub fn issue_state(secret: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    let tag = hex_hmac_sha256(secret.as_bytes(), nonce.as_bytes());
    format!("{nonce}.{tag}")
}

/// Verify a state value returned by the OAuth callback.
pub fn verify_state(secret: &str, state: &str) -> Result<()> {
    let Some((nonce, tag)) = state.split_once('.') else {
        bail!("malformed oauth state");
    };

    let tag_bytes = match hex::decode(tag) {
        Ok(b) => b,
        Err(_) => bail!("malformed oauth state"),
    };

    // Constant-time comparison via the Mac verify API.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(nonce.as_bytes());
    if mac.verify_slice(&tag_bytes).is_err() {
        bail!("oauth state signature mismatch");
    }
    Ok(())
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    hex::encode(mac.finalize().into_bytes())
}

/// Minimal percent-encoding for URL query components.
fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_state_verifies() {
        let state = issue_state("secret");
        assert!(verify_state("secret", &state).is_ok());
    }

    #[test]
    fn state_rejects_wrong_secret() {
        let state = issue_state("secret");
        assert!(verify_state("other", &state).is_err());
    }

    #[test]
    fn state_rejects_tampered_nonce() {
        let state = issue_state("secret");
        let (_, tag) = state.split_once('.').unwrap();
        assert!(verify_state("secret", &format!("forged.{tag}")).is_err());
    }

    #[test]
    fn state_rejects_garbage() {
        assert!(verify_state("secret", "").is_err());
        assert!(verify_state("secret", "no-separator").is_err());
        assert!(verify_state("secret", "nonce.nothex!").is_err());
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("a b/c?d"), "a%20b%2Fc%3Fd");
        assert_eq!(urlencode("plain-text_1.2~"), "plain-text_1.2~");
    }
}

//! Proof Key for Code Exchange (RFC 7636).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use subtle::ConstantTimeEq;
use thiserror::Error;

const MIN_LENGTH: usize = 43;
const MAX_LENGTH: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodeChallengeMethod {
    #[default]
    Plain,
    S256,
}

impl CodeChallengeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodeChallengeMethod::Plain => "plain",
            CodeChallengeMethod::S256 => "S256",
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CodeChallengeMethod {
    type Err = PkceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(CodeChallengeMethod::Plain),
            "S256" => Ok(CodeChallengeMethod::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PkceError {
    #[error("unsupported code_challenge_method {0:?}")]
    UnsupportedMethod(String),

    #[error("{0} must be 43 to 128 characters")]
    InvalidLength(&'static str),

    #[error("{0} contains characters outside [A-Za-z0-9-._~]")]
    InvalidCharacters(&'static str),

    #[error("code_verifier does not match the code_challenge")]
    Mismatch,
}

fn check_format(field: &'static str, value: &str) -> Result<(), PkceError> {
    if !(MIN_LENGTH..=MAX_LENGTH).contains(&value.len()) {
        return Err(PkceError::InvalidLength(field));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
    {
        return Err(PkceError::InvalidCharacters(field));
    }
    Ok(())
}

pub fn validate_challenge(challenge: &str) -> Result<(), PkceError> {
    check_format("code_challenge", challenge)
}

/// S256 transform: base64url(sha256(verifier)) without padding.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

pub fn verify(
    verifier: &str,
    challenge: &str,
    method: CodeChallengeMethod,
) -> Result<(), PkceError> {
    check_format("code_verifier", verifier)?;

    let computed = match method {
        CodeChallengeMethod::Plain => verifier.to_string(),
        CodeChallengeMethod::S256 => s256_challenge(verifier),
    };

    if bool::from(computed.as_bytes().ct_eq(challenge.as_bytes())) {
        Ok(())
    } else {
        Err(PkceError::Mismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Appendix B of RFC 7636
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn s256_matches_the_rfc_example() {
        assert_eq!(s256_challenge(VERIFIER), CHALLENGE);
        assert!(verify(VERIFIER, CHALLENGE, CodeChallengeMethod::S256).is_ok());
    }

    #[test]
    fn plain_compares_verbatim() {
        assert!(verify(VERIFIER, VERIFIER, CodeChallengeMethod::Plain).is_ok());
        assert_eq!(
            verify(VERIFIER, CHALLENGE, CodeChallengeMethod::Plain),
            Err(PkceError::Mismatch)
        );
    }

    #[test]
    fn rejects_malformed_verifiers() {
        assert_eq!(
            verify("short", CHALLENGE, CodeChallengeMethod::S256),
            Err(PkceError::InvalidLength("code_verifier"))
        );
        let spaced = format!("{} ", &VERIFIER[..43]);
        assert_eq!(
            verify(&spaced, CHALLENGE, CodeChallengeMethod::S256),
            Err(PkceError::InvalidCharacters("code_verifier"))
        );
    }

    #[test]
    fn parses_methods() {
        assert_eq!("S256".parse::<CodeChallengeMethod>(), Ok(CodeChallengeMethod::S256));
        assert_eq!("plain".parse::<CodeChallengeMethod>(), Ok(CodeChallengeMethod::Plain));
        assert!("s256".parse::<CodeChallengeMethod>().is_err());
    }
}

// src/utils/identity.rs

use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Claims wrapped around a sealed student identity.
#[derive(Debug, Deserialize, Serialize)]
struct IdentityClaims {
    sub: String,
    exp: usize,
}

/// Sealed identities must stay readable for as long as the presentation
/// rows exist, so the expiry is pinned far out (2100-01-01).
const FAR_FUTURE_EXP: usize = 4_102_444_800;

/// Seals a student identity into an opaque token for storage on a
/// presentation row.
pub fn seal_identity(user_id: &str, secret: &str) -> Result<String, AppError> {
    let claims = IdentityClaims {
        sub: user_id.to_owned(),
        exp: FAR_FUTURE_EXP,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(e.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub value: String,
    /// True when the stored value could not be unsealed and was passed
    /// through unchanged (rows written before sealing was introduced).
    pub legacy_plaintext: bool,
}

/// Resolves a stored identity value.
///
/// Attempts to unseal; any failure means the value predates sealing and is
/// treated as already-plaintext. This function never errors.
pub fn resolve_identity(stored: &str, secret: &str) -> ResolvedIdentity {
    match decode::<IdentityClaims>(
        stored,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    ) {
        Ok(token_data) => ResolvedIdentity {
            value: token_data.claims.sub,
            legacy_plaintext: false,
        },
        Err(_) => ResolvedIdentity {
            value: stored.to_owned(),
            legacy_plaintext: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "identity_test_secret";

    #[test]
    fn seal_then_resolve_roundtrips() {
        let sealed = seal_identity("alice|team-3", SECRET).unwrap();
        assert_ne!(sealed, "alice|team-3");

        let resolved = resolve_identity(&sealed, SECRET);
        assert_eq!(resolved.value, "alice|team-3");
        assert!(!resolved.legacy_plaintext);
    }

    #[test]
    fn plaintext_value_passes_through() {
        let resolved = resolve_identity("legacy-student-42", SECRET);
        assert_eq!(resolved.value, "legacy-student-42");
        assert!(resolved.legacy_plaintext);
    }

    #[test]
    fn wrong_key_degrades_to_passthrough() {
        let sealed = seal_identity("bob", "some_other_key").unwrap();
        let resolved = resolve_identity(&sealed, SECRET);
        assert_eq!(resolved.value, sealed);
        assert!(resolved.legacy_plaintext);
    }
}

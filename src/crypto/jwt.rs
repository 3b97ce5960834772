use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

/// The subset of registered claims the client cares about.
#[derive(Deserialize, Debug)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<f64>,
}

/// Decodes the `exp` claim of a JWT without verifying its signature.
///
/// The signature is the server's business; the client only needs to know
/// when to drop the token. Anything that does not decode yields `None`,
/// which callers treat as "never expires".
///
/// # Arguments
///
/// * `token` - The compact-serialized JWT.
///
/// # Returns
///
/// The expiry instant, if one could be decoded.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    // Algorithm and key are unused once signature checks are off.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let claims = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()?
        .claims;
    let exp = claims.exp?;
    if !exp.is_finite() {
        return None;
    }

    DateTime::from_timestamp_millis((exp * 1000.0) as i64)
}

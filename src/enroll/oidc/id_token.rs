//! Compact-JWS ID token verification (RS256 and ES256).

use super::jwks::Jwks;
use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::signature::Verifier as _;
use rsa::{
    errors::Error as RsaError,
    pkcs1v15::{Signature as RsaSignature, VerifyingKey as RsaVerifyingKey},
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Clock skew tolerated on `exp`.
pub const EXPIRY_LEEWAY_SECONDS: i64 = 30;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("no verification key for kid {0:?}")]
    UnknownKid(Option<String>),
    #[error("invalid key type")]
    InvalidKeyType,
    #[error("failed to parse verification key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("missing email claim")]
    MissingEmail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    #[must_use]
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::One(aud) => aud == audience,
            Self::Many(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    pub iss: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl IdTokenClaims {
    /// The verified email, required to bind the certificate.
    ///
    /// # Errors
    /// Returns `MissingEmail` when the claim is absent or blank.
    pub fn email(&self) -> Result<&str, Error> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .ok_or(Error::MissingEmail)
    }
}

/// What a token must match to be accepted.
#[derive(Debug, Clone, Copy)]
pub struct Expectations<'a> {
    pub issuer: &'a str,
    pub audience: &'a str,
    pub now_unix_seconds: i64,
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }
    Ok((header_b64, claims_b64, sig_b64))
}

/// Decode the header without checking anything, used to pick the key.
///
/// # Errors
/// Returns an error if the token is not a three-part compact JWS with a JSON header.
pub fn decode_header(token: &str) -> Result<IdTokenHeader, Error> {
    let (header_b64, _, _) = split(token)?;
    b64d_json(header_b64)
}

/// Verify an ID token against the provider's keys and return its claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the algorithm is not RS256/ES256 or no matching key is in `jwks`,
/// - the signature is invalid,
/// - the claims fail validation (`iss`, `aud`, `exp`).
pub fn verify(token: &str, jwks: &Jwks, expect: &Expectations<'_>) -> Result<IdTokenClaims, Error> {
    let (header_b64, claims_b64, sig_b64) = split(token)?;
    let header: IdTokenHeader = b64d_json(header_b64)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;

    match header.alg.as_str() {
        "RS256" => {
            let jwk = jwks
                .select(header.kid.as_deref(), "RSA")
                .ok_or_else(|| Error::UnknownKid(header.kid.clone()))?;
            let verifying_key = RsaVerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?);
            let signature = RsaSignature::try_from(signature.as_slice())
                .map_err(|_| Error::InvalidSignature)?;
            verifying_key
                .verify(signing_input.as_bytes(), &signature)
                .map_err(|_| Error::InvalidSignature)?;
        }
        "ES256" => {
            let jwk = jwks
                .select(header.kid.as_deref(), "EC")
                .ok_or_else(|| Error::UnknownKid(header.kid.clone()))?;
            let verifying_key = jwk.to_p256_verifying_key()?;
            let signature = p256::ecdsa::Signature::from_slice(&signature)
                .map_err(|_| Error::InvalidSignature)?;
            verifying_key
                .verify(signing_input.as_bytes(), &signature)
                .map_err(|_| Error::InvalidSignature)?;
        }
        other => return Err(Error::UnsupportedAlg(other.to_string())),
    }

    let claims: IdTokenClaims = b64d_json(claims_b64)?;
    if claims.iss != expect.issuer {
        return Err(Error::InvalidIssuer);
    }
    if !claims.aud.contains(expect.audience) {
        return Err(Error::InvalidAudience);
    }
    if claims.exp.saturating_add(EXPIRY_LEEWAY_SECONDS) <= expect.now_unix_seconds {
        return Err(Error::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::enroll::oidc::jwks::Jwk;
    use p256::ecdsa::{Signature, SigningKey, signature::Signer};
    use rand::rngs::OsRng;
    use rsa::{
        RsaPrivateKey,
        pkcs1v15::SigningKey as RsaSigningKey,
        signature::SignatureEncoding,
        traits::PublicKeyParts,
    };
    use serde_json::{Value, json};

    const ISSUER: &str = "https://idm.example.com/oauth2/openid/step-ca-enroll";
    const CLIENT_ID: &str = "step-ca-enroll";
    const NOW: i64 = 1_700_000_000;

    /// Sign `claims` as an ES256 compact JWS.
    pub(crate) fn sign_es256(key: &SigningKey, kid: &str, claims: &Value) -> String {
        let header = json!({"alg": "ES256", "typ": "JWT", "kid": kid});
        let encode = |value: &Value| Base64UrlUnpadded::encode_string(value.to_string().as_bytes());
        let signing_input = format!("{}.{}", encode(&header), encode(claims));
        let signature: Signature = key.sign(signing_input.as_bytes());
        format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature.to_bytes())
        )
    }

    fn sign_rs256(key: &RsaSigningKey<Sha256>, kid: &str, claims: &Value) -> String {
        let header = json!({"alg": "RS256", "typ": "JWT", "kid": kid});
        let encode = |value: &Value| Base64UrlUnpadded::encode_string(value.to_string().as_bytes());
        let signing_input = format!("{}.{}", encode(&header), encode(claims));
        let signature = key.sign(signing_input.as_bytes());
        format!(
            "{signing_input}.{}",
            Base64UrlUnpadded::encode_string(&signature.to_bytes())
        )
    }

    fn rsa_jwk(key: &RsaPrivateKey, kid: &str) -> Jwk {
        let public = key.to_public_key();
        Jwk {
            kty: "RSA".to_string(),
            alg: Some("RS256".to_string()),
            key_use: Some("sig".to_string()),
            kid: Some(kid.to_string()),
            n: Some(Base64UrlUnpadded::encode_string(&public.n().to_bytes_be())),
            e: Some(Base64UrlUnpadded::encode_string(&public.e().to_bytes_be())),
            crv: None,
            x: None,
            y: None,
        }
    }

    fn fixture() -> (SigningKey, Jwks) {
        let key = SigningKey::random(&mut OsRng);
        let jwks = Jwks {
            keys: vec![Jwk::from_p256_verifying_key(key.verifying_key(), "k1")],
        };
        (key, jwks)
    }

    fn claims() -> Value {
        json!({
            "iss": ISSUER,
            "aud": CLIENT_ID,
            "sub": "8b1f8a4e",
            "exp": NOW + 300,
            "iat": NOW,
            "email": "alice@example.com",
        })
    }

    fn expect() -> Expectations<'static> {
        Expectations {
            issuer: ISSUER,
            audience: CLIENT_ID,
            now_unix_seconds: NOW,
        }
    }

    #[test]
    fn verifies_es256_token() -> Result<(), Error> {
        let (key, jwks) = fixture();
        let token = sign_es256(&key, "k1", &claims());

        let verified = verify(&token, &jwks, &expect())?;
        assert_eq!(verified.email()?, "alice@example.com");
        assert_eq!(decode_header(&token)?.kid.as_deref(), Some("k1"));
        Ok(())
    }

    #[test]
    fn verifies_rs256_and_rejects_foreign_signature() -> anyhow::Result<()> {
        let key = RsaPrivateKey::new(&mut OsRng, 2048)?;
        let intruder = RsaSigningKey::<Sha256>::new(RsaPrivateKey::new(&mut OsRng, 2048)?);
        // the EC key from the fixture sits next to the RSA one
        let (_, mut jwks) = fixture();
        jwks.keys.push(rsa_jwk(&key, "r1"));

        let token = sign_rs256(&RsaSigningKey::<Sha256>::new(key), "r1", &claims());
        let verified = verify(&token, &jwks, &expect())?;
        assert_eq!(verified.email()?, "alice@example.com");

        let forged = sign_rs256(&intruder, "r1", &claims());
        assert!(matches!(
            verify(&forged, &jwks, &expect()),
            Err(Error::InvalidSignature)
        ));

        // an RS256 header naming the EC key finds no RSA key
        let mismatched = sign_rs256(&intruder, "k1", &claims());
        assert!(matches!(
            verify(&mismatched, &jwks, &expect()),
            Err(Error::UnknownKid(Some(kid))) if kid == "k1"
        ));
        Ok(())
    }

    #[test]
    fn far_future_expiry_does_not_overflow() -> Result<(), Error> {
        let (key, jwks) = fixture();
        let mut claims = claims();
        claims["exp"] = json!(i64::MAX);
        let verified = verify(&sign_es256(&key, "k1", &claims), &jwks, &expect())?;
        assert_eq!(verified.exp, i64::MAX);
        Ok(())
    }

    #[test]
    fn accepts_audience_array() -> Result<(), Error> {
        let (key, jwks) = fixture();
        let mut claims = claims();
        claims["aud"] = json!(["other", CLIENT_ID]);
        let token = sign_es256(&key, "k1", &claims);
        verify(&token, &jwks, &expect())?;
        Ok(())
    }

    #[test]
    fn rejects_foreign_signature() {
        let (_, jwks) = fixture();
        let intruder = SigningKey::random(&mut OsRng);
        let token = sign_es256(&intruder, "k1", &claims());
        assert!(matches!(
            verify(&token, &jwks, &expect()),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_unknown_kid() {
        let (key, jwks) = fixture();
        let token = sign_es256(&key, "rotated", &claims());
        assert!(matches!(
            verify(&token, &jwks, &expect()),
            Err(Error::UnknownKid(Some(kid))) if kid == "rotated"
        ));
    }

    #[test]
    fn rejects_wrong_issuer_audience_and_expiry() {
        let (key, jwks) = fixture();

        let mut bad_iss = claims();
        bad_iss["iss"] = json!("https://evil.example.com");
        assert!(matches!(
            verify(&sign_es256(&key, "k1", &bad_iss), &jwks, &expect()),
            Err(Error::InvalidIssuer)
        ));

        let mut bad_aud = claims();
        bad_aud["aud"] = json!("someone-else");
        assert!(matches!(
            verify(&sign_es256(&key, "k1", &bad_aud), &jwks, &expect()),
            Err(Error::InvalidAudience)
        ));

        let mut expired = claims();
        expired["exp"] = json!(NOW - EXPIRY_LEEWAY_SECONDS - 1);
        assert!(matches!(
            verify(&sign_es256(&key, "k1", &expired), &jwks, &expect()),
            Err(Error::Expired)
        ));
    }

    #[test]
    fn rejects_tampered_claims() {
        let (key, jwks) = fixture();
        let token = sign_es256(&key, "k1", &claims());
        let mut parts: Vec<&str> = token.split('.').collect();

        let mut forged = claims();
        forged["email"] = json!("mallory@example.com");
        let forged = Base64UrlUnpadded::encode_string(forged.to_string().as_bytes());
        parts[1] = &forged;

        assert!(matches!(
            verify(&parts.join("."), &jwks, &expect()),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_unsupported_algorithms_and_garbage() {
        let (_, jwks) = fixture();
        let none_header = Base64UrlUnpadded::encode_string(br#"{"alg":"none"}"#);
        let body = Base64UrlUnpadded::encode_string(claims().to_string().as_bytes());
        assert!(matches!(
            verify(&format!("{none_header}.{body}."), &jwks, &expect()),
            Err(Error::UnsupportedAlg(alg)) if alg == "none"
        ));
        assert!(matches!(
            verify("only.two", &jwks, &expect()),
            Err(Error::TokenFormat)
        ));
    }

    #[test]
    fn missing_email_is_an_error() -> Result<(), Error> {
        let (key, jwks) = fixture();
        let mut no_email = claims();
        no_email["email"] = json!("  ");
        let verified = verify(&sign_es256(&key, "k1", &no_email), &jwks, &expect())?;
        assert!(matches!(verified.email(), Err(Error::MissingEmail)));
        Ok(())
    }
}

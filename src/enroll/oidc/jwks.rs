use super::id_token::Error;
use base64ct::{Base64UrlUnpadded, Encoding};
use p256::ecdsa::VerifyingKey;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};

/// The provider's published verification keys (`jwks_uri`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Parse a JWKS from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `s` is not valid JSON or doesn't match the expected JWKS shape.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid.as_deref() == Some(kid))
    }

    /// Pick the key a token header points at.
    ///
    /// Without a `kid` the set must hold exactly one signing key of the right type.
    #[must_use]
    pub fn select(&self, kid: Option<&str>, kty: &str) -> Option<&Jwk> {
        if let Some(kid) = kid {
            return self.find_by_kid(kid).filter(|k| k.kty == kty);
        }

        let mut candidates = self
            .keys
            .iter()
            .filter(|k| k.kty == kty && k.key_use.as_deref().is_none_or(|u| u == "sig"));
        let first = candidates.next()?;
        candidates.next().is_none().then_some(first)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    // RSA
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    // EC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Build a JWK from a P-256 verifying key.
    #[must_use]
    pub fn from_p256_verifying_key(key: &VerifyingKey, kid: impl Into<String>) -> Self {
        let point = key.to_encoded_point(false);
        Self {
            kty: "EC".to_string(),
            alg: Some("ES256".to_string()),
            key_use: Some("sig".to_string()),
            kid: Some(kid.into()),
            n: None,
            e: None,
            crv: Some("P-256".to_string()),
            x: point.x().map(|x| Base64UrlUnpadded::encode_string(x)),
            y: point.y().map(|y| Base64UrlUnpadded::encode_string(y)),
        }
    }

    /// Convert this JWK to an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not RSA, a member is missing, or the values are invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, Error> {
        if self.kty != "RSA" {
            return Err(Error::InvalidKeyType);
        }
        let n_bytes = decode_member(self.n.as_deref())?;
        let e_bytes = decode_member(self.e.as_deref())?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        RsaPublicKey::new(n, e).map_err(Error::Rsa)
    }

    /// Convert this JWK to a P-256 `VerifyingKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not an EC P-256 key or the point is invalid.
    pub fn to_p256_verifying_key(&self) -> Result<VerifyingKey, Error> {
        if self.kty != "EC" || self.crv.as_deref() != Some("P-256") {
            return Err(Error::InvalidKeyType);
        }
        let x = decode_member(self.x.as_deref())?;
        let y = decode_member(self.y.as_deref())?;
        if x.len() > 32 || y.len() > 32 {
            return Err(Error::KeyParse);
        }

        // SEC1 uncompressed point: 0x04 || x || y, coordinates left-padded to 32 bytes
        let mut sec1 = Vec::with_capacity(65);
        sec1.push(0x04);
        sec1.extend(std::iter::repeat_n(0u8, 32 - x.len()));
        sec1.extend_from_slice(&x);
        sec1.extend(std::iter::repeat_n(0u8, 32 - y.len()));
        sec1.extend_from_slice(&y);

        VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| Error::KeyParse)
    }
}

fn decode_member(value: Option<&str>) -> Result<Vec<u8>, Error> {
    let value = value.ok_or(Error::KeyParse)?;
    Base64UrlUnpadded::decode_vec(value).map_err(|_| Error::Base64)
}

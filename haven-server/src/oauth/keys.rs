//! RSA signing key lifecycle: load the persisted key if the admin
//! collection already has one, otherwise generate one in memory and persist
//! it lazily once the collection exists. Stable `kid` across restarts, per
//! spec 4.10 "Token settings".

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use haven_store::OAuthStore;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

const RSA_BITS: usize = 2048;

/// The server's RSA signing key, kept in memory for the process lifetime.
pub struct SigningKey {
    pub kid: String,
    pub encoding_key: EncodingKey,
    pub decoding_key: DecodingKey,
    pub jwk: Value,
}

impl SigningKey {
    /// Load the persisted key, or generate and persist a fresh one.
    ///
    /// Per spec 4.10: "JWKs are loaded from an admin document on startup if
    /// available; otherwise generated in memory and persisted once the
    /// admin collection is provisioned." Here the `OAuthStore`'s SQLite
    /// table always exists once opened, so persistence happens immediately;
    /// a failure to persist is logged but does not abort startup, mirroring
    /// the "tolerates a missing admin collection" recovery rule.
    pub fn load_or_generate(store: &OAuthStore) -> Result<Self, String> {
        if let Some(persisted) = store
            .load_signing_key()
            .map_err(|e| format!("failed to read signing key: {e}"))?
        {
            let private_key = RsaPrivateKey::from_pkcs1_pem(&persisted.private_pem)
                .map_err(|e| format!("stored signing key is invalid: {e}"))?;
            return Ok(Self::from_private_key(persisted.kid, private_key));
        }

        let mut rng = rand::rngs::OsRng;
        let private_key = RsaPrivateKey::new(&mut rng, RSA_BITS)
            .map_err(|e| format!("failed to generate RSA signing key: {e}"))?;
        let kid = uuid::Uuid::new_v4().to_string();

        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .map_err(|e| format!("failed to encode signing key: {e}"))?
            .to_string();

        let signing_key = Self::from_private_key(kid.clone(), private_key);

        if let Err(e) = store.save_signing_key(&haven_store::SigningKeyRecord {
            kid,
            private_pem,
            public_jwk: signing_key.jwk.to_string(),
        }) {
            tracing::warn!("failed to persist signing key, will regenerate on restart: {e}");
        }

        Ok(signing_key)
    }

    fn from_private_key(kid: String, private_key: RsaPrivateKey) -> Self {
        let public_key = RsaPublicKey::from(&private_key);
        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());

        let jwk = json!({
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": n,
            "e": e,
        });

        let private_pem = private_key
            .to_pkcs1_pem(rsa::pkcs1::LineEnding::LF)
            .expect("freshly generated key re-encodes");
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .expect("freshly generated PKCS#1 PEM decodes as an RSA encoding key");

        let public_pem = rsa::pkcs1::EncodeRsaPublicKey::to_pkcs1_pem(
            &public_key,
            rsa::pkcs1::LineEnding::LF,
        )
        .expect("public key re-encodes");
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .expect("freshly generated public PEM decodes as an RSA decoding key");

        Self {
            kid,
            encoding_key,
            decoding_key,
            jwk,
        }
    }

    /// The JWK Set served at `GET /oauth2/jwks`.
    pub fn jwk_set(&self) -> Value {
        json!({ "keys": [self.jwk] })
    }
}

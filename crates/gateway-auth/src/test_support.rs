//! Shared fixtures for unit tests: signing keys, token minting and a mock
//! identity provider.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub struct TestKey {
    pub kid: &'static str,
    pub n: &'static str,
    pub pem: &'static str,
}

pub const KEY_A: TestKey = TestKey {
    kid: "key-a",
    n: "w3I7g4jDDxuag1DP4vBzBkd0PchcEYW5Hx7hcADTfCRCCNVQP2F31pc4DB3cFZzNZR82iZv_X8VgniDIYREoswQKDQEhAMc_-1g8GfTa8eR-4_tTuCNAEV1cejYj7fu1jEYRS2lRhc9PiRBk-b4-kAeUhG3UmSVweAnD36OP6Ez4sykUCVecnYtUvWy27YMsdgFvma_wl4ohwwXuUekzfdebOnMTCTZkF6DatUgsIq1YLq3LojRvzQeFWePOJK06Ib9ObW3jvMuQ5b_6jQCCc7bNisxvwMx6cs0ghuPxSZx9xSmGZXQKZ8BxGqYtlHuJxfb0AK1IVcpVFhz6R1goVQ",
    pem: include_str!("testdata/rsa_key_a.pem"),
};

pub const KEY_B: TestKey = TestKey {
    kid: "key-b",
    n: "zKaHk9ybONcC_KATUYtvb6gIViM3ctXlE4PvJgElnv092LvEaLaAkwuU6EwgVDeGF11LT80gJP2bhUT5mzSy4JFvmN1WE5CXHycU-sUdoWN_4yuEERwk2m0dn0RcYHxw3AmD0akKVmXLI_nTuht32dhRfjqbqd8llKMzb4fN4HxGjA_DeuhpBhPoJzUfZ_JwDL9P003tgrKiHq5adgYCMxHAvLQkiWx-1k8altBssO4uxRs65E_haHPAO2X_D_ue6tnsupLEf5xgQ-x3Mme4rVCbmbDU8WCItB2tHiyJBKQYHYTtNmZqrRKBgRnmNdZWzvN7SoeAGHcz_2NG7-ch4Q",
    pem: include_str!("testdata/rsa_key_b.pem"),
};

pub const AUDIENCE: &str = "gateway-api";

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn jwks_json(keys: &[&TestKey]) -> Value {
    let keys: Vec<Value> = keys
        .iter()
        .map(|k| {
            json!({
                "kid": k.kid,
                "kty": "RSA",
                "alg": "RS256",
                "use": "sig",
                "n": k.n,
                "e": "AQAB"
            })
        })
        .collect();
    json!({ "keys": keys })
}

pub fn discovery_json(issuer: &str) -> Value {
    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{issuer}/authorize"),
        "token_endpoint": format!("{issuer}/token"),
        "jwks_uri": format!("{issuer}/jwks"),
        "response_types_supported": ["code", "id_token"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"]
    })
}

/// Standard claims for `issuer`, valid for an hour
pub fn claims(issuer: &str, sub: &str) -> Value {
    json!({
        "iss": issuer,
        "aud": AUDIENCE,
        "sub": sub,
        "iat": now(),
        "exp": now() + 3600
    })
}

pub fn mint(claims: &Value, key: &TestKey) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(key.kid.to_string());
    encode(
        &header,
        claims,
        &EncodingKey::from_rsa_pem(key.pem.as_bytes()).unwrap(),
    )
    .unwrap()
}

/// Serve discovery and a key set holding `keys`
pub async fn mount_provider(server: &MockServer, keys: &[&TestKey]) {
    Mock::given(method("GET"))
        .and(path("/.well-known/openid-configuration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(discovery_json(&server.uri())))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/jwks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(keys)))
        .mount(server)
        .await;
}

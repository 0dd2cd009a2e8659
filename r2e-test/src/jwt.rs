use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use r2e_security::{JwtClaimsValidator, SecurityConfig};
use serde_json::{json, Value};

const TEST_ISSUER: &str = "r2e-test";
const TEST_AUDIENCE: &str = "r2e-test-audience";
const TEST_SECRET: &[u8] = b"r2e-test-fixed-signing-secret";

/// Mints HS256 test tokens against a fixed in-process secret, and builds a
/// [`JwtClaimsValidator`] that accepts them — so a test can authenticate
/// against its own `TestApp` without a real JWKS endpoint.
pub struct TestJwt {
    secret: Vec<u8>,
}

impl TestJwt {
    pub fn new() -> Self {
        TestJwt { secret: TEST_SECRET.to_vec() }
    }

    /// A [`JwtClaimsValidator`] configured to accept tokens minted by this
    /// instance.
    pub fn claims_validator(&self) -> JwtClaimsValidator {
        let config = SecurityConfig::new("unused", TEST_ISSUER, TEST_AUDIENCE).with_allowed_algorithm(Algorithm::HS256);
        JwtClaimsValidator::new_with_static_key(DecodingKey::from_secret(&self.secret), config)
    }

    /// Mint a token for `sub` with the given roles, expiring in one hour.
    pub fn token(&self, sub: &str, roles: &[&str]) -> String {
        self.token_with_claims(sub, roles, None)
    }

    /// Mint a token for `sub` with roles and an optional email claim.
    pub fn token_with_claims(&self, sub: &str, roles: &[&str], email: Option<&str>) -> String {
        self.build(sub, roles, email, None)
    }

    /// Start a fluent [`TokenBuilder`] for a token with custom claims beyond
    /// `sub`/`roles`/`email`.
    pub fn builder(&self, sub: &str) -> TokenBuilder<'_> {
        TokenBuilder { jwt: self, sub: sub.to_string(), roles: Vec::new(), email: None, extra: Value::Object(Default::default()) }
    }

    fn build(&self, sub: &str, roles: &[&str], email: Option<&str>, extra: Option<Value>) -> String {
        let exp = chrono_like_now_plus_seconds(3600);
        let mut claims = json!({
            "sub": sub,
            "roles": roles,
            "iss": TEST_ISSUER,
            "aud": TEST_AUDIENCE,
            "exp": exp,
        });
        if let Some(email) = email {
            claims["email"] = json!(email);
        }
        if let Some(Value::Object(map)) = extra {
            let obj = claims.as_object_mut().expect("claims is an object");
            for (k, v) in map {
                obj.insert(k, v);
            }
        }
        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(&self.secret)).expect("failed to mint test token")
    }
}

impl Default for TestJwt {
    fn default() -> Self {
        Self::new()
    }
}

fn chrono_like_now_plus_seconds(seconds: u64) -> u64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).expect("system clock before epoch").as_secs();
    now + seconds
}

/// Fluent builder for tokens carrying claims beyond `sub`/`roles`/`email`.
pub struct TokenBuilder<'a> {
    jwt: &'a TestJwt,
    sub: String,
    roles: Vec<String>,
    email: Option<String>,
    extra: Value,
}

impl<'a> TokenBuilder<'a> {
    pub fn roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Set an arbitrary additional claim.
    pub fn claim(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.extra {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn build(self) -> String {
        let roles: Vec<&str> = self.roles.iter().map(String::as_str).collect();
        self.jwt.build(&self.sub, &roles, self.email.as_deref(), Some(self.extra))
    }
}

use std::str::FromStr;

/// Content-Security-Policy sent when no override is configured.
///
/// `default-src` and `script-src` accept any origin, inline scripts and
/// `eval`. Set `CONTENT_SECURITY_POLICY` to replace it.
pub const PERMISSIVE_CONTENT_SECURITY_POLICY: &str = "default-src *; \
script-src * data: 'unsafe-eval' 'unsafe-inline' blob:; \
base-uri 'self'; font-src 'self' https: data:; form-action 'self'; \
frame-ancestors 'self'; img-src 'self' data:; object-src 'none'; \
script-src-attr 'none'; style-src 'self' https: 'unsafe-inline'; \
upgrade-insecure-requests";

/// Deployment profile. Only `APP_ENV=development` selects `Development`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Development,
    Production,
}

impl Profile {
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some("development") => Self::Development,
            _ => Self::Production,
        }
    }

    pub fn is_development(self) -> bool {
        self == Self::Development
    }
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy)]
pub struct HashingConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashingConfig {
    // OWASP baseline for Argon2id.
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// Only paths under this prefix are rate limited.
    pub api_prefix: String,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    pub body_limit_bytes: usize,
    pub content_security_policy: String,
    pub cross_origin_resource_policy: String,
    /// `None` omits the header entirely.
    pub cross_origin_embedder_policy: Option<String>,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".into(),
            rate_limit_max: 100,
            rate_limit_window_secs: 60 * 60,
            body_limit_bytes: 10 * 1024,
            content_security_policy: PERMISSIVE_CONTENT_SECURITY_POLICY.into(),
            cross_origin_resource_policy: "cross-origin".into(),
            cross_origin_embedder_policy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub profile: Profile,
    pub database_url: Option<String>,
    /// Base of the links handed to the reset delivery.
    pub public_base_url: String,
    pub jwt: JwtConfig,
    pub hashing: HashingConfig,
    pub security: SecurityConfig,
}

/// Upper bound on session token lifetime: ten years.
pub const MAX_JWT_TTL_MINUTES: i64 = 10 * 365 * 24 * 60;

/// Rejects session lifetimes that are empty or too large to add to a timestamp.
pub fn check_jwt_ttl(minutes: i64) -> anyhow::Result<i64> {
    if !(1..=MAX_JWT_TTL_MINUTES).contains(&minutes) {
        anyhow::bail!("JWT_TTL_MINUTES must be between 1 and {MAX_JWT_TTL_MINUTES}, got {minutes}");
    }
    Ok(minutes)
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let profile = Profile::from_env_value(std::env::var("APP_ENV").ok().as_deref());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "userguard".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "userguard-users".into()),
            ttl_minutes: check_jwt_ttl(env_or("JWT_TTL_MINUTES", 90 * 24 * 60))?,
        };

        let defaults = HashingConfig::default();
        let hashing = HashingConfig {
            memory_kib: env_or("PASSWORD_HASH_MEMORY_KIB", defaults.memory_kib),
            iterations: env_or("PASSWORD_HASH_ITERATIONS", defaults.iterations),
            parallelism: env_or("PASSWORD_HASH_PARALLELISM", defaults.parallelism),
        };

        let defaults = SecurityConfig::default();
        let security = SecurityConfig {
            api_prefix: defaults.api_prefix,
            rate_limit_max: env_or("RATE_LIMIT_MAX", defaults.rate_limit_max),
            rate_limit_window_secs: env_or("RATE_LIMIT_WINDOW_SECS", defaults.rate_limit_window_secs),
            body_limit_bytes: env_or("BODY_LIMIT_BYTES", defaults.body_limit_bytes),
            content_security_policy: std::env::var("CONTENT_SECURITY_POLICY")
                .unwrap_or(defaults.content_security_policy),
            cross_origin_resource_policy: std::env::var("CROSS_ORIGIN_RESOURCE_POLICY")
                .unwrap_or(defaults.cross_origin_resource_policy),
            cross_origin_embedder_policy: std::env::var("CROSS_ORIGIN_EMBEDDER_POLICY").ok(),
        };

        Ok(Self {
            profile,
            database_url: std::env::var("DATABASE_URL").ok(),
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into()),
            jwt,
            hashing,
            security,
        })
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            profile: Profile::Production,
            database_url: None,
            public_base_url: "http://localhost:8080".into(),
            jwt: JwtConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
            },
            hashing: HashingConfig {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
            security: SecurityConfig::default(),
        }
    }
}

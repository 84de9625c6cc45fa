//! Constants shared by the authorizer, verifier and token broker

use std::time::Duration;

/// Cached tokens are not served once they are this close to expiry
pub const EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the token endpoint omits `expires_in`
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Budget for discovery, key-set and on-behalf-of requests
pub const SHORT_HTTP_TIMEOUT: Duration = Duration::from_secs(15);

/// Budget for silent (refresh token) acquisition
pub const LONG_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default token authority for the broker
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Claim used as the user identity when none is configured
pub const DEFAULT_USER_CLAIM: &str = "sub";

/// Hostname suffix the overlay proxy forwards with
pub const DEFAULT_TAILSCALE_HOST_SUFFIX: &str = ".ts.net";

/// Grant type for on-behalf-of exchange
pub const GRANT_TYPE_JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Grant type for silent acquisition
pub const GRANT_TYPE_REFRESH_TOKEN: &str = "refresh_token";

/// Identity-proxy headers
pub const HEADER_TAILSCALE_USER_LOGIN: &str = "tailscale-user-login";
pub const HEADER_TAILSCALE_USER_NAME: &str = "tailscale-user-name";

/// Forwarding headers set by the overlay proxy
pub const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";
pub const HEADER_FORWARDED_PROTO: &str = "x-forwarded-proto";
pub const HEADER_FORWARDED_HOST: &str = "x-forwarded-host";

/// Credential headers read by the HTTP middleware
#[cfg(feature = "http")]
pub const HEADER_GATEWAY_PASSWORD: &str = "x-gateway-password";
#[cfg(feature = "http")]
pub const HEADER_OIDC_TOKEN: &str = "x-oidc-token";

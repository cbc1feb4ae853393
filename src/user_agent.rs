//! User-Agent string for origin requests.

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/OpenFusionProject/OpenFusionClient";

/// Default User-Agent for cache downloads and listing requests.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("cachesync/{version} (+{PROJECT_UA_URL})")
}

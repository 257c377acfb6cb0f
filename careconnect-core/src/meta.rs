use once_cell::sync::Lazy;
use strum_macros::{AsRefStr, Display, EnumString};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum ReleaseType {
    Debug,
    Release,
}

pub static NAME: Lazy<&'static str> = Lazy::new(|| {
    if cfg!(debug_assertions) {
        "CareConnect-Debug"
    } else {
        "CareConnect"
    }
});

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const RELEASE: ReleaseType = if cfg!(debug_assertions) {
    ReleaseType::Debug
} else {
    ReleaseType::Release
};

/// User agent sent with every API request
pub fn user_agent() -> String {
    format!("careconnect/{VERSION} ({RELEASE})")
}

use chrono::FixedOffset;
use once_cell::sync::OnceCell;

static API_SECRET: OnceCell<String> = OnceCell::new();
static OPENAI_FALLBACK_KEY: OnceCell<Option<String>> = OnceCell::new();
static OPENAI_BASE_URL: OnceCell<String> = OnceCell::new();
static SESSION_KEY: OnceCell<Option<Vec<u8>>> = OnceCell::new();
static SITE_OFFSET: OnceCell<FixedOffset> = OnceCell::new();
static STAFF_USER_ID: OnceCell<i32> = OnceCell::new();

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Secret expected in the `x-api-secret` header of cron triggers.
pub fn get_api_secret() -> &'static str {
    API_SECRET.get().map(String::as_str).unwrap_or_default()
}

/// Used when the `openai_api_key` automation setting is empty.
pub fn get_openai_fallback_key() -> Option<&'static str> {
    OPENAI_FALLBACK_KEY.get().and_then(|k| k.as_deref())
}

pub fn get_openai_base_url() -> &'static str {
    OPENAI_BASE_URL
        .get()
        .map(String::as_str)
        .unwrap_or(DEFAULT_OPENAI_BASE_URL)
}

pub fn get_session_key() -> Option<&'static [u8]> {
    SESSION_KEY.get().and_then(|k| k.as_deref())
}

/// The site's local clock, used for blackout windows.
pub fn get_site_offset() -> FixedOffset {
    SITE_OFFSET
        .get()
        .copied()
        .unwrap_or_else(|| FixedOffset::east(9 * 3600))
}

/// Author whose posts surface as staff announcements in notifications.
pub fn get_staff_user_id() -> i32 {
    STAFF_USER_ID.get().copied().unwrap_or(33)
}

/// Reads process configuration from the environment.
/// Panics on missing or malformed required values.
pub fn init() {
    let secret = std::env::var("API_SECRET").expect("API_SECRET MISSING from .env");
    if secret.is_empty() {
        panic!("API_SECRET is empty!");
    }
    init_api_secret(secret);

    let key = std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    OPENAI_FALLBACK_KEY.set(key).ok();

    if let Ok(url) = std::env::var("OPENAI_BASE_URL") {
        OPENAI_BASE_URL
            .set(url.trim_end_matches('/').to_owned())
            .ok();
    }

    let session_key = std::env::var("SESSION_KEY").ok().map(|k| {
        if k.len() < 64 {
            panic!("SESSION_KEY must be at least 64 bytes!");
        }
        k.into_bytes()
    });
    SESSION_KEY.set(session_key).ok();

    if let Ok(hours) = std::env::var("SITE_UTC_OFFSET") {
        let hours = hours
            .parse::<i32>()
            .expect("SITE_UTC_OFFSET cannot be parsed as an integer");
        let offset = FixedOffset::east_opt(hours * 3600).expect("SITE_UTC_OFFSET is out of range");
        SITE_OFFSET.set(offset).ok();
    }

    if let Ok(id) = std::env::var("STAFF_USER_ID") {
        let id = id
            .parse::<i32>()
            .expect("STAFF_USER_ID cannot be parsed as an integer");
        STAFF_USER_ID.set(id).ok();
    }
}

/// Sets the cron secret. Later calls are ignored.
pub fn init_api_secret(secret: String) {
    if API_SECRET.set(secret).is_err() {
        log::debug!("API_SECRET was already initialized");
    }
}

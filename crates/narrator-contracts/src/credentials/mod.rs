mod cookie;
mod store;

pub use cookie::{
    read_cookie, Cookie, CookieJar, FileCookieJar, MemoryCookieJar, API_KEY_COOKIE_NAME,
    COOKIE_MAX_AGE_SECS,
};
pub use store::{
    is_valid_credential, mask_credential, CredentialStore, FocusTarget, KeyField,
    MIN_CREDENTIAL_LEN,
};

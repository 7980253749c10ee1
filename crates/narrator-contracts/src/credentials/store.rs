use anyhow::Result;

use super::cookie::{read_cookie, Cookie, CookieJar, API_KEY_COOKIE_NAME};

/// Credentials of this length or shorter are treated as absent.
pub const MIN_CREDENTIAL_LEN: usize = 10;

pub fn is_valid_credential(value: &str) -> bool {
    value.chars().count() > MIN_CREDENTIAL_LEN
}

/// Editable text field holding the API key.
pub trait KeyField {
    fn value(&self) -> String;
    fn set_value(&mut self, value: &str);
}

/// Field that receives focus once a key has been entered.
pub trait FocusTarget {
    fn focus(&mut self);
}

/// Holds the bearer token and mirrors it into a cookie jar.
pub struct CredentialStore {
    current: String,
    jar: Box<dyn CookieJar>,
    secure: bool,
}

impl CredentialStore {
    pub fn new(jar: Box<dyn CookieJar>, secure: bool) -> Self {
        Self {
            current: String::new(),
            jar,
            secure,
        }
    }

    /// Store whose cookies are marked `secure` when `origin` is HTTPS.
    pub fn for_origin(jar: Box<dyn CookieJar>, origin: &str) -> Self {
        let secure = origin.trim().to_ascii_lowercase().starts_with("https:");
        Self::new(jar, secure)
    }

    pub fn get(&self) -> &str {
        &self.current
    }

    pub fn is_valid(&self) -> bool {
        is_valid_credential(&self.current)
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn jar(&self) -> &dyn CookieJar {
        self.jar.as_ref()
    }

    pub fn into_jar(self) -> Box<dyn CookieJar> {
        self.jar
    }

    /// Persisted credential, decoded; empty when none.
    pub fn stored(&self) -> String {
        read_cookie(self.jar.as_ref(), API_KEY_COOKIE_NAME)
    }

    pub fn apply(&mut self, value: &str, persist: bool) -> Result<()> {
        self.current = value.to_string();
        if persist {
            let cookie = Cookie::persistent(API_KEY_COOKIE_NAME, value, self.secure);
            self.jar.set_cookie(&cookie.to_header())?;
        }
        Ok(())
    }

    /// Applies and persists a non-empty `input`; otherwise restores the
    /// persisted credential without writing it back. An invalid result is
    /// logged, not raised: the gateway rejects it when a request is made.
    pub fn load(&mut self, input: Option<&str>) -> Result<&str> {
        match input.filter(|value| !value.is_empty()) {
            Some(value) => self.apply(value, true)?,
            None => {
                let stored = self.stored();
                if !stored.is_empty() {
                    self.apply(&stored, false)?;
                }
            }
        }
        if !self.is_valid() {
            tracing::error!("Need an api-key");
        }
        Ok(&self.current)
    }

    /// Populates `field` from the persisted credential, if any, and applies it.
    pub fn setup(&mut self, field: &mut dyn KeyField) -> Result<()> {
        let stored = self.stored();
        if !stored.is_empty() {
            field.set_value(&stored);
            self.apply(&stored, false)?;
        }
        Ok(())
    }

    /// Change handler for the key field: reloads from the field's value and
    /// moves focus on to the action prompt. A jar write failure is returned
    /// after the key is already live and focus has moved.
    pub fn on_key_input(
        &mut self,
        field: &dyn KeyField,
        prompt: Option<&mut dyn FocusTarget>,
    ) -> Result<String> {
        let value = field.value();
        let loaded = self.load(Some(value.as_str())).map(str::to_string);
        if let Some(prompt) = prompt {
            prompt.focus();
        }
        loaded
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("current", &mask_credential(&self.current))
            .field("secure", &self.secure)
            .finish()
    }
}

/// Last four characters behind an ellipsis; empty stays empty.
pub fn mask_credential(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let tail: String = value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect();
    format!("…{tail}")
}

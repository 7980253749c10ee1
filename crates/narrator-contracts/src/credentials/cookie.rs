use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};

pub const API_KEY_COOKIE_NAME: &str = "openai_api_key";
pub const COOKIE_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 365;

/// One `Set-Cookie`-style record. `value` is held decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub max_age_secs: u64,
    pub path: String,
    pub same_site: String,
    pub secure: bool,
}

impl Cookie {
    /// Root-scoped, strict same-site cookie that lives for a year.
    pub fn persistent(name: &str, value: &str, secure: bool) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
            max_age_secs: COOKIE_MAX_AGE_SECS,
            path: "/".to_string(),
            same_site: "strict".to_string(),
            secure,
        }
    }

    pub fn to_header(&self) -> String {
        let secure = if self.secure { "; secure" } else { "" };
        format!(
            "{}={}; max-age={}; path={}; samesite={}{}",
            self.name,
            urlencoding::encode(&self.value),
            self.max_age_secs,
            self.path,
            self.same_site,
            secure
        )
    }
}

/// Cookie storage with `document.cookie` semantics: reading yields the live
/// `name=value` pairs joined by `"; "`, writing takes one full header.
pub trait CookieJar {
    fn cookie_string(&self) -> String;
    fn set_cookie(&mut self, header: &str) -> Result<()>;
}

/// Decoded value of the `name` cookie, or an empty string.
pub fn read_cookie(jar: &dyn CookieJar, name: &str) -> String {
    let listing = jar.cookie_string();
    let prefix = format!("{name}=");
    let Some(row) = listing.split("; ").find(|row| row.starts_with(&prefix)) else {
        return String::new();
    };
    let raw = row[prefix.len()..].split('=').next().unwrap_or("");
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(err) => {
            tracing::warn!(cookie = name, error = %err, "ignoring undecodable cookie");
            String::new()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedHeader {
    name: String,
    raw_value: String,
    max_age_secs: Option<i64>,
    expires: Option<DateTime<Utc>>,
}

fn parse_header(header: &str) -> Result<ParsedHeader> {
    let mut parts = header.split(';').map(str::trim);
    let pair = parts.next().unwrap_or("");
    let Some((name, raw_value)) = pair.split_once('=') else {
        bail!("cookie header missing name=value: {header}");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("cookie header missing name: {header}");
    }
    let mut parsed = ParsedHeader {
        name: name.to_string(),
        raw_value: raw_value.trim().to_string(),
        max_age_secs: None,
        expires: None,
    };
    for attribute in parts {
        let (key, value) = attribute.split_once('=').unwrap_or((attribute, ""));
        match key.trim().to_ascii_lowercase().as_str() {
            "max-age" => parsed.max_age_secs = value.trim().parse::<i64>().ok(),
            "expires" => {
                parsed.expires = DateTime::parse_from_rfc2822(value.trim())
                    .ok()
                    .map(|stamp| stamp.with_timezone(&Utc));
            }
            _ => {}
        }
    }
    Ok(parsed)
}

/// In-memory jar, handy for tests and short-lived sessions.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookieJar {
    entries: Vec<(String, String)>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CookieJar for MemoryCookieJar {
    fn cookie_string(&self) -> String {
        self.entries
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<String>>()
            .join("; ")
    }

    fn set_cookie(&mut self, header: &str) -> Result<()> {
        let parsed = parse_header(header)?;
        self.entries.retain(|(name, _)| name != &parsed.name);
        if parsed.max_age_secs.map(|secs| secs > 0).unwrap_or(true) {
            self.entries.push((parsed.name, parsed.raw_value));
        }
        Ok(())
    }
}

/// Jar persisted as one header per line. `max-age` is pinned to an absolute
/// `expires` stamp on write; expired lines are skipped on read.
#[derive(Debug, Clone)]
pub struct FileCookieJar {
    path: PathBuf,
}

impl FileCookieJar {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_lines(&self) -> Vec<String> {
        fs::read_to_string(&self.path)
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn live_entries(&self, now: DateTime<Utc>) -> Vec<(ParsedHeader, String)> {
        self.read_lines()
            .into_iter()
            .filter_map(|line| parse_header(&line).ok().map(|parsed| (parsed, line)))
            .filter(|(parsed, _)| parsed.expires.map(|stamp| stamp > now).unwrap_or(true))
            .collect()
    }
}

impl CookieJar for FileCookieJar {
    fn cookie_string(&self) -> String {
        self.live_entries(Utc::now())
            .into_iter()
            .map(|(parsed, _)| format!("{}={}", parsed.name, parsed.raw_value))
            .collect::<Vec<String>>()
            .join("; ")
    }

    fn set_cookie(&mut self, header: &str) -> Result<()> {
        let now = Utc::now();
        let parsed = parse_header(header)?;
        let mut lines: Vec<String> = self
            .live_entries(now)
            .into_iter()
            .filter(|(existing, _)| existing.name != parsed.name)
            .map(|(_, line)| line)
            .collect();

        let max_age = parsed.max_age_secs.unwrap_or(COOKIE_MAX_AGE_SECS as i64);
        if max_age > 0 {
            let expires = Duration::try_seconds(max_age)
                .and_then(|delta| now.checked_add_signed(delta))
                .with_context(|| format!("cookie max-age out of range: {max_age}"))?;
            let kept: Vec<&str> = header
                .split(';')
                .map(str::trim)
                .filter(|part| !part.to_ascii_lowercase().starts_with("expires="))
                .collect();
            lines.push(format!("{}; expires={}", kept.join("; "), expires.to_rfc2822()));
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        let mut body = lines.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        write_private(&self.path, &body)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Owner-only on unix; the jar holds bearer tokens in clear text.
fn write_private(path: &Path, body: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }
    file.write_all(body.as_bytes())
}

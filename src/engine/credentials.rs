// Credential store - per-platform cookies from ~/.sharegrab/cookies.json
//
// Accepted entry shapes:
//   {"weibo": {"SUB": "...", "SUBP": "..."}}
//   {"weibo": {"cookies": {"SUB": "..."}, "user_agent": "...", "updated_at": 1700000000}}

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::errors::{Error, Result};
use super::models::Platform;

/// Cookies (and optional user agent) for one platform
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    cookies: BTreeMap<String, String>,
    user_agent: Option<String>,
}

impl Credentials {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            cookies: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.cookies.get(key).map(|v| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.cookies.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// `k=v; k2=v2`, or `None` when there are no cookies
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Copy with extra cookies layered on top
    pub fn merged<'a, I>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut merged = self.clone();
        for (k, v) in extra {
            merged.cookies.insert(k.to_string(), v.to_string());
        }
        merged
    }
}

/// Cookies that prove a logged-in session
pub fn session_cookies(platform: Platform) -> &'static [&'static str] {
    match platform {
        Platform::Weibo => &["SUB"],
        Platform::Zhihu => &["z_c0"],
        Platform::Kuaishou => &["userId", "kuaishou.server.web_st"],
        Platform::Xiaohongshu => &["web_session"],
        Platform::Douyin => &["sessionid", "sessionid_ss"],
        Platform::Bilibili => &["SESSDATA"],
        Platform::Goofish => &["_m_h5_tk"],
        Platform::Youtube | Platform::Twitter => &[],
    }
}

/// Immutable per-process credential store
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    source: Option<PathBuf>,
    entries: HashMap<Platform, Credentials>,
    empty: Credentials,
}

impl CredentialStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `~/.sharegrab/cookies.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".sharegrab").join("cookies.json"))
    }

    /// Load from `path`. A missing file yields an empty store; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %origin, "no credentials file, continuing without cookies");
                return Ok(Self {
                    source: Some(path.to_path_buf()),
                    ..Self::default()
                });
            }
            Err(e) => return Err(Error::config(origin, e.to_string())),
        };
        let mut store = Self::parse(&text, &origin)?;
        store.source = Some(path.to_path_buf());
        debug!(path = %origin, platforms = store.entries.len(), "credentials loaded");
        Ok(store)
    }

    pub fn parse(text: &str, origin: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        let root: Value = serde_json::from_str(text)
            .map_err(|e| Error::config(origin, format!("not valid JSON: {}", e)))?;
        let Value::Object(root) = root else {
            return Err(Error::config(origin, "top level must be an object"));
        };

        let mut entries = HashMap::new();
        for (name, entry) in &root {
            let platform = match name.parse::<Platform>() {
                Ok(platform) => platform,
                Err(_) => {
                    warn!(path = origin, platform = %name, "unknown platform in credentials file, skipped");
                    continue;
                }
            };
            let credentials = Self::parse_entry(name, entry, origin)?;
            entries.insert(platform, credentials);
        }

        Ok(Self {
            source: None,
            entries,
            empty: Credentials::default(),
        })
    }

    fn parse_entry(name: &str, entry: &Value, origin: &str) -> Result<Credentials> {
        let Value::Object(fields) = entry else {
            return Err(Error::config(origin, format!("entry '{}' must be an object", name)));
        };

        match fields.get("cookies") {
            Some(Value::Object(cookies)) => {
                let user_agent = match fields.get("user_agent") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(ua)) => Some(ua.clone()),
                    Some(_) => {
                        return Err(Error::config(
                            origin,
                            format!("'{}.user_agent' must be a string", name),
                        ))
                    }
                };
                let cookies = Self::string_map(name, cookies, origin)?;
                Ok(Credentials {
                    cookies,
                    user_agent,
                })
            }
            Some(_) => Err(Error::config(
                origin,
                format!("'{}.cookies' must be an object", name),
            )),
            None => Ok(Credentials {
                cookies: Self::string_map(name, fields, origin)?,
                user_agent: None,
            }),
        }
    }

    fn string_map(name: &str, map: &Map<String, Value>, origin: &str) -> Result<BTreeMap<String, String>> {
        map.iter()
            .map(|(key, value)| match value {
                Value::String(v) => Ok((key.clone(), v.clone())),
                _ => Err(Error::config(
                    origin,
                    format!("cookie '{}.{}' must be a string", name, key),
                )),
            })
            .collect()
    }

    /// Credentials for `platform`; empty when none are configured
    pub fn get(&self, platform: Platform) -> &Credentials {
        self.entries.get(&platform).unwrap_or(&self.empty)
    }

    pub fn with_entry(mut self, platform: Platform, credentials: Credentials) -> Self {
        self.entries.insert(platform, credentials);
        self
    }

    /// Whether the login-proof cookies for `platform` are present
    pub fn is_authenticated(&self, platform: Platform) -> bool {
        let required = session_cookies(platform);
        let credentials = self.get(platform);
        !required.is_empty() && required.iter().any(|key| credentials.get(key).is_some())
    }

    pub fn platforms(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.entries.keys().copied().collect();
        platforms.sort();
        platforms
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_unconfigured_platform_is_empty() {
        let store = CredentialStore::parse(r#"{"weibo": {"SUB": "x"}}"#, "test").unwrap();
        let creds = store.get(Platform::Douyin);
        assert!(creds.is_empty());
        assert_eq!(creds.cookie_header(), None);
        assert_eq!(store.get(Platform::Weibo).get("SUB"), Some("x"));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::load(&dir.path().join("cookies.json")).unwrap();
        assert!(store.platforms().is_empty());
        assert!(store.get(Platform::Zhihu).is_empty());
    }

    #[test]
    fn test_auth_shape_with_user_agent() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"zhihu": {{"cookies": {{"z_c0": "token", "d_c0": "dev"}}, "user_agent": "UA/1", "updated_at": 1700000000}}}}"#
        )
        .unwrap();
        let store = CredentialStore::load(file.path()).unwrap();
        let zhihu = store.get(Platform::Zhihu);
        assert_eq!(zhihu.len(), 2);
        assert_eq!(zhihu.user_agent(), Some("UA/1"));
        assert!(store.is_authenticated(Platform::Zhihu));
        assert!(!store.is_authenticated(Platform::Weibo));
    }

    #[test]
    fn test_malformed_file_fails_fast() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"weibo": {{"SUB": "x"}}, "zhihu": {{"z_c0": 42}}}}"#).unwrap();
        let err = CredentialStore::load(file.path()).unwrap_err();
        match err {
            Error::Config { message, .. } => assert!(message.contains("zhihu.z_c0")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            CredentialStore::parse("{not json", "test"),
            Err(Error::Config { .. })
        ));
        assert!(matches!(
            CredentialStore::parse(r#"["weibo"]"#, "test"),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn test_unknown_platform_skipped_and_empty_file() {
        let store = CredentialStore::parse(r#"{"myspace": {"a": "b"}}"#, "test").unwrap();
        assert!(store.platforms().is_empty());
        assert!(CredentialStore::parse("  ", "test").unwrap().platforms().is_empty());
    }

    #[test]
    fn test_cookie_header() {
        let creds = Credentials::from_pairs([("b", "2"), ("a", "1")]);
        assert_eq!(creds.cookie_header().as_deref(), Some("a=1; b=2"));
        assert_eq!(Credentials::default().cookie_header(), None);
    }
}

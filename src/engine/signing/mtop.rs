// Alibaba mtop H5 gateway signing (Goofish)

use url::Url;

use crate::engine::errors::{Error, Result};
use crate::engine::models::Platform;

pub const APP_KEY: &str = "12574478";
pub const TOKEN_COOKIE: &str = "_m_h5_tk";
const GATEWAY: &str = "https://h5api.m.goofish.com/h5";

/// Token part of an `_m_h5_tk` cookie (`<token>_<expiry>`)
pub fn token_from_cookie(value: &str) -> Option<&str> {
    value.split('_').next().filter(|t| !t.is_empty())
}

/// md5 of `token&t&appKey&data`
pub fn sign(token: &str, timestamp: &str, app_key: &str, data: &str) -> String {
    format!(
        "{:x}",
        md5::compute(format!("{}&{}&{}&{}", token, timestamp, app_key, data))
    )
}

/// Signed GET URL for `api` with the JSON `data` argument
pub fn request_url(api: &str, version: &str, data: &str, token: &str, timestamp: &str) -> Result<String> {
    let base = format!("{}/{}/{}/", GATEWAY, api, version);
    let signature = sign(token, timestamp, APP_KEY, data);
    let url = Url::parse_with_params(
        &base,
        &[
            ("jsv", "2.7.4"),
            ("appKey", APP_KEY),
            ("t", timestamp),
            ("sign", signature.as_str()),
            ("api", api),
            ("v", version),
            ("type", "originaljson"),
            ("dataType", "json"),
            ("data", data),
        ],
    )
    .map_err(|e| Error::parse(Platform::Goofish, format!("mtop url: {}", e)))?;
    Ok(url.to_string())
}

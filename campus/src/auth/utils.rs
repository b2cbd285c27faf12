//! Cookie helpers shared by the JSON auth endpoints and the HTML pages.

use axum::http::{HeaderMap, header};

use crate::config::Config;

/// Value of the named cookie in a request's `Cookie` headers.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn cookie_attributes(config: &Config, max_age: u64) -> String {
    let session = &config.auth.session;
    let secure = if session.cookie_secure { "; Secure" } else { "" };
    format!("Path=/; HttpOnly; SameSite={}; Max-Age={max_age}{secure}", session.cookie_same_site)
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, config: &Config) -> String {
    format!(
        "{}={token}; {}",
        config.auth.session.cookie_name,
        cookie_attributes(config, config.auth.session.timeout.as_secs())
    )
}

/// `Set-Cookie` value that removes the session cookie.
pub fn expired_session_cookie(config: &Config) -> String {
    format!("{}=; {}", config.auth.session.cookie_name, cookie_attributes(config, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; campus_session=abc.def; other=1"));
        assert_eq!(read_cookie(&headers, "campus_session").as_deref(), Some("abc.def"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_session_cookie_attributes() {
        let mut config = Config::default();
        config.auth.session.cookie_secure = false;
        let cookie = session_cookie("tok", &config);
        assert!(cookie.starts_with("campus_session=tok; Path=/; HttpOnly; SameSite=lax; Max-Age=86400"));
        assert!(!cookie.contains("Secure"));

        config.auth.session.cookie_secure = true;
        assert!(expired_session_cookie(&config).ends_with("Max-Age=0; Secure"));
    }
}

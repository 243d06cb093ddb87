use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

/// A cookie exported from a browser store:
/// `{name, value, domain?, path?}`. Domain and path default to the
/// TradingView site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CookieEntry {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl CookieEntry {
    pub fn domain(&self) -> &str {
        self.domain.as_deref().unwrap_or(".tradingview.com")
    }

    pub fn path(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }
}

/// Session cookies in whichever shape the caller has them.
#[derive(Debug, Clone)]
pub enum Cookies {
    /// Plain `name -> value` mapping.
    Map(HashMap<String, String>),
    /// Browser-export list with optional domain/path per entry.
    List(Vec<CookieEntry>),
    /// A reqwest cookie jar, used as the client's cookie provider.
    Jar(Arc<reqwest::cookie::Jar>),
}

impl Cookies {
    /// The `Cookie:` header for map/list inputs. Jar cookies are attached
    /// through the client instead and yield `None` here.
    pub fn header_value(&self) -> Option<String> {
        match self {
            Cookies::Map(map) => {
                if map.is_empty() {
                    return None;
                }
                Some(
                    map.iter()
                        .map(|(name, value)| format!("{name}={value}"))
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            }
            Cookies::List(entries) => {
                if entries.is_empty() {
                    return None;
                }
                Some(
                    entries
                        .iter()
                        .map(|entry| format!("{}={}", entry.name, entry.value))
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            }
            Cookies::Jar(_) => None,
        }
    }
}

impl From<HashMap<String, String>> for Cookies {
    fn from(map: HashMap<String, String>) -> Self {
        Cookies::Map(map)
    }
}

impl From<Vec<CookieEntry>> for Cookies {
    fn from(entries: Vec<CookieEntry>) -> Self {
        Cookies::List(entries)
    }
}

impl From<Arc<reqwest::cookie::Jar>> for Cookies {
    fn from(jar: Arc<reqwest::cookie::Jar>) -> Self {
        Cookies::Jar(jar)
    }
}

/// What the logged-in front page reveals about the session. Any field can
/// be absent when the cookies are stale or anonymous.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub auth_token: Option<String>,
    pub id: Option<u64>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_header_from_map() {
        let cookies = Cookies::from(HashMap::from([(
            "sessionid".to_owned(),
            "abc123".to_owned(),
        )]));
        assert_eq!(cookies.header_value().unwrap(), "sessionid=abc123");
    }

    #[test]
    fn test_cookie_header_from_list_with_defaults() {
        let entries: Vec<CookieEntry> = serde_json::from_str(
            r#"[{"name": "sessionid", "value": "abc"}, {"name": "sessionid_sign", "value": "xyz", "domain": ".tradingview.com"}]"#,
        )
        .unwrap();
        assert_eq!(entries[0].domain(), ".tradingview.com");
        assert_eq!(entries[0].path(), "/");

        let cookies = Cookies::from(entries);
        assert_eq!(
            cookies.header_value().unwrap(),
            "sessionid=abc; sessionid_sign=xyz"
        );
    }

    #[test]
    fn test_empty_cookies_have_no_header() {
        assert!(Cookies::Map(HashMap::new()).header_value().is_none());
        assert!(Cookies::List(vec![]).header_value().is_none());
    }
}

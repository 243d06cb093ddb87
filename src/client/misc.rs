use crate::{
    Error, Result,
    chart::study::StudyMetadata,
    user::{Cookies, UserData},
    utils::build_request,
};
use regex::Regex;
use reqwest::Response;
use serde_json::Value;
use tracing::{debug, error};
use urlencoding::encode;

static PINE_FACADE_URL: &str = "https://pine-facade.tradingview.com/pine-facade";

lazy_static::lazy_static! {
    static ref AUTH_TOKEN_REGEX: Regex =
        Regex::new(r#""auth_token":"(.*?)""#).expect("Failed to compile regex");
    static ref USER_ID_REGEX: Regex =
        Regex::new(r#""id":([0-9]{1,10}),"#).expect("Failed to compile regex");
    static ref USERNAME_REGEX: Regex =
        Regex::new(r#""username":"(.*?)""#).expect("Failed to compile regex");
}

async fn get(cookies: Option<&Cookies>, url: &str, queries: &[(&str, &str)]) -> Result<Response> {
    let client = build_request(cookies)?;
    let response = client.get(url).query(queries).send().await?;
    Ok(response)
}

/// Fetches and decodes a script's metadata from the pine facade. A
/// non-`success` response surfaces its `reason`; shape drift in the body is
/// tolerated field by field.
#[tracing::instrument(skip(cookies))]
pub async fn get_indicator_metadata(
    cookies: Option<&Cookies>,
    indicator_id: &str,
    version: &str,
) -> Result<StudyMetadata> {
    let url = format!(
        "{}/translate/{}/{}",
        PINE_FACADE_URL,
        encode(indicator_id),
        encode(version)
    );
    debug!("URL: {}", url);
    let response: Value = get(cookies, &url, &[]).await?.json().await?;
    StudyMetadata::from_translate_response(&response, indicator_id, version)
}

/// Scrapes the logged-in front page for the session's auth token, user id,
/// and username. Absent fields stay `None`.
pub async fn get_user_data(cookies: Option<&Cookies>) -> Result<UserData> {
    let body = get(cookies, "https://www.tradingview.com/", &[])
        .await?
        .text()
        .await?;

    Ok(UserData {
        auth_token: AUTH_TOKEN_REGEX
            .captures(&body)
            .map(|caps| caps[1].to_owned()),
        id: USER_ID_REGEX
            .captures(&body)
            .and_then(|caps| caps[1].parse().ok()),
        username: USERNAME_REGEX
            .captures(&body)
            .map(|caps| caps[1].to_owned()),
    })
}

/// All private (saved) scripts of the cookie session.
pub async fn list_private_indicators(cookies: Option<&Cookies>) -> Result<Value> {
    let response = get(
        cookies,
        &format!("{PINE_FACADE_URL}/list"),
        &[("filter", "saved")],
    )
    .await?;
    Ok(response.json().await?)
}

/// Chart layouts stored for the user.
pub async fn list_layouts(cookies: Option<&Cookies>) -> Result<Value> {
    let response = get(
        cookies,
        "https://www.tradingview.com/chart-storage-v2/charts/",
        &[],
    )
    .await?;
    Ok(response.json().await?)
}

/// The access token guarding one layout's stored sources.
pub async fn get_chart_token(
    cookies: Option<&Cookies>,
    layout_id: &str,
    user_id: u64,
) -> Result<String> {
    let response: Value = get(
        cookies,
        "https://www.tradingview.com/chart-token",
        &[("image_url", layout_id), ("user_id", &user_id.to_string())],
    )
    .await?
    .json()
    .await?;

    match response.get("token").and_then(Value::as_str) {
        Some(token) => Ok(token.to_owned()),
        None => {
            error!("no chart token in response: {}", response);
            Err(Error::Generic("No chart token found".into()))
        }
    }
}

/// All sources (indicators and drawings) saved in one layout.
pub async fn get_layout_sources(
    cookies: Option<&Cookies>,
    layout_id: &str,
    chart_token: &str,
) -> Result<Value> {
    let url = format!(
        "https://charts-storage.tradingview.com/charts-storage/get/layout/{}/sources",
        encode(layout_id)
    );
    let response = get(
        cookies,
        &url,
        &[("chart_id", "_shared"), ("jwt", chart_token)],
    )
    .await?;
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_data_regexes() {
        let body = r#"window.initData = {"auth_token":"tok-123","user":{"id":4242421,"username":"trader_joe","plan":"pro"}}"#;
        assert_eq!(
            AUTH_TOKEN_REGEX.captures(body).map(|c| c[1].to_owned()),
            Some("tok-123".to_owned())
        );
        assert_eq!(
            USER_ID_REGEX
                .captures(body)
                .and_then(|c| c[1].parse::<u64>().ok()),
            Some(4242421)
        );
        assert_eq!(
            USERNAME_REGEX.captures(body).map(|c| c[1].to_owned()),
            Some("trader_joe".to_owned())
        );
    }

    #[test]
    fn test_user_data_regexes_tolerate_absence() {
        let body = "<html>logged out front page</html>";
        assert!(AUTH_TOKEN_REGEX.captures(body).is_none());
        assert!(USER_ID_REGEX.captures(body).is_none());
        assert!(USERNAME_REGEX.captures(body).is_none());
    }
}

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, DATE, SET_COOKIE};
use serde_json::Value;

use crate::error::AmoError;

/// Response as handed back by a [`Transport`](crate::transport::Transport),
/// before any status or body interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// All `Set-Cookie` values, in header order.
    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: HeaderMap,
}

impl ResponseInfo {
    /// Server time of the response, taken from the `Date` header.
    pub fn date(&self) -> Option<DateTime<Utc>> {
        let value = self.headers.get(DATE)?.to_str().ok()?;
        parse_http_date(value)
    }
}

/// Uniform result of a successful domain request.
#[derive(Debug, Clone)]
pub struct DomainResponse {
    pub data: Value,
    pub info: ResponseInfo,
    pub raw: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseOptions {
    /// Keep the undecoded body on successful responses.
    pub keep_raw: bool,
}

/// Turn a raw transport response into a [`DomainResponse`].
///
/// Non-2xx statuses become [`AmoError::HttpStatus`] with whatever JSON could
/// be decoded from the body; a 2xx body that is not JSON becomes
/// [`AmoError::InvalidBody`]. An empty 2xx body decodes to `null`.
pub fn normalize(raw: RawResponse, options: &ResponseOptions) -> Result<DomainResponse, AmoError> {
    let RawResponse {
        status,
        headers,
        body,
    } = raw;

    if !(200..300).contains(&status) {
        let data = serde_json::from_str(&body).unwrap_or(Value::Null);
        return Err(AmoError::HttpStatus {
            status,
            data,
            raw: body,
        });
    }

    let data = if body.trim().is_empty() {
        Value::Null
    } else {
        serde_json::from_str(&body).map_err(|e| AmoError::InvalidBody {
            status,
            raw: body.clone(),
            reason: e.to_string(),
        })?
    };

    Ok(DomainResponse {
        data,
        info: ResponseInfo { status, headers },
        raw: options.keep_raw.then_some(body),
    })
}

/// Parse an HTTP-date / RFC 2822 timestamp, also accepting the legacy
/// `Wdy, DD-Mon-YYYY HH:MM:SS GMT` cookie form.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use reqwest::header::HeaderValue;

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse::new(status, HeaderMap::new(), body)
    }

    #[test]
    fn normalizes_json_body() {
        let resp = normalize(raw(200, r#"{"id": 7}"#), &ResponseOptions::default()).unwrap();
        assert_eq!(resp.data["id"], 7);
        assert_eq!(resp.info.status, 200);
        assert!(resp.raw.is_none());
    }

    #[test]
    fn keeps_raw_when_asked() {
        let options = ResponseOptions { keep_raw: true };
        let resp = normalize(raw(200, r#"{"id": 7}"#), &options).unwrap();
        assert_eq!(resp.raw.as_deref(), Some(r#"{"id": 7}"#));
    }

    #[test]
    fn empty_body_is_null() {
        let resp = normalize(raw(204, ""), &ResponseOptions::default()).unwrap();
        assert!(resp.data.is_null());
    }

    #[test]
    fn non_json_body_is_invalid_body_error() {
        let err = normalize(raw(200, "<html>oops</html>"), &ResponseOptions::default())
            .unwrap_err();
        match err {
            AmoError::InvalidBody { status, raw, .. } => {
                assert_eq!(status, 200);
                assert_eq!(raw, "<html>oops</html>");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_2xx_carries_parsed_data() {
        let err = normalize(
            raw(400, r#"{"error": "invalid_grant", "hint": "expired"}"#),
            &ResponseOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert_eq!(err.data().unwrap()["error"], "invalid_grant");
    }

    #[test]
    fn non_2xx_with_text_body_has_null_data() {
        let err = normalize(raw(502, "Bad Gateway"), &ResponseOptions::default()).unwrap_err();
        match err {
            AmoError::HttpStatus { data, raw, .. } => {
                assert!(data.is_null());
                assert_eq!(raw, "Bad Gateway");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn date_header_is_parsed() {
        let mut headers = HeaderMap::new();
        headers.insert(DATE, HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"));
        let info = ResponseInfo {
            status: 200,
            headers,
        };
        assert_eq!(
            info.date(),
            Some(Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap())
        );
    }

    #[test]
    fn legacy_cookie_date_is_parsed() {
        assert_eq!(
            parse_http_date("Wed, 21-Oct-2026 07:28:00 GMT"),
            Some(Utc.with_ymd_and_hms(2026, 10, 21, 7, 28, 0).unwrap())
        );
    }

    #[test]
    fn garbage_date_is_none() {
        assert!(parse_http_date("tomorrow-ish").is_none());
    }

    #[test]
    fn collects_all_set_cookie_headers() {
        let mut headers = HeaderMap::new();
        headers.append(SET_COOKIE, HeaderValue::from_static("a=1; path=/"));
        headers.append(SET_COOKIE, HeaderValue::from_static("b=2; path=/"));
        let resp = RawResponse::new(200, headers, "{}");
        assert_eq!(resp.set_cookies(), vec!["a=1; path=/", "b=2; path=/"]);
    }
}

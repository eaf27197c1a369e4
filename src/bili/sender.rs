use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use md5::{Digest, Md5};
use rand::Rng;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, COOKIE, HeaderMap, HeaderValue, REFERER, USER_AGENT};

use crate::bili::error::DownloadError;
use crate::bili::sender::entries::{ApiEnvelope, SplashEntry, SplashList, WallpaperPage};

pub(crate) mod entries;

/// Splash brand-list endpoint of the app API.
const SPLASH_API: &str = "https://app.bilibili.com/x/v2/splash/brand/list";

/// Wallpaper listing endpoint ("link draw" documents of another user).
const WALLPAPER_API: &str = "https://api.vc.bilibili.com/link_draw/v1/doc/others";

/// UID of the wallpaper album account.
pub(crate) const WALLPAPER_UID: u64 = 6823116;

/// App key/secret pair used to sign requests against the app API.
const APP_KEY: &str = "1d8b6e7d45233436";
const APP_SECRET: &str = "560c52ccd288fed045859ed18bffd973";

const USER_AGENT_VALUE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
const REFERER_VALUE: &str = "https://www.bilibili.com/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Retry budget for a single request, transient failures only.
const MAX_ATTEMPTS: u32 = 7;
const RETRY_BASE_MS: u64 = 500;
const RETRY_JITTER_MS: u64 = 750;

/// Issues all HTTP calls for the downloader: listing requests against the two
/// APIs and raw image fetches. Wraps a single blocking client behind an [Arc]
/// so it can be cloned around cheaply.
#[derive(Debug, Clone)]
pub(crate) struct RequestSender {
    client: Arc<Client>,
}

impl RequestSender {
    /// Creates the sender, optionally routing all traffic through a proxy
    /// (`http://`, `https://` or `socks5h://` URLs are accepted by reqwest).
    pub(crate) fn new(proxy: Option<&str>) -> Result<Self, anyhow::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(REFERER, HeaderValue::from_static(REFERER_VALUE));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));

        let mut builder = Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT);
        if let Some(proxy_url) = proxy {
            trace!("Routing requests through proxy: {proxy_url}");
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(RequestSender {
            client: Arc::new(builder.build()?),
        })
    }

    /// Fetches the current splash screen listing via a signed app-API call.
    pub(crate) fn fetch_splash_list(&self) -> Result<Vec<SplashEntry>, DownloadError> {
        let query = signed_query(vec![("appkey".to_string(), APP_KEY.to_string())]);
        let body = self.get_text(SPLASH_API, &query, None)?;
        let list: SplashList = parse_api_response(&body)?;
        Ok(list.list)
    }

    /// Fetches one page of the wallpaper album listing. The session cookie is
    /// required by the endpoint for full-size image URLs.
    pub(crate) fn fetch_wallpaper_page(
        &self,
        page: u64,
        page_size: u32,
        sessdata: &str,
    ) -> Result<WallpaperPage, DownloadError> {
        let query = vec![
            ("biz".to_string(), "0".to_string()),
            ("poster_uid".to_string(), WALLPAPER_UID.to_string()),
            ("page_num".to_string(), page.to_string()),
            ("page_size".to_string(), page_size.to_string()),
        ];
        let cookie = format!("SESSDATA={sessdata}");
        let body = self.get_text(WALLPAPER_API, &query, Some(&cookie))?;
        parse_api_response(&body)
    }

    /// Downloads the raw bytes behind a URL, retrying transient failures.
    pub(crate) fn get_bytes(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        self.get_with_retry(url, &[], None)
    }

    /// GETs a URL and returns the body as text. The bodies here are JSON, so
    /// any encoding damage is left for the parser to reject.
    fn get_text(
        &self,
        url: &str,
        query: &[(String, String)],
        cookie: Option<&str>,
    ) -> Result<String, DownloadError> {
        let bytes = self.get_with_retry(url, query, cookie)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// GETs a URL and reads the full body under the retry envelope: up to
    /// [MAX_ATTEMPTS] tries with a growing, jittered delay between them. A
    /// connection dropped mid-body counts as a failed attempt the same as a
    /// refused connect or a 5xx; only transient failures are retried, anything
    /// else is returned immediately as a [DownloadError::Network].
    fn get_with_retry(
        &self,
        url: &str,
        query: &[(String, String)],
        cookie: Option<&str>,
    ) -> Result<Vec<u8>, DownloadError> {
        let mut attempt: u32 = 1;
        loop {
            match self.try_get(url, query, cookie) {
                Ok(bytes) => {
                    trace!("GET {url} succeeded on attempt {attempt}");
                    return Ok(bytes);
                }
                Err(err) => {
                    if !is_transient(&err) || attempt >= MAX_ATTEMPTS {
                        error!("GET {url} failed after {attempt} attempt(s): {err}");
                        return Err(DownloadError::Network {
                            url: url.to_string(),
                            attempts: attempt,
                            source: err,
                        });
                    }
                    let delay = backoff_delay(attempt);
                    warn!(
                        "GET {url} attempt {attempt}/{MAX_ATTEMPTS} failed ({err}), retrying in {}ms",
                        delay.as_millis()
                    );
                    sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    /// One attempt: send the request, check the status, read the whole body.
    /// A failure in any of the three phases surfaces as the reqwest error the
    /// retry loop classifies.
    fn try_get(
        &self,
        url: &str,
        query: &[(String, String)],
        cookie: Option<&str>,
    ) -> Result<Vec<u8>, reqwest::Error> {
        let mut request = self.client.get(url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(cookie_header) = cookie {
            request = request.header(COOKIE, cookie_header);
        }

        let response = request.send()?.error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// Whether a request failure is worth retrying.
fn is_transient(err: &reqwest::Error) -> bool {
    if let Some(status) = err.status() {
        return is_transient_status(status.as_u16());
    }
    err.is_timeout() || err.is_connect() || err.is_body() || err.is_request()
}

/// 5xx and 429 are retried; every other status is considered permanent.
fn is_transient_status(code: u16) -> bool {
    code >= 500 || code == 429
}

/// Linear backoff with random jitter so scheduled runs don't hammer the API in
/// lockstep after an outage.
fn backoff_delay(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..RETRY_JITTER_MS);
    Duration::from_millis(RETRY_BASE_MS * u64::from(attempt) + jitter)
}

/// Appends `ts` and the MD5 `sign` expected by the app API: parameters are
/// sorted by key, rendered as a query string and hashed together with the app
/// secret.
pub(crate) fn signed_query(mut params: Vec<(String, String)>) -> Vec<(String, String)> {
    let ts = chrono::Utc::now().timestamp();
    params.push(("ts".to_string(), ts.to_string()));
    params.sort_by(|a, b| a.0.cmp(&b.0));

    let query_string = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Md5::new();
    hasher.update(query_string.as_bytes());
    hasher.update(APP_SECRET.as_bytes());
    let sign = hex::encode(hasher.finalize());

    params.push(("sign".to_string(), sign));
    params
}

/// Decodes a raw response body: JSON well-formedness first, then the envelope
/// error code, then the expected payload shape. The three failure modes map to
/// [DownloadError::Parse], [DownloadError::Api] and [DownloadError::Parse]
/// respectively so callers can tell a broken response from a refused one.
pub(crate) fn parse_api_response<T: serde::de::DeserializeOwned>(
    body: &str,
) -> Result<T, DownloadError> {
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|err| DownloadError::parse(format!("invalid json: {err}"), body))?;

    if envelope.code != 0 {
        return Err(DownloadError::Api {
            code: envelope.code,
            message: envelope.message,
        });
    }

    let data = envelope
        .data
        .ok_or_else(|| DownloadError::parse("response has no data field", body))?;
    serde_json::from_value(data)
        .map_err(|err| DownloadError::parse(format!("unexpected data shape: {err}"), body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_splash_listing() {
        let body = r#"{
            "code": 0,
            "message": "0",
            "data": {
                "list": [
                    {"id": 101, "thumb": "https://i0.hdslb.com/splash/101.png",
                     "thumb_name": "spring", "mode": "full", "source": "brand",
                     "thumb_hash": "abc", "thumb_size": 12345}
                ]
            }
        }"#;
        let list: SplashList = parse_api_response(body).unwrap();
        assert_eq!(list.list.len(), 1);
        assert_eq!(list.list[0].id, 101);
        assert!(list.list[0].show_logo);
    }

    #[test]
    fn parses_wallpaper_page() {
        let body = r#"{
            "code": 0,
            "message": "success",
            "data": {
                "total_count": 91,
                "items": [
                    {"doc_id": 7, "upload_time": "2026-08-01 12:00:00",
                     "pictures": [{"img_src": "https://i0.hdslb.com/album/a.jpg"}]}
                ]
            }
        }"#;
        let page: WallpaperPage = parse_api_response(body).unwrap();
        assert_eq!(page.total_count, 91);
        assert_eq!(page.items[0].pictures.len(), 1);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = parse_api_response::<SplashList>("<html>gateway timeout</html>").unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }

    #[test]
    fn api_error_code_is_surfaced() {
        let body = r#"{"code": -101, "message": "账号未登录", "data": null}"#;
        let err = parse_api_response::<WallpaperPage>(body).unwrap_err();
        match err {
            DownloadError::Api { code, message } => {
                assert_eq!(code, -101);
                assert_eq!(message, "账号未登录");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn missing_data_is_a_parse_error() {
        let body = r#"{"code": 0, "message": "ok"}"#;
        let err = parse_api_response::<SplashList>(body).unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }

    #[test]
    fn wrong_data_shape_is_a_parse_error() {
        let body = r#"{"code": 0, "data": {"items": [{"pictures": []}]}}"#;
        // AlbumEntry requires upload_time
        let err = parse_api_response::<WallpaperPage>(body).unwrap_err();
        assert!(matches!(err, DownloadError::Parse { .. }));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(is_transient_status(500));
        assert!(is_transient_status(502));
        assert!(is_transient_status(429));
        assert!(!is_transient_status(404));
        assert!(!is_transient_status(403));
    }

    #[test]
    fn signed_query_is_sorted_and_signed() {
        let query = signed_query(vec![("appkey".to_string(), APP_KEY.to_string())]);
        let keys: Vec<&str> = query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["appkey", "ts", "sign"]);
        let sign = &query.last().unwrap().1;
        assert_eq!(sign.len(), 32);
        assert!(sign.chars().all(|c| c.is_ascii_hexdigit()));
    }

    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    /// Serves canned HTTP/1.1 responses on a loopback socket, one connection
    /// per response entry (the last entry repeats), counting connections.
    /// Each connection is closed after its response so every retry has to
    /// reconnect.
    fn serve(
        responses: Vec<Vec<u8>>,
        connections: usize,
    ) -> (String, Arc<AtomicUsize>, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/image.jpg", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = Arc::clone(&hits);

        let handle = thread::spawn(move || {
            for _ in 0..connections {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let n = server_hits.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let response = responses.get(n).unwrap_or_else(|| {
                    responses.last().expect("serve needs at least one response")
                });
                let _ = stream.write_all(response);
            }
        });

        (url, hits, handle)
    }

    const RESPONSE_500: &[u8] =
        b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    const RESPONSE_404: &[u8] =
        b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n";
    // Announces 100000 bytes, delivers 7, then the connection drops.
    const RESPONSE_TRUNCATED: &[u8] =
        b"HTTP/1.1 200 OK\r\ncontent-length: 100000\r\nconnection: close\r\n\r\npartial";
    const RESPONSE_OK: &[u8] =
        b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello";

    #[test]
    fn server_errors_exhaust_the_retry_budget() {
        let (url, hits, handle) = serve(vec![RESPONSE_500.to_vec()], MAX_ATTEMPTS as usize);
        let sender = RequestSender::new(None).unwrap();

        let err = sender.get_bytes(&url).unwrap_err();
        match err {
            DownloadError::Network { attempts, .. } => assert_eq!(attempts, MAX_ATTEMPTS),
            other => panic!("expected Network error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
        handle.join().unwrap();
    }

    #[test]
    fn client_errors_fail_on_the_first_attempt() {
        let (url, hits, handle) = serve(vec![RESPONSE_404.to_vec()], 1);
        let sender = RequestSender::new(None).unwrap();

        let err = sender.get_bytes(&url).unwrap_err();
        match err {
            DownloadError::Network { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("expected Network error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        handle.join().unwrap();
    }

    #[test]
    fn connection_drop_mid_body_is_retried() {
        let (url, hits, handle) = serve(
            vec![
                RESPONSE_TRUNCATED.to_vec(),
                RESPONSE_TRUNCATED.to_vec(),
                RESPONSE_OK.to_vec(),
            ],
            3,
        );
        let sender = RequestSender::new(None).unwrap();

        let bytes = sender.get_bytes(&url).unwrap();
        assert_eq!(bytes, b"hello");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        handle.join().unwrap();
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let first = backoff_delay(1);
        assert!(first >= Duration::from_millis(RETRY_BASE_MS));
        assert!(first < Duration::from_millis(RETRY_BASE_MS + RETRY_JITTER_MS));
        let late = backoff_delay(6);
        assert!(late >= Duration::from_millis(RETRY_BASE_MS * 6));
    }
}

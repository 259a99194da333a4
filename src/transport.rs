//! HTTP 傳輸層。
//!
//! 協議層只透過 [`Transport`] 發送請求並讀取狀態碼、標頭與內容；
//! [`ReqwestTransport`] 是實際連線的實作，[`MockTransport`] 則依腳本回應，用於測試。

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use reqwest::blocking::Client;
use thiserror::Error;

/// 傳輸層錯誤。
#[derive(Debug, Error)]
pub enum TransportError {
    /// 請求無法完成（連線、TLS、逾時等）。
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// 標頭值不是合法字串。
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::ToStrError),
    /// 腳本中沒有對應的回應（僅 [`MockTransport`]）。
    #[error("No response scripted for {method} {url}")]
    Unscripted { method: Method, url: String },
}

type Result<T> = std::result::Result<T, TransportError>;

/// 協議用到的 HTTP 方法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Post => "POST",
        })
    }
}

/// 已讀取完畢的 HTTP 回應。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// 標頭名稱一律存為小寫。
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 以 JSON 內容建立回應，並附上對應的 `Content-Type`。
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status)
            .with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    /// 不分大小寫查詢標頭。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn location(&self) -> Option<&str> {
        self.header("Location")
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header("Replay-Nonce")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// ACME 伺服器與自我檢查所需的 HTTP 操作。
pub trait Transport: Send + Sync {
    fn head(&self, url: &str) -> Result<HttpResponse>;

    fn get(&self, url: &str) -> Result<HttpResponse>;

    /// 以 `application/jose+json` 送出已簽名的 JWS。
    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse>;
}

/// 使用 reqwest 阻塞式客戶端的實作；重新導向由 reqwest 依預設策略處理。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    const USER_AGENT: &'static str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// 建立帶有本庫 User-Agent 與 30 秒逾時的客戶端。
    ///
    /// # 錯誤
    ///
    /// TLS 後端初始化失敗時回傳 [`TransportError::Request`]。
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(Self::USER_AGENT)
            .timeout(Self::DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// 使用呼叫端自行設定的客戶端。
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn read(response: reqwest::blocking::Response) -> Result<HttpResponse> {
        let status = response.status().as_u16();
        let mut headers = Vec::with_capacity(response.headers().len());
        for (name, value) in response.headers() {
            headers.push((name.as_str().to_ascii_lowercase(), value.to_str()?.to_string()));
        }
        let body = response.bytes()?.to_vec();
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn head(&self, url: &str) -> Result<HttpResponse> {
        Self::read(self.client.head(url).send()?)
    }

    fn get(&self, url: &str) -> Result<HttpResponse> {
        Self::read(self.client.get(url).send()?)
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/jose+json")
            .body(body.to_owned())
            .send()?;
        Self::read(response)
    }
}

/// [`MockTransport`] 收到的一筆請求。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub body: String,
}

type Responder = Box<dyn Fn(&RecordedRequest) -> HttpResponse + Send + Sync>;

enum Route {
    Queue(VecDeque<HttpResponse>),
    Dynamic(Responder),
}

/// 依腳本回應的傳輸層，通常用於測試。
///
/// 每個 `(方法, URL)` 有一個回應佇列，依序取出；佇列只剩一個回應時會重複使用它。
/// 未附帶 `Replay-Nonce` 的回應會自動補上遞增的 nonce，模擬每個 ACME 回應都發放新 nonce 的行為。
#[derive(Clone, Default)]
pub struct MockTransport {
    routes: Arc<Mutex<HashMap<(Method, String), Route>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    nonce_counter: Arc<Mutex<u64>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("requests", &self.requests().len())
            .finish()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 為 `(method, url)` 追加一個回應。
    pub fn on(&self, method: Method, url: &str, response: HttpResponse) -> &Self {
        let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
        let route = routes
            .entry((method, url.to_owned()))
            .or_insert_with(|| Route::Queue(VecDeque::new()));
        match route {
            Route::Queue(queue) => queue.push_back(response),
            dynamic => *dynamic = Route::Queue(VecDeque::from([response])),
        }
        self
    }

    /// 以函式動態產生 `(method, url)` 的回應。
    pub fn on_fn<F>(&self, method: Method, url: &str, responder: F) -> &Self
    where
        F: Fn(&RecordedRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.routes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((method, url.to_owned()), Route::Dynamic(Box::new(responder)));
        self
    }

    /// 目前為止收到的所有請求（依時間順序）。
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 收到的指定請求數量。
    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }

    fn respond(&self, method: Method, url: &str, body: &str) -> Result<HttpResponse> {
        let request = RecordedRequest {
            method,
            url: url.to_owned(),
            body: body.to_owned(),
        };
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let response = {
            let mut routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            match routes.get_mut(&(method, url.to_owned())) {
                Some(Route::Queue(queue)) if queue.len() > 1 => queue.pop_front(),
                Some(Route::Queue(queue)) => queue.front().cloned(),
                Some(Route::Dynamic(responder)) => Some(responder(&request)),
                None => None,
            }
        };
        let response = response.ok_or_else(|| TransportError::Unscripted {
            method,
            url: url.to_owned(),
        })?;

        if response.replay_nonce().is_some() {
            return Ok(response);
        }
        let mut counter = self
            .nonce_counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *counter += 1;
        Ok(response.with_header("Replay-Nonce", format!("mock-nonce-{}", *counter)))
    }
}

impl Transport for MockTransport {
    fn head(&self, url: &str) -> Result<HttpResponse> {
        self.respond(Method::Head, url, "")
    }

    fn get(&self, url: &str) -> Result<HttpResponse> {
        self.respond(Method::Get, url, "")
    }

    fn post_jose(&self, url: &str, body: &str) -> Result<HttpResponse> {
        self.respond(Method::Post, url, body)
    }
}

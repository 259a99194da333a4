//! 單次簽發流程的工作階段。
//!
//! [`Session`] 持有傳輸層、日誌、帳戶金鑰、目錄、nonce 狀態與帳戶 URL，
//! 所有需要簽名的請求都經由它送出。每次簽發使用獨立的工作階段，彼此不共用 nonce。

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    directory::Directory,
    error::{AcmeError, Problem, Result},
    jws::{Jws, Payload},
    key_pair::KeyPair,
    logger::Logger,
    nonce::NonceTracker,
    payload::PayloadT,
    protection::KeyId,
    transport::{HttpResponse, Transport},
};

pub struct Session {
    transport: Arc<dyn Transport>,
    logger: Arc<dyn Logger>,
    account_key: Arc<KeyPair>,
    directory: Directory,
    nonces: NonceTracker,
    kid: Option<String>,
    bad_nonce_retries: u32,
}

impl Session {
    pub const DEFAULT_BAD_NONCE_RETRIES: u32 = 1;

    pub fn new(
        transport: Arc<dyn Transport>,
        logger: Arc<dyn Logger>,
        account_key: Arc<KeyPair>,
        directory: Directory,
    ) -> Self {
        Self {
            transport,
            logger,
            account_key,
            directory,
            nonces: NonceTracker::new(),
            kid: None,
            bad_nonce_retries: Self::DEFAULT_BAD_NONCE_RETRIES,
        }
    }

    /// 設定收到 `badNonce` 時最多以新 nonce 重送幾次。
    pub fn with_bad_nonce_retries(mut self, retries: u32) -> Self {
        self.bad_nonce_retries = retries;
        self
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn account_key(&self) -> &KeyPair {
        &self.account_key
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn logger(&self) -> &dyn Logger {
        self.logger.as_ref()
    }

    /// 註冊後取得的帳戶 URL。
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub(crate) fn set_kid(&mut self, kid: impl Into<String>) {
        self.kid = Some(kid.into());
    }

    /// 以帳戶 URL（`kid`）簽名並送出請求，回傳伺服器的原始回應。
    ///
    /// 回應狀態碼由呼叫端判斷；只有 `badNonce` 會在這裡以新 nonce 重送，
    /// 次數上限為 [`with_bad_nonce_retries`](Self::with_bad_nonce_retries)。
    ///
    /// # 錯誤
    ///
    /// 尚未取得帳戶 URL 時回傳 [`AcmeError::MissingAccount`]。
    pub fn signed_request(&mut self, url: &str, payload: Payload<'_>) -> Result<HttpResponse> {
        let kid = self.kid.clone().ok_or(AcmeError::MissingAccount)?;
        self.send_signed(url, payload, || KeyId::Kid(kid.clone()))
    }

    /// 以內嵌 `jwk` 簽名，僅用於 newAccount。
    pub(crate) fn signed_request_with_jwk(
        &mut self,
        url: &str,
        payload: Payload<'_>,
    ) -> Result<HttpResponse> {
        let jwk = self.account_key.jwk()?;
        self.send_signed(url, payload, || KeyId::Jwk(jwk.clone()))
    }

    /// 驗證載荷後以 JSON 送出。
    pub fn post_payload<P: PayloadT>(&mut self, url: &str, payload: &P) -> Result<HttpResponse> {
        payload.validate()?;
        let json = payload.to_json_string()?;
        self.signed_request(url, Payload::Json(&json))
    }

    /// POST-as-GET：以空載荷讀取資源。
    pub fn post_as_get(&mut self, url: &str) -> Result<HttpResponse> {
        self.signed_request(url, Payload::PostAsGet)
    }

    /// POST-as-GET 並將 2xx 回應解析為 `T`。
    ///
    /// # 錯誤
    ///
    /// 非 2xx 回應回傳 [`AcmeError::Server`]，內容不符回傳 [`AcmeError::Protocol`]。
    pub fn fetch<T: DeserializeOwned>(&mut self, url: &str) -> Result<T> {
        let response = self.post_as_get(url)?;
        if !response.is_success() {
            return Err(AcmeError::server(url, response.status, &response.body));
        }
        parse_body(url, &response)
    }

    fn send_signed<F>(&mut self, url: &str, payload: Payload<'_>, key_id: F) -> Result<HttpResponse>
    where
        F: Fn() -> KeyId,
    {
        let mut retries_left = self.bad_nonce_retries;
        loop {
            let nonce = self
                .nonces
                .next_nonce(self.transport.as_ref(), &self.directory.new_nonce)?;
            let jws = Jws::sign(&self.account_key, key_id(), &nonce, url, payload)
                .map_err(jws_error)?;

            self.logger.debug(format_args!("POST {}", url));
            let response = self.transport.post_jose(url, &jws.to_json().map_err(jws_error)?)?;
            self.nonces.observe(response.replay_nonce());

            let bad_nonce = !response.is_success()
                && Problem::from_body(&response.body).map_or(false, |p| p.is_bad_nonce());
            if bad_nonce && retries_left > 0 {
                retries_left -= 1;
                self.logger
                    .warn(format_args!("Server rejected nonce for {}, retrying", url));
                continue;
            }
            return Ok(response);
        }
    }
}

/// 將 2xx 回應內容解析為 `T`，失敗時回傳帶有 URL 的 [`AcmeError::Protocol`]。
pub(crate) fn parse_body<T: DeserializeOwned>(url: &str, response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| {
        AcmeError::Protocol(format!("Unexpected response body from {}: {}", url, e))
    })
}

fn jws_error(e: crate::jws::JwsError) -> AcmeError {
    use crate::jws::JwsError;

    match e {
        JwsError::Signature(e) => e.into(),
        JwsError::Key(e) => e.into(),
        JwsError::Json(e) => e.into(),
        JwsError::Base64Decode(e) => AcmeError::Protocol(e.to_string()),
    }
}

use crate::{
    error::{AcmeError, Result},
    transport::Transport,
};

/// 追蹤伺服器最新發放的 `Replay-Nonce`。
///
/// 每個 nonce 最多使用一次：[`next_nonce`](Self::next_nonce) 會取走目前的值，
/// 沒有可用的值時才向 `newNonce` 發送 HEAD 請求取得新的 nonce。
#[derive(Debug, Default)]
pub struct NonceTracker {
    current: Option<String>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得一個尚未使用的 nonce。
    ///
    /// # 錯誤
    ///
    /// HEAD 回應沒有 `Replay-Nonce` 標頭時回傳 [`AcmeError::Protocol`]。
    pub fn next_nonce(&mut self, transport: &dyn Transport, new_nonce_url: &str) -> Result<String> {
        if let Some(nonce) = self.current.take() {
            return Ok(nonce);
        }
        let response = transport.head(new_nonce_url)?;
        match response.replay_nonce() {
            Some(nonce) if !nonce.is_empty() => Ok(nonce.to_string()),
            _ => Err(AcmeError::Protocol(format!(
                "No Replay-Nonce header in response from {} (HTTP {})",
                new_nonce_url, response.status
            ))),
        }
    }

    /// 記錄回應中的 nonce，取代先前尚未使用的值。
    pub fn observe(&mut self, nonce: Option<&str>) {
        if let Some(nonce) = nonce.filter(|n| !n.is_empty()) {
            self.current = Some(nonce.to_string());
        }
    }

    pub fn has_nonce(&self) -> bool {
        self.current.is_some()
    }
}

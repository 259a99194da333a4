//! JSON Web Signature (JWS) 的建立與序列化。
//!
//! ACME 的每個 POST 都是 flattened JSON 序列化的 JWS：
//! `{"protected": ..., "payload": ..., "signature": ...}`，三者皆為無填充的 base64url。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    base64::{url_decode, url_encode, DecodeError},
    key_pair::{KeyError, KeyPair},
    protection::{KeyId, ProtectedHeader},
    signature::{create_signature, SignatureError},
};

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] DecodeError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, JwsError>;

/// 要簽名的內容。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    /// 已序列化的 JSON 物件。
    Json(&'a str),
    /// POST-as-GET：載荷為空字串。
    PostAsGet,
}

impl Payload<'_> {
    fn encode(&self) -> String {
        match self {
            Payload::Json(json) => url_encode(json),
            Payload::PostAsGet => String::new(),
        }
    }
}

/// 表示一個 JSON Web Signature (JWS) 物件。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    /// 已編碼的保護標頭。
    pub protected: String,
    pub payload: String,
    pub signature: String,
}

impl Jws {
    /// 以 `key` 簽署一個請求。
    ///
    /// # 參數
    ///
    /// - `key`: 帳戶金鑰，決定 `alg`（RS256 或 ES256）。
    /// - `key_id`: 內嵌 `jwk` 或帳戶 URL `kid`。
    /// - `nonce`: 尚未使用過的 nonce。
    /// - `url`: 請求目標，會原樣寫入保護標頭。
    /// - `payload`: 要簽名的內容。
    ///
    /// # 錯誤
    ///
    /// 金鑰不支援或 OpenSSL 簽名失敗時回傳 [`JwsError::Signature`]。
    pub fn sign(key: &KeyPair, key_id: KeyId, nonce: &str, url: &str, payload: Payload<'_>) -> Result<Self> {
        let header = ProtectedHeader::new(key.jws_alg(), nonce, url, key_id);
        let protected = url_encode(header.to_json()?);
        let payload = payload.encode();
        let signature = url_encode(create_signature(&protected, &payload, key)?);

        Ok(Jws {
            protected,
            payload,
            signature,
        })
    }

    /// 解碼保護標頭。
    pub fn header(&self) -> Result<ProtectedHeader> {
        Ok(serde_json::from_slice(&url_decode(&self.protected)?)?)
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

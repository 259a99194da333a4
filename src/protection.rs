use serde::{Deserialize, Serialize};

use crate::jwk::Jwk;

/// JWS 中識別簽名金鑰的方式。
///
/// 註冊帳戶（newAccount）時只能內嵌公鑰；取得帳戶 URL 後，所有請求都改以 `kid` 表示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyId {
    Jwk(Jwk),
    Kid(String),
}

/// 表示 JWS 保護頭部的資料結構。
///
/// `jwk` 與 `kid` 恰有一個存在。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 用於防止重放攻擊的隨機數
    pub nonce: String,
    /// 請求目標 URL，必須與實際送出的 URL 完全一致
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    pub fn new(
        alg: impl Into<String>,
        nonce: impl Into<String>,
        url: impl Into<String>,
        key_id: KeyId,
    ) -> Self {
        let (jwk, kid) = match key_id {
            KeyId::Jwk(jwk) => (Some(jwk), None),
            KeyId::Kid(kid) => (None, Some(kid)),
        };
        Self {
            alg: alg.into(),
            nonce: nonce.into(),
            url: url.into(),
            jwk,
            kid,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

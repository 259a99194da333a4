//! ACME 使用的 Base64 URL 安全編碼（RFC 4648 §5，無填充）。
//!
//! JWS 的 protected header、payload、簽名以及 JWK 中的大整數都以此格式傳輸。

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use thiserror::Error;

/// Base64 解碼失敗時回傳的錯誤。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 輸入不是合法的 Base64 字串。
    #[error("Invalid base64 input: {0}")]
    Invalid(String),
}

/// 將任意位元組編碼為不含填充的 URL 安全 Base64 字串。
///
/// # 範例
///
/// ```
/// use lescrypt::base64::url_encode;
/// assert_eq!(url_encode("Hello, World!"), "SGVsbG8sIFdvcmxkIQ");
/// ```
pub fn url_encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input)
}

/// 解碼 URL 安全 Base64 字串；結尾的 `=` 會先被移除，因此有無填充皆可接受。
///
/// # 錯誤
///
/// 字串含有非 URL 安全字元或長度不合法時回傳 [`DecodeError::Invalid`]。
pub fn url_decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD
        .decode(input.trim_end_matches('='))
        .map_err(|e| DecodeError::Invalid(e.to_string()))
}

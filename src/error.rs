//! 整個簽發流程共用的錯誤類型。
//!
//! 各底層模組保有各自的錯誤列舉（[`KeyError`]、[`CsrError`]、[`StorageError`] 等），
//! 在進入協議層時統一轉換為 [`AcmeError`]，並可透過 [`AcmeError::kind`]
//! 取得呼叫端用來判斷重試與否的錯誤分類。

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    certificate::CertificateError, csr::CsrError, key_pair::KeyError, payload::PayloadError,
    signature::SignatureError, storage::StorageError, transport::TransportError,
};

/// ACME 伺服器回傳的 problem document（RFC 7807 / RFC 8555 §6.7）。
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Problem {
    /// 例如 `urn:ietf:params:acme:error:badNonce`。
    #[serde(rename = "type", default)]
    pub problem_type: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl Problem {
    pub const BAD_NONCE: &'static str = "urn:ietf:params:acme:error:badNonce";

    /// 嘗試將回應內容解析為 problem document，內容不符時回傳 `None`。
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Problem>(body)
            .ok()
            .filter(|p| !p.problem_type.is_empty())
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.problem_type == Self::BAD_NONCE
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.problem_type)
        } else {
            write!(f, "{}: {}", self.problem_type, self.detail)
        }
    }
}

/// 金鑰、簽名與 CSR 等密碼學操作的錯誤。
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] openssl::error::ErrorStack),
}

/// 錯誤分類，對應協議層的錯誤類別。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Protocol,
    Crypto,
    ChallengeUnavailable,
    ChallengeFailed,
    SelfCheck,
    Timeout,
    Cancelled,
    Finalize,
    Issuance,
    Parse,
    MissingAccount,
    Config,
    Transport,
    Storage,
}

/// 簽發流程中任何一步失敗時回傳的錯誤。
///
/// 伺服器提供的細節（problem document 或原始回應內容）會一併保留，交由呼叫端處理。
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Unexpected response from {url}: HTTP {status}, {detail}")]
    Server {
        url: String,
        status: u16,
        detail: String,
        problem: Option<Problem>,
    },
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("No {challenge_type} challenge available for {domain}: {response}")]
    ChallengeUnavailable {
        domain: String,
        challenge_type: String,
        response: String,
    },
    #[error("Challenge for {domain} failed: {detail}")]
    ChallengeFailed { domain: String, detail: String },
    #[error("Self check failed for {url}: expected {expected:?}, found {found:?}")]
    SelfCheck {
        url: String,
        expected: String,
        found: String,
    },
    #[error("{operation} timed out after {attempts} attempts")]
    Timeout {
        operation: &'static str,
        attempts: u32,
    },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Finalize failed: HTTP {status}, {detail}")]
    Finalize { status: u16, detail: String },
    #[error("Certificate download failed: HTTP {status}, {detail}")]
    Issuance { status: u16, detail: String },
    #[error("Certificate parse error: {0}")]
    Parse(String),
    #[error("Account URL could not be recovered after registration")]
    MissingAccount,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl AcmeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Protocol(_) | Self::Server { .. } | Self::Json(_) => ErrorKind::Protocol,
            Self::Crypto(_) => ErrorKind::Crypto,
            Self::ChallengeUnavailable { .. } => ErrorKind::ChallengeUnavailable,
            Self::ChallengeFailed { .. } => ErrorKind::ChallengeFailed,
            Self::SelfCheck { .. } => ErrorKind::SelfCheck,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Finalize { .. } => ErrorKind::Finalize,
            Self::Issuance { .. } => ErrorKind::Issuance,
            Self::Parse(_) => ErrorKind::Parse,
            Self::MissingAccount => ErrorKind::MissingAccount,
            Self::Config(_) => ErrorKind::Config,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// 只有輪詢逾時被視為可重試；其餘錯誤重試同一個請求不會有不同結果。
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// 伺服器回傳的 problem document（若有）。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Self::Server { problem, .. } => problem.as_ref(),
            _ => None,
        }
    }

    /// 依回應狀態碼與內容建立 [`AcmeError::Server`]。
    pub(crate) fn server(url: &str, status: u16, body: &[u8]) -> Self {
        let problem = Problem::from_body(body);
        let detail = server_detail(problem.as_ref(), body);
        Self::Server {
            url: url.to_owned(),
            status,
            detail,
            problem,
        }
    }
}

/// 優先使用 problem document，否則回傳原始內容。
pub(crate) fn server_detail(problem: Option<&Problem>, body: &[u8]) -> String {
    match problem {
        Some(problem) => problem.to_string(),
        None => String::from_utf8_lossy(body).trim().to_string(),
    }
}

impl From<KeyError> for AcmeError {
    fn from(e: KeyError) -> Self {
        Self::Crypto(e.into())
    }
}

impl From<SignatureError> for AcmeError {
    fn from(e: SignatureError) -> Self {
        Self::Crypto(e.into())
    }
}

impl From<CsrError> for AcmeError {
    fn from(e: CsrError) -> Self {
        Self::Crypto(e.into())
    }
}

impl From<openssl::error::ErrorStack> for AcmeError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Self::Crypto(e.into())
    }
}

impl From<CertificateError> for AcmeError {
    fn from(e: CertificateError) -> Self {
        Self::Parse(e.to_string())
    }
}

impl From<PayloadError> for AcmeError {
    fn from(e: PayloadError) -> Self {
        Self::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_parsing() {
        let body = br#"{"type":"urn:ietf:params:acme:error:badNonce","detail":"JWS has an invalid anti-replay nonce","status":400}"#;
        let problem = Problem::from_body(body).unwrap();
        assert!(problem.is_bad_nonce());
        assert_eq!(problem.status, Some(400));
        assert_eq!(
            problem.to_string(),
            "urn:ietf:params:acme:error:badNonce: JWS has an invalid anti-replay nonce"
        );
    }

    #[test]
    fn test_non_problem_body() {
        assert!(Problem::from_body(b"<html>oops</html>").is_none());
        assert!(Problem::from_body(br#"{"status":"valid"}"#).is_none());
    }

    #[test]
    fn test_server_error_keeps_raw_body() {
        let err = AcmeError::server("https://ca/order", 500, b" internal \n");
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.problem().is_none());
        assert!(err.to_string().contains("internal"));
    }

    #[test]
    fn test_only_timeout_is_retryable() {
        let timeout = AcmeError::Timeout {
            operation: "challenge validation",
            attempts: 30,
        };
        assert!(timeout.is_retryable());
        assert!(!AcmeError::Protocol("missing newOrder".into()).is_retryable());
        assert!(!AcmeError::MissingAccount.is_retryable());
    }
}

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::base64::url_encode;

/// 載荷驗證失敗的原因。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Terms of service must be agreed")]
    TermsNotAgreed,
    #[error("Contact must be a mailto: URI: {0}")]
    InvalidContact(String),
    #[error("At least one identifier is required")]
    NoIdentifiers,
    #[error("Identifier value cannot be empty")]
    EmptyIdentifier,
    #[error("Key authorization cannot be empty")]
    EmptyKeyAuthorization,
    #[error("CSR cannot be empty")]
    EmptyCsr,
}

/// 定義所有 API 載荷（Payload）必須實作的功能。
///
/// 送出前先以 [`validate`](PayloadT::validate) 檢查，再序列化為 JWS 的 payload。
pub trait PayloadT: Serialize {
    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 驗證載荷資料是否符合協議要求。
    fn validate(&self) -> Result<(), PayloadError>;
}

/// 表示建立新帳號所需的載荷資料。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewAccountPayload {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub contact: Vec<String>,
    #[serde(rename = "termsOfServiceAgreed")]
    pub terms_of_service_agreed: bool,
}

impl NewAccountPayload {
    /// 建立一個已同意服務條款的 `NewAccountPayload`。
    ///
    /// 傳入的聯絡資訊會自動補足 `mailto:` 前綴，若已包含則不重複補充。
    /// 沒有聯絡資訊時，序列化結果不含 `contact` 欄位。
    pub fn new<S: AsRef<str>>(contacts: &[S]) -> Self {
        let contact = contacts
            .iter()
            .map(|c| {
                let c = c.as_ref();
                if c.starts_with("mailto:") {
                    c.to_string()
                } else {
                    format!("mailto:{}", c)
                }
            })
            .collect();

        NewAccountPayload {
            contact,
            terms_of_service_agreed: true,
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if !self.terms_of_service_agreed {
            return Err(PayloadError::TermsNotAgreed);
        }
        for contact in &self.contact {
            if contact.len() <= "mailto:".len() || contact.contains(char::is_whitespace) {
                return Err(PayloadError::InvalidContact(contact.clone()));
            }
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identifier {
    /// 識別項類型，伺服器省略時視為 `dns`
    #[serde(rename = "type", default = "Identifier::dns_type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    fn dns_type() -> String {
        "dns".to_string()
    }

    pub fn dns(value: impl Into<String>) -> Self {
        Self {
            type_: Self::dns_type(),
            value: value.into(),
        }
    }
}

/// 表示建立新訂單時所需的載荷資料。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    /// 為每個網域建立類型為 `"dns"` 的識別項，順序與輸入相同。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        NewOrderPayload {
            identifiers: domains.iter().map(|d| Identifier::dns(d.as_ref())).collect(),
        }
    }
}

impl PayloadT for NewOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::NoIdentifiers);
        }
        if self.identifiers.iter().any(|i| i.value.trim().is_empty()) {
            return Err(PayloadError::EmptyIdentifier);
        }
        Ok(())
    }
}

/// 通知伺服器挑戰已就緒時送出的載荷。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChallengeResponsePayload {
    #[serde(rename = "keyAuthorization")]
    pub key_authorization: String,
}

impl ChallengeResponsePayload {
    pub fn new(key_authorization: impl Into<String>) -> Self {
        Self {
            key_authorization: key_authorization.into(),
        }
    }
}

impl PayloadT for ChallengeResponsePayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.key_authorization.is_empty() {
            return Err(PayloadError::EmptyKeyAuthorization);
        }
        Ok(())
    }
}

/// 表示最終化訂單時所需的載荷資料。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FinalizeOrderPayload {
    /// CSR 的 DER 編碼，以 URL 安全 Base64 表示。
    #[serde(rename = "csr")]
    pub csr_b64_str: String,
}

impl FinalizeOrderPayload {
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: url_encode(csr_der),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<(), PayloadError> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError::EmptyCsr);
        }
        Ok(())
    }
}

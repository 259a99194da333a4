use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

/// 為簡化錯誤處理定義 Result 類型
type Result<T> = result::Result<T, CsrError>;

const MAX_COMMON_NAME_LEN: usize = 64;

/// CSR 主體的選用欄位，未設定的欄位不會寫入。
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CsrSubject {
    /// 國家代碼（`C`），兩個字母。
    pub country: Option<String>,
    /// 州或省（`ST`）。
    pub state: Option<String>,
    /// 組織名稱（`O`）。
    pub organization: Option<String>,
}

impl CsrSubject {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("C", self.country.as_deref()),
            ("ST", self.state.as_deref()),
            ("O", self.organization.as_deref()),
        ]
        .into_iter()
        .filter_map(|(field, value)| value.map(|value| (field, value)))
    }
}

/// CSR 建構器。
///
/// 第一個長度不超過 64 位元組的網域作為主體 CN（X.509 的 `ub-common-name` 上限），
/// 都超過時省略 CN。所有網域都列入主體替代名稱 (SAN)，並以 SHA-256 簽名。
///
/// # 範例
///
/// ```
/// use lescrypt::{csr::Csr, key_pair::{KeyAlgorithm, KeyPair}};
///
/// let key_pair = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
/// let csr = Csr::new()
///     .set_san("example.com")
///     .set_san("www.example.com")
///     .build(&key_pair)
///     .unwrap();
/// assert!(csr.verify(&csr.public_key().unwrap()).unwrap());
/// ```
#[derive(Debug, Default, Clone)]
pub struct Csr {
    san_entries: Vec<String>,
    subject: CsrSubject,
}

impl Csr {
    pub fn new() -> Self {
        Self::default()
    }

    /// 依序以 `domains` 建立。
    pub fn for_domains<S: AsRef<str>>(domains: &[S]) -> Self {
        domains
            .iter()
            .fold(Self::new(), |csr, domain| csr.set_san(domain.as_ref()))
    }

    /// 新增一個 DNS 主體替代名稱 (SAN)。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 設定 CN 以外的主體欄位。
    pub fn with_subject(mut self, subject: CsrSubject) -> Self {
        self.subject = subject;
        self
    }

    /// 以 `key_pair` 的私鑰簽署並產生 X509 證書簽名請求。
    ///
    /// # 錯誤
    ///
    /// 未設定任何 SAN 時回傳 [`CsrError::NoSanEntries`]。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        if self.san_entries.is_empty() {
            return Err(CsrError::NoSanEntries);
        }
        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        if let Some(common_name) = self
            .san_entries
            .iter()
            .find(|entry| entry.len() <= MAX_COMMON_NAME_LEN)
        {
            name.append_entry_by_text("CN", common_name)?;
        }
        for (field, value) in self.subject.entries() {
            name.append_entry_by_text(field, value)?;
        }
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(&key_pair.pri_key)?;
        req_builder.sign(&key_pair.pri_key, MessageDigest::sha256())?;

        Ok(req_builder.build())
    }
}

/// 解析先前保存的 PEM 格式 CSR。
pub fn from_pem(pem: &[u8]) -> Result<X509Req> {
    Ok(X509Req::from_pem(pem)?)
}

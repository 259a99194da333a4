use std::{env, path::PathBuf};

use crate::{
    challenge::ChallengeType, csr::CsrSubject, key_pair::KeyAlgorithm, poll::PollPolicy,
    session::Session,
};

/// 客戶端設定。
///
/// 以 [`Default`] 取得預設值後用 `with_*` 方法逐項覆寫：
///
/// ```
/// use lescrypt::config::AcmeConfig;
///
/// let config = AcmeConfig::default()
///     .with_directory_url(AcmeConfig::LETS_ENCRYPT_STAGING)
///     .with_contact("admin@example.com")
///     .with_webroot("/var/www/html");
/// assert!(config.self_check);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcmeConfig {
    /// CA 的基底 URL 或目錄 URL。
    pub directory_url: String,
    pub contacts: Vec<String>,
    pub challenge_type: ChallengeType,
    pub account_key: KeyAlgorithm,
    pub domain_key: KeyAlgorithm,
    pub challenge_poll: PollPolicy,
    pub certificate_poll: PollPolicy,
    pub bad_nonce_retries: u32,
    /// 通知 CA 前先自行取得挑戰資源並比對內容。
    pub self_check: bool,
    /// 沿用上次保存的 CSR。
    pub reuse_csr: bool,
    /// CSR 主體中 CN 以外的欄位（國家、州、組織），預設全部省略。
    pub csr_subject: CsrSubject,
    /// 金鑰與憑證的存放目錄。
    pub storage_path: PathBuf,
    /// HTTP-01 答案寫入的 web root。
    pub webroot: PathBuf,
}

impl AcmeConfig {
    pub const LETS_ENCRYPT_PRODUCTION: &'static str =
        "https://acme-v02.api.letsencrypt.org/directory";
    pub const LETS_ENCRYPT_STAGING: &'static str =
        "https://acme-staging-v02.api.letsencrypt.org/directory";

    /// 根據執行環境取得預設的存儲路徑：`$HOME/.local/share/<crate>`，
    /// 沒有 `$HOME` 時改用 `/var/lib/<crate>`。
    fn default_storage_path() -> PathBuf {
        let app_name = env!("CARGO_PKG_NAME");
        match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(".local/share").join(app_name),
            None => PathBuf::from("/var/lib").join(app_name),
        }
    }

    pub fn with_directory_url(mut self, url: impl Into<String>) -> Self {
        self.directory_url = url.into();
        self
    }

    pub fn with_contact(mut self, contact: impl Into<String>) -> Self {
        self.contacts.push(contact.into());
        self
    }

    pub fn with_challenge_type(mut self, challenge_type: ChallengeType) -> Self {
        self.challenge_type = challenge_type;
        self
    }

    pub fn with_account_key(mut self, algorithm: KeyAlgorithm) -> Self {
        self.account_key = algorithm;
        self
    }

    pub fn with_domain_key(mut self, algorithm: KeyAlgorithm) -> Self {
        self.domain_key = algorithm;
        self
    }

    pub fn with_challenge_poll(mut self, policy: PollPolicy) -> Self {
        self.challenge_poll = policy;
        self
    }

    pub fn with_certificate_poll(mut self, policy: PollPolicy) -> Self {
        self.certificate_poll = policy;
        self
    }

    pub fn with_bad_nonce_retries(mut self, retries: u32) -> Self {
        self.bad_nonce_retries = retries;
        self
    }

    pub fn with_self_check(mut self, enabled: bool) -> Self {
        self.self_check = enabled;
        self
    }

    pub fn with_reuse_csr(mut self, enabled: bool) -> Self {
        self.reuse_csr = enabled;
        self
    }

    pub fn with_csr_subject(mut self, subject: CsrSubject) -> Self {
        self.csr_subject = subject;
        self
    }

    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = path.into();
        self
    }

    pub fn with_webroot(mut self, path: impl Into<PathBuf>) -> Self {
        self.webroot = path.into();
        self
    }

    /// 帳戶金鑰的存放位置：`_account/<CA 主機名稱>/private.pem`。
    ///
    /// 不同 CA（例如正式與測試環境）各自擁有帳戶金鑰。
    pub fn account_key_path(&self) -> String {
        let without_scheme = self
            .directory_url
            .split_once("://")
            .map_or(self.directory_url.as_str(), |(_, rest)| rest);
        let host = without_scheme
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .replace(':', "_");
        let host = if host.is_empty() { "default".to_string() } else { host };
        format!("_account/{}/private.pem", host)
    }
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_url: Self::LETS_ENCRYPT_PRODUCTION.to_string(),
            contacts: Vec::new(),
            challenge_type: ChallengeType::Http01,
            account_key: KeyAlgorithm::default(),
            domain_key: KeyAlgorithm::default(),
            challenge_poll: PollPolicy::default(),
            certificate_poll: PollPolicy::default(),
            bad_nonce_retries: Session::DEFAULT_BAD_NONCE_RETRIES,
            self_check: true,
            reuse_csr: false,
            csr_subject: CsrSubject::default(),
            storage_path: Self::default_storage_path(),
            webroot: PathBuf::from("/var/www/html"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = AcmeConfig::default();
        assert_eq!(config.directory_url, AcmeConfig::LETS_ENCRYPT_PRODUCTION);
        assert_eq!(config.challenge_type, ChallengeType::Http01);
        assert_eq!(config.account_key, KeyAlgorithm::Rsa { bits: 4096 });
        assert_eq!(config.challenge_poll.interval, Duration::from_secs(1));
        assert_eq!(config.certificate_poll.max_attempts, 30);
        assert_eq!(config.bad_nonce_retries, 1);
        assert!(config.self_check);
        assert!(!config.reuse_csr);
        assert_eq!(config.csr_subject, CsrSubject::default());
    }

    #[test]
    fn test_builder_methods() {
        let config = AcmeConfig::default()
            .with_directory_url("https://ca.internal:14000/dir")
            .with_contact("a@example.com")
            .with_contact("b@example.com")
            .with_domain_key(KeyAlgorithm::EcP256)
            .with_self_check(false)
            .with_reuse_csr(true)
            .with_csr_subject(CsrSubject {
                country: Some("CZ".into()),
                ..CsrSubject::default()
            })
            .with_storage_path("/tmp/acme");

        assert_eq!(config.contacts.len(), 2);
        assert_eq!(config.domain_key, KeyAlgorithm::EcP256);
        assert!(!config.self_check);
        assert!(config.reuse_csr);
        assert_eq!(config.csr_subject.country.as_deref(), Some("CZ"));
        assert_eq!(config.storage_path, PathBuf::from("/tmp/acme"));
        assert_eq!(config.account_key_path(), "_account/ca.internal_14000/private.pem");
    }

    #[test]
    fn test_account_key_path_per_ca() {
        let production = AcmeConfig::default();
        let staging = AcmeConfig::default().with_directory_url(AcmeConfig::LETS_ENCRYPT_STAGING);
        assert_eq!(
            production.account_key_path(),
            "_account/acme-v02.api.letsencrypt.org/private.pem"
        );
        assert_ne!(production.account_key_path(), staging.account_key_path());
    }
}

//! 對外的簽發入口。
//!
//! [`AcmeClient`] 組合傳輸層、儲存、挑戰發布與日誌，並依 [`AcmeConfig`] 執行
//! 「目錄 → 帳戶 → 訂單 → 授權 → 簽發」的完整流程。客戶端本身可在執行緒間共用，
//! 每次簽發都開啟獨立的 [`Session`]。

use std::sync::Arc;

use crate::{
    account::ensure_account,
    authorization::Authorizer,
    certificate::{Certificate, CertificateBundle, CertificateSink},
    challenge::{ChallengePublisher, WebrootPublisher},
    config::AcmeConfig,
    directory::Directory,
    error::{AcmeError, Result},
    issuance::Issuer,
    key_pair::KeyStore,
    logger::{Logger, NoopLogger},
    order::Order,
    poll::CancellationToken,
    session::Session,
    storage::{FileStorage, Storage},
    transport::{ReqwestTransport, Transport},
};

pub struct AcmeClient {
    config: AcmeConfig,
    transport: Arc<dyn Transport>,
    storage: Arc<dyn Storage>,
    publisher: Arc<dyn ChallengePublisher>,
    logger: Arc<dyn Logger>,
}

impl AcmeClient {
    pub fn builder(config: AcmeConfig) -> AcmeClientBuilder {
        AcmeClientBuilder::new(config)
    }

    pub fn config(&self) -> &AcmeConfig {
        &self.config
    }

    /// 開啟已註冊帳戶的工作階段。
    ///
    /// 先讀取（或產生）帳戶金鑰，再取得目錄並註冊帳戶；
    /// 保存的金鑰損壞時在任何網路請求之前就回傳 [`AcmeError::Crypto`]。
    pub fn open_session(&self) -> Result<Session> {
        let key_path = self.config.account_key_path();
        let (account_key, generated) = self
            .storage
            .load_or_generate(&key_path, self.config.account_key)?;
        if generated {
            self.logger.info(format_args!(
                "Generated {} account key at {}",
                self.config.account_key, key_path
            ));
        }

        let directory = Directory::resolve(self.transport.as_ref(), &self.config.directory_url)?;
        let mut session = Session::new(
            self.transport.clone(),
            self.logger.clone(),
            Arc::new(account_key),
            directory,
        )
        .with_bad_nonce_retries(self.config.bad_nonce_retries);

        ensure_account(&mut session, &self.config.contacts)?;
        Ok(session)
    }

    /// 在既有工作階段中為 `domains` 取得憑證並保存於 `<domains[0]>/`。
    ///
    /// # 錯誤
    ///
    /// 網域清單為空時回傳 [`AcmeError::Config`]；其餘錯誤見 [`Authorizer`] 與 [`Issuer`]。
    pub fn issue<S: AsRef<str>>(
        &self,
        session: &mut Session,
        domains: &[S],
        cancel: &CancellationToken,
    ) -> Result<CertificateBundle> {
        if domains.is_empty() {
            return Err(AcmeError::Config("At least one domain is required".into()));
        }

        let order = Order::create(session, domains)?;

        let authorizer = Authorizer {
            publisher: self.publisher.as_ref(),
            challenge_type: self.config.challenge_type.clone(),
            poll: self.config.challenge_poll,
            self_check: self.config.self_check,
        };
        authorizer.authorize(session, &order, cancel)?;

        let issuer = Issuer {
            storage: self.storage.as_ref(),
            domain_key: self.config.domain_key,
            reuse_csr: self.config.reuse_csr,
            subject: self.config.csr_subject.clone(),
            poll: self.config.certificate_poll,
        };
        issuer.issue(session, &order, domains, cancel)
    }

    /// 開啟新的工作階段並完成一次簽發。
    pub fn obtain_certificate<S: AsRef<str>>(
        &self,
        domains: &[S],
        cancel: &CancellationToken,
    ) -> Result<CertificateBundle> {
        let mut session = self.open_session()?;
        self.issue(&mut session, domains, cancel)
    }

    /// 讀取先前保存的 `<domain>/cert.pem`；不存在時回傳 `None`。
    pub fn load_certificate(&self, domain: &str) -> Result<Option<Certificate>> {
        match self.storage.load_certificate(domain)? {
            Some(pem) => Ok(Some(Certificate::new(&pem)?)),
            None => Ok(None),
        }
    }
}

/// 用於構建 [`AcmeClient`] 實例的構造器，採用 builder 模式。
///
/// 未指定的協作者使用預設實作：[`ReqwestTransport`]、位於 `storage_path` 的 [`FileStorage`]、
/// 位於 `webroot` 的 [`WebrootPublisher`] 與 [`NoopLogger`]。
pub struct AcmeClientBuilder {
    config: AcmeConfig,
    transport: Option<Arc<dyn Transport>>,
    storage: Option<Arc<dyn Storage>>,
    publisher: Option<Arc<dyn ChallengePublisher>>,
    logger: Option<Arc<dyn Logger>>,
}

impl AcmeClientBuilder {
    pub fn new(config: AcmeConfig) -> Self {
        Self {
            config,
            transport: None,
            storage: None,
            publisher: None,
            logger: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn ChallengePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// # 錯誤
    ///
    /// 預設傳輸層無法初始化或預設儲存目錄無法建立時回傳錯誤。
    pub fn build(self) -> Result<AcmeClient> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let storage = match self.storage {
            Some(storage) => storage,
            None => Arc::new(FileStorage::open(&self.config.storage_path)?),
        };
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(WebrootPublisher::new(&self.config.webroot)));
        let logger = self.logger.unwrap_or_else(|| Arc::new(NoopLogger));

        Ok(AcmeClient {
            config: self.config,
            transport,
            storage,
            publisher,
            logger,
        })
    }
}

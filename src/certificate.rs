use chrono::{DateTime, Duration, Utc};
use openssl::{asn1::Asn1Time, x509::X509};
use thiserror::Error;

use crate::storage::{Storage, StorageError};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("No certificate found in PEM data")]
    Empty,
    #[error("Unterminated certificate block")]
    Unterminated,
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
}

/// 自定義結果型別，錯誤類型為 `CertificateError`
type Result<T> = std::result::Result<T, CertificateError>;

const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const END: &str = "-----END CERTIFICATE-----";

/// CA 回傳的憑證鏈。
///
/// 第一個區塊為葉憑證，其餘依序為中繼憑證；`fullchain` 為兩者相接。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateBundle {
    pub leaf: String,
    pub chain: Vec<String>,
    pub fullchain: String,
}

impl CertificateBundle {
    /// 將 PEM 文字切分為葉憑證與中繼憑證，每個區塊都必須能被解析為 X.509。
    ///
    /// # 錯誤
    ///
    /// 沒有任何 `CERTIFICATE` 區塊、區塊未結束或內容無法解析時回傳 [`CertificateError`]。
    pub fn parse(pem: &str) -> Result<Self> {
        let mut blocks = Vec::new();
        let mut rest = pem;
        while let Some(start) = rest.find(BEGIN) {
            let after = &rest[start..];
            let end = after.find(END).ok_or(CertificateError::Unterminated)? + END.len();
            let block = format!("{}\n", after[..end].trim());
            X509::from_pem(block.as_bytes())?;
            blocks.push(block);
            rest = &after[end..];
        }

        let mut blocks = blocks.into_iter();
        let leaf = blocks.next().ok_or(CertificateError::Empty)?;
        let chain: Vec<String> = blocks.collect();
        let fullchain = format!("{}{}", leaf, chain.concat());
        Ok(Self {
            leaf,
            chain,
            fullchain,
        })
    }

    /// 中繼憑證相接的 PEM 文字。
    pub fn chain_pem(&self) -> String {
        self.chain.concat()
    }
}

/// 憑證的持久化介面，所有 [`Storage`] 都自動實作。
///
/// 版面為 `<domain>/cert.pem`、`<domain>/chain.pem` 與 `<domain>/fullchain.pem`。
pub trait CertificateSink {
    /// 寫入三個檔案；任何一個寫入失敗時，已寫入的檔案會還原為先前的內容。
    fn save_certificate(&self, domain: &str, bundle: &CertificateBundle) -> std::result::Result<(), StorageError>;

    /// 讀取 `<domain>/cert.pem`；不存在時回傳 `Ok(None)`。
    fn load_certificate(&self, domain: &str) -> std::result::Result<Option<String>, StorageError>;
}

const BUNDLE_FILES: [&str; 3] = ["cert.pem", "chain.pem", "fullchain.pem"];

impl<S: Storage + ?Sized> CertificateSink for S {
    fn save_certificate(&self, domain: &str, bundle: &CertificateBundle) -> std::result::Result<(), StorageError> {
        let keys = BUNDLE_FILES.map(|file| format!("{}/{}", domain, file));
        let contents = [bundle.leaf.clone(), bundle.chain_pem(), bundle.fullchain.clone()];
        let previous = keys
            .iter()
            .map(|key| read_existing(self, key))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (written, (key, value)) in keys.iter().zip(&contents).enumerate() {
            if let Err(e) = self.write_file(key, value.as_bytes()) {
                restore(self, &keys[..written], &previous[..written]);
                return Err(e);
            }
        }
        Ok(())
    }

    fn load_certificate(&self, domain: &str) -> std::result::Result<Option<String>, StorageError> {
        Ok(read_existing(self, &format!("{}/cert.pem", domain))?
            .map(|pem| String::from_utf8_lossy(&pem).into_owned()))
    }
}

fn read_existing<S: Storage + ?Sized>(storage: &S, key: &str) -> std::result::Result<Option<Vec<u8>>, StorageError> {
    match storage.read_file(key) {
        Ok(data) => Ok(Some(data)),
        Err(StorageError::NotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// 盡力還原；呼叫端回傳的是原本的寫入錯誤。
fn restore<S: Storage + ?Sized>(storage: &S, keys: &[String], previous: &[Option<Vec<u8>>]) {
    for (key, old) in keys.iter().zip(previous) {
        let _ = match old {
            Some(data) => storage.write_file(key, data),
            None => storage.remove(key),
        };
    }
}

/// X.509 證書封裝結構，提供基本的證書解析與續約檢查功能
pub struct Certificate {
    /// 內部使用的 X509 證書對象
    pub cert: X509,
}

impl Certificate {
    /// 根據 PEM 格式字串解析 X.509 證書。
    pub fn new(pem: &str) -> Result<Self> {
        let cert = X509::from_pem(pem.as_bytes())?;
        Ok(Certificate { cert })
    }

    /// 證書的到期時間（UTC）。
    pub fn not_after(&self) -> Result<DateTime<Utc>> {
        let epoch = Asn1Time::from_unix(0)?;
        let diff = epoch.diff(self.cert.not_after())?;
        let seconds = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
        DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
    }

    /// 判斷證書是否應該進行續約
    ///
    /// # 參數
    ///
    /// - `threshold_days`: 續約閾值（以天為單位）
    ///
    /// # 回傳
    ///
    /// 剩餘有效時間少於閾值（或已過期）時回傳 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let remaining = self.not_after()? - Utc::now();
        Ok(remaining < Duration::days(i64::from(threshold_days)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use openssl::{
        asn1::Asn1Integer,
        bn::BigNum,
        hash::MessageDigest,
        x509::{X509NameBuilder, X509},
    };

    use super::*;
    use crate::{
        key_pair::{KeyAlgorithm, KeyPair},
        storage::MemStorage,
    };

    /// 產生有效期為 `days` 天的自簽憑證 PEM。
    pub(crate) fn self_signed(cn: &str, days: u32) -> String {
        let key = KeyPair::generate(KeyAlgorithm::EcP256).unwrap();
        let mut name = X509NameBuilder::new().unwrap();
        name.append_entry_by_text("CN", cn).unwrap();
        let name = name.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = Asn1Integer::from_bn(&BigNum::from_u32(1).unwrap()).unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(&key.pri_key).unwrap();
        builder
            .set_not_before(&Asn1Time::days_from_now(0).unwrap())
            .unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();
        builder.sign(&key.pri_key, MessageDigest::sha256()).unwrap();
        String::from_utf8(builder.build().to_pem().unwrap()).unwrap()
    }

    #[test]
    fn test_leaf_and_two_intermediates() {
        let leaf = self_signed("example.com", 90);
        let int1 = self_signed("Intermediate 1", 365);
        let int2 = self_signed("Intermediate 2", 365);
        let pem = format!("{}\n{}{}", leaf, int1, int2);

        let bundle = CertificateBundle::parse(&pem).unwrap();
        assert_eq!(bundle.leaf, leaf);
        assert_eq!(bundle.chain, vec![int1.clone(), int2.clone()]);
        assert_eq!(bundle.fullchain, format!("{}{}{}", leaf, int1, int2));
    }

    #[test]
    fn test_zero_blocks() {
        assert!(matches!(
            CertificateBundle::parse("no certificates here"),
            Err(CertificateError::Empty)
        ));
    }

    #[test]
    fn test_unparsable_block() {
        let leaf = self_signed("example.com", 90);
        let broken = format!("{}{}\nbm90IGEgY2VydA==\n{}\n", leaf, BEGIN, END);
        assert!(matches!(
            CertificateBundle::parse(&broken),
            Err(CertificateError::ParseError(_))
        ));
        let unterminated = format!("{}\nMIIB", BEGIN);
        assert!(matches!(
            CertificateBundle::parse(&unterminated),
            Err(CertificateError::Unterminated)
        ));
    }

    #[test]
    fn test_sink_layout() {
        let storage = MemStorage::new();
        let bundle =
            CertificateBundle::parse(&format!("{}{}", self_signed("a", 1), self_signed("b", 1)))
                .unwrap();
        storage.save_certificate("example.com", &bundle).unwrap();

        assert_eq!(storage.read_file("example.com/cert.pem").unwrap(), bundle.leaf.as_bytes());
        assert_eq!(
            storage.read_file("example.com/chain.pem").unwrap(),
            bundle.chain_pem().as_bytes()
        );
        assert_eq!(
            storage.load_certificate("example.com").unwrap(),
            Some(bundle.leaf.clone())
        );
        assert_eq!(storage.load_certificate("other.com").unwrap(), None);
    }

    /// 對 `chain.pem` 的寫入一律失敗。
    #[derive(Debug, Default)]
    struct FailingChain {
        inner: MemStorage,
    }

    impl Storage for FailingChain {
        fn read_file(&self, key: &str) -> std::result::Result<Vec<u8>, StorageError> {
            self.inner.read_file(key)
        }

        fn write_file(&self, key: &str, value: &[u8]) -> std::result::Result<(), StorageError> {
            if key.ends_with("chain.pem") && !key.ends_with("fullchain.pem") {
                return Err(StorageError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")));
            }
            self.inner.write_file(key, value)
        }

        fn remove(&self, key: &str) -> std::result::Result<(), StorageError> {
            self.inner.remove(key)
        }

        fn exists(&self, key: &str) -> std::result::Result<bool, StorageError> {
            self.inner.exists(key)
        }
    }

    #[test]
    fn test_failed_save_restores_previous_files() {
        let storage = FailingChain::default();
        storage
            .inner
            .write_file("example.com/cert.pem", b"old leaf")
            .unwrap();
        let bundle = CertificateBundle::parse(&self_signed("example.com", 90)).unwrap();

        assert!(storage.save_certificate("example.com", &bundle).is_err());
        assert_eq!(storage.read_file("example.com/cert.pem").unwrap(), b"old leaf");
        assert!(!storage.exists("example.com/fullchain.pem").unwrap());
    }

    #[test]
    fn test_failed_first_save_leaves_no_files() {
        let storage = FailingChain::default();
        let bundle = CertificateBundle::parse(&self_signed("example.com", 90)).unwrap();

        assert!(storage.save_certificate("example.com", &bundle).is_err());
        assert_eq!(storage.load_certificate("example.com").unwrap(), None);
    }

    #[test]
    fn test_expiry_and_renewal() {
        let cert = Certificate::new(&self_signed("example.com", 10)).unwrap();
        let remaining = cert.not_after().unwrap() - Utc::now();
        assert!(remaining > Duration::days(9) && remaining <= Duration::days(10));

        assert!(cert.should_renew(30).unwrap());
        assert!(!cert.should_renew(5).unwrap());
    }
}

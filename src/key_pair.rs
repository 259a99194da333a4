use std::fmt;

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private, Public},
    rsa::Rsa,
    sha::sha256,
};
use thiserror::Error;

use crate::{
    base64::url_encode,
    jwk::{Jwk, JwkError},
    storage::{Storage, StorageError},
};

/// 鍵相關操作的錯誤列舉，涵蓋 OpenSSL、存儲、JWK 與其他相關錯誤。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Stored key at {path} is unreadable: {source}")]
    Corrupted {
        path: String,
        #[source]
        source: ErrorStack,
    },
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

/// 本模組使用的結果類型，當中錯誤皆為 `KeyError`。
type Result<T> = std::result::Result<T, KeyError>;

/// 產生新金鑰時使用的演算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAlgorithm {
    /// RSA，JWS 演算法為 `RS256`。
    Rsa { bits: u32 },
    /// NIST P-256，JWS 演算法為 `ES256`。
    EcP256,
}

impl Default for KeyAlgorithm {
    fn default() -> Self {
        Self::Rsa { bits: 4096 }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa { bits } => write!(f, "RSA-{}", bits),
            Self::EcP256 => f.write_str("EC-P256"),
        }
    }
}

/// 表示一組非對稱加密的金鑰對。
///
/// 帳戶金鑰與各網域的憑證金鑰都以此結構表示；公鑰在建立時從私鑰派生。
pub struct KeyPair {
    /// 私鑰，使用 OpenSSL 的 `PKey` 封裝。
    pub pri_key: PKey<Private>,
    /// 公鑰，從私鑰派生而來。
    pub pub_key: PKey<Public>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("alg", &self.jws_alg())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// 以指定演算法產生新的金鑰對。
    ///
    /// # 錯誤
    ///
    /// OpenSSL 產生金鑰失敗時回傳 [`KeyError::OpenSSL`]。
    pub fn generate(algorithm: KeyAlgorithm) -> Result<Self> {
        let pri_key = match algorithm {
            KeyAlgorithm::Rsa { bits } => PKey::from_rsa(Rsa::generate(bits)?)?,
            KeyAlgorithm::EcP256 => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
        };
        Self::from_private(pri_key)
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對。
    ///
    /// 只接受 RSA 與 P-256 金鑰，其他類型回傳 [`KeyError::UnsupportedAlgorithm`]。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        let pri_key = PKey::private_key_from_pem(pri_key_pem)?;
        Self::from_private(pri_key)
    }

    fn from_private(pri_key: PKey<Private>) -> Result<Self> {
        match pri_key.id() {
            Id::RSA => {}
            Id::EC => {
                let curve = pri_key.ec_key()?.group().curve_name();
                if curve != Some(Nid::X9_62_PRIME256V1) {
                    return Err(KeyError::UnsupportedAlgorithm(format!(
                        "EC curve {:?}",
                        curve
                    )));
                }
            }
            other => return Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
        let pub_key = PKey::public_key_from_der(&pri_key.public_key_to_der()?)?;
        Ok(Self { pri_key, pub_key })
    }

    /// 私鑰的 PKCS#8 PEM 編碼。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    /// 公鑰的 SubjectPublicKeyInfo PEM 編碼。
    pub fn public_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pub_key.public_key_to_pem()?)
    }

    /// 對應的 JWS `alg`：RSA 為 `RS256`，EC 為 `ES256`。
    pub fn jws_alg(&self) -> &'static str {
        match self.pri_key.id() {
            Id::EC => "ES256",
            _ => "RS256",
        }
    }

    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::new(self)?)
    }

    /// 計算並回傳金鑰對的縮影（thumbprint）。
    ///
    /// 以標準成員順序的 JWK JSON 做 SHA-256，再以 URL-safe Base64（無填充）編碼。
    pub fn thumbprint(&self) -> Result<String> {
        let json = self.jwk()?.to_json()?;
        Ok(url_encode(sha256(json.as_bytes())))
    }

    /// 取得金鑰的參數，例如 RSA 金鑰的位元長度。
    pub fn key_parameters(&self) -> Result<u32> {
        match self.pri_key.id() {
            Id::RSA => Ok(self.pri_key.rsa()?.size() * 8),
            Id::EC => Ok(256),
            other => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }
}

/// 私鑰的持久化介面。
///
/// 所有 [`Storage`] 都自動實作此介面，金鑰以 PEM 存放在指定的 key 下。
pub trait KeyStore {
    /// 讀取私鑰；不存在時回傳 `Ok(None)`。
    ///
    /// # 錯誤
    ///
    /// 存在但無法解析時回傳 [`KeyError::Corrupted`]，不會以新金鑰取代。
    fn load_private_key(&self, path: &str) -> Result<Option<KeyPair>>;

    /// 將私鑰以 PEM 寫入 `path`。
    fn save_private_key(&self, path: &str, key: &KeyPair) -> Result<()>;

    /// 將公鑰以 PEM 寫入 `path`。
    fn save_public_key(&self, path: &str, key: &KeyPair) -> Result<()>;

    /// 讀取 `path` 上的私鑰，不存在時以 `algorithm` 產生並保存。
    ///
    /// 新產生的金鑰另將公鑰寫入同目錄的 `public.pem`。
    ///
    /// # 回傳
    ///
    /// 金鑰與是否為新產生的旗標。
    fn load_or_generate(&self, path: &str, algorithm: KeyAlgorithm) -> Result<(KeyPair, bool)> {
        if let Some(key) = self.load_private_key(path)? {
            return Ok((key, false));
        }
        let key = KeyPair::generate(algorithm)?;
        self.save_private_key(path, &key)?;
        self.save_public_key(&public_key_path(path), &key)?;
        Ok((key, true))
    }
}

fn public_key_path(private_key_path: &str) -> String {
    match private_key_path.rsplit_once('/') {
        Some((dir, _)) => format!("{}/public.pem", dir),
        None => "public.pem".to_string(),
    }
}

impl<S: Storage + ?Sized> KeyStore for S {
    fn load_private_key(&self, path: &str) -> Result<Option<KeyPair>> {
        let pem = match self.read_file(path) {
            Ok(pem) => pem,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match PKey::private_key_from_pem(&pem) {
            Ok(pri_key) => KeyPair::from_private(pri_key).map(Some),
            Err(source) => Err(KeyError::Corrupted {
                path: path.to_owned(),
                source,
            }),
        }
    }

    fn save_private_key(&self, path: &str, key: &KeyPair) -> Result<()> {
        self.write_file(path, &key.to_pem()?)?;
        Ok(())
    }

    fn save_public_key(&self, path: &str, key: &KeyPair) -> Result<()> {
        self.write_file(path, &key.public_key_pem()?)?;
        Ok(())
    }
}

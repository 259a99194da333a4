use openssl::{bn::BigNum, ecdsa::EcdsaSig, error::ErrorStack, hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    /// 簽名過程中 OpenSSL 回報錯誤。
    #[error("Signing error: {0}")]
    Signing(#[from] ErrorStack),
    /// 不支援的簽名演算法，附帶未支援的演算法名稱。
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

type Result<T> = std::result::Result<T, SignatureError>;

/// ES256 簽名中 r 與 s 各自的固定長度。
const ES256_COMPONENT_LEN: i32 = 32;

/// 定義簽名演算法的介面。
trait SignatureAlgorithmT {
    /// 使用指定的金鑰對資料進行簽名，回傳 JWS 所需的原始簽名位元組。
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>>;
}

/// RS256：RSASSA-PKCS1-v1_5 搭配 SHA-256。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ES256：ECDSA P-256 搭配 SHA-256。
///
/// OpenSSL 產生 DER 編碼的簽名，JWS 需要固定 64 位元組的 `r || s`。
struct EcdsaSignature;

impl SignatureAlgorithmT for EcdsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &key_pair.pri_key)?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let sig = EcdsaSig::from_der(&der)?;
        let mut raw = sig.r().to_vec_padded(ES256_COMPONENT_LEN)?;
        raw.extend(sig.s().to_vec_padded(ES256_COMPONENT_LEN)?);
        Ok(raw)
    }
}

/// 簽名演算法工廠，用於根據 JWS `alg` 取得對應的簽名演算法實作。
struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(alg: &str) -> Result<Box<dyn SignatureAlgorithmT>> {
        match alg {
            "RS256" => Ok(Box::new(RsaSignature)),
            "ES256" => Ok(Box::new(EcdsaSignature)),
            _ => Err(SignatureError::UnsupportedAlgorithm(alg.to_string())),
        }
    }
}

/// 對 JWS 簽名輸入 `protected "." payload` 進行簽名。
///
/// # 參數
///
/// - `header_b64`: 已進行 Base64 URL 編碼的保護標頭。
/// - `payload_b64`: 已進行 Base64 URL 編碼的載荷，POST-as-GET 時為空字串。
/// - `key_pair`: 簽名使用的金鑰對，其類型決定演算法。
///
/// # 回傳
///
/// 原始簽名位元組（尚未編碼）。
pub fn create_signature(header_b64: &str, payload_b64: &str, key_pair: &KeyPair) -> Result<Vec<u8>> {
    let signing_input = format!("{}.{}", header_b64, payload_b64);
    let algorithm = SignatureAlgorithmFactory::get_algorithm(key_pair.jws_alg())?;
    algorithm.sign(signing_input.as_bytes(), key_pair)
}

/// 以 `key_pair` 的公鑰驗證 [`create_signature`] 產生的簽名。
pub fn verify_signature(
    header_b64: &str,
    payload_b64: &str,
    signature: &[u8],
    key_pair: &KeyPair,
) -> Result<bool> {
    use openssl::sign::Verifier;

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    match key_pair.jws_alg() {
        "ES256" => {
            if signature.len() != (ES256_COMPONENT_LEN * 2) as usize {
                return Ok(false);
            }
            let (r, s) = signature.split_at(ES256_COMPONENT_LEN as usize);
            let sig = EcdsaSig::from_private_components(BigNum::from_slice(r)?, BigNum::from_slice(s)?)?;
            let digest = openssl::sha::sha256(signing_input.as_bytes());
            let ec_key = key_pair.pub_key.ec_key()?;
            Ok(sig.verify(&digest, &ec_key)?)
        }
        _ => {
            let mut verifier = Verifier::new(MessageDigest::sha256(), &key_pair.pub_key)?;
            verifier.update(signing_input.as_bytes())?;
            Ok(verifier.verify(signature)?)
        }
    }
}

use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
    pkey::Id,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{base64::url_encode, key_pair::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的金鑰類型。
    #[error("Unsupported key type: {0}")]
    UnsupportedAlgorithm(String),
    /// 從 OpenSSL 取出公鑰參數失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// P-256 座標固定為 32 位元組，不足時左側補零。
const P256_COORDINATE_LEN: i32 = 32;

/// JSON Web Key (JWK) 的公開部分。
///
/// 欄位依字典順序宣告，序列化結果即為 RFC 7638 縮影所需的標準形式，
/// 也就是 key authorization 使用的 JSON。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Jwk {
    Rsa(RsaJwk),
    Ec(EcJwk),
}

/// RSA 公鑰：`{"e", "kty", "n"}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub e: String,
    pub kty: String,
    pub n: String,
}

/// EC 公鑰：`{"crv", "kty", "x", "y"}`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcJwk {
    pub crv: String,
    pub kty: String,
    pub x: String,
    pub y: String,
}

impl Jwk {
    /// 根據金鑰對的公鑰建立 JWK。
    ///
    /// # 錯誤
    ///
    /// 金鑰不是 RSA 或 EC 時回傳 [`JwkError::UnsupportedAlgorithm`]。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        match key_pair.pub_key.id() {
            Id::RSA => {
                let rsa = key_pair.pub_key.rsa()?;
                Ok(Jwk::Rsa(RsaJwk {
                    e: url_encode(rsa.e().to_vec()),
                    kty: "RSA".to_owned(),
                    n: url_encode(rsa.n().to_vec()),
                }))
            }
            Id::EC => {
                let ec = key_pair.pub_key.ec_key()?;
                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates(ec.group(), &mut x, &mut y, &mut ctx)?;
                Ok(Jwk::Ec(EcJwk {
                    crv: "P-256".to_owned(),
                    kty: "EC".to_owned(),
                    x: url_encode(x.to_vec_padded(P256_COORDINATE_LEN)?),
                    y: url_encode(y.to_vec_padded(P256_COORDINATE_LEN)?),
                }))
            }
            other => Err(JwkError::UnsupportedAlgorithm(format!("{:?}", other))),
        }
    }

    /// 以標準成員順序序列化的 JSON 字串。
    pub fn to_json(&self) -> Result<String, JwkError> {
        serde_json::to_string(self).map_err(JwkError::from)
    }
}

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, Problem, Result},
    key_pair::{KeyError, KeyPair},
    payload::Identifier,
    storage::StorageError,
};

/// 表示 ACME 挑戰的類型。
///
/// 只有 HTTP-01 有完整的驗證流程；挑戰的選取則對任何類型字串都適用。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum ChallengeType {
    #[default]
    Http01,
    Dns01,
    TlsAlpn01,
}

impl ChallengeType {
    /// 根據字串返回對應的挑戰類型，若不支援則返回 `None`。
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "http-01" => Some(Self::Http01),
            "dns-01" => Some(Self::Dns01),
            "tls-alpn-01" => Some(Self::TlsAlpn01),
            _ => None,
        }
    }

    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
        }
    }

    /// 可供自我檢查的資源 URL；只有 HTTP-01 有。
    pub fn self_check_url(&self, domain: &str, token: &str) -> Option<String> {
        match self {
            Self::Http01 => Some(format!(
                "http://{}/.well-known/acme-challenge/{}",
                domain, token
            )),
            _ => None,
        }
    }
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 表示 ACME 挑戰的狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 表示授權的狀態。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    Pending,
    Processing,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Challenge {
    /// 類型字串，例如 `http-01`
    #[serde(rename = "type")]
    pub challenge_type: String,
    pub url: String,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    pub status: ChallengeStatus,
    /// 驗證成功後可能返回的驗證時間
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Challenge {
    /// 伺服器提供的失敗原因，沒有時以狀態描述代替。
    pub fn failure_detail(&self) -> String {
        match &self.error {
            Some(problem) => problem.to_string(),
            None => format!("challenge {} is {:?}", self.url, self.status),
        }
    }
}

/// 表示一個網域的授權。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Authorization {
    pub identifier: Identifier,
    /// 未提供時視為 `pending`
    #[serde(default)]
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

impl Authorization {
    pub fn domain(&self) -> &str {
        &self.identifier.value
    }

    /// 依序尋找第一個類型相符的挑戰。
    ///
    /// # 錯誤
    ///
    /// 沒有相符的挑戰時回傳 [`AcmeError::ChallengeUnavailable`]，並附上伺服器提供的授權內容。
    pub fn select_challenge(&self, challenge_type: &ChallengeType) -> Result<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.challenge_type == challenge_type.as_str())
            .ok_or_else(|| AcmeError::ChallengeUnavailable {
                domain: self.domain().to_string(),
                challenge_type: challenge_type.to_string(),
                response: serde_json::to_string(self).unwrap_or_default(),
            })
    }
}

/// 計算 key authorization：`token + "." + 帳戶金鑰縮影`。
pub fn key_authorization(token: &str, account_key: &KeyPair) -> std::result::Result<String, KeyError> {
    Ok(format!("{}.{}", token, account_key.thumbprint()?))
}

/// 將挑戰答案公開給 CA 驗證的能力。
///
/// HTTP-01 時必須讓 `http://<domain>/.well-known/acme-challenge/<token>` 回傳 key authorization。
pub trait ChallengePublisher: Send + Sync {
    fn publish(&self, domain: &str, token: &str, key_authorization: &str) -> std::result::Result<(), StorageError>;

    /// 移除已公開的答案；答案不存在時不視為錯誤。
    fn unpublish(&self, domain: &str, token: &str) -> std::result::Result<(), StorageError>;
}

/// token 只允許 base64url 字元，避免寫出 web root 以外的路徑。
fn check_token(token: &str) -> std::result::Result<(), StorageError> {
    let valid = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!("Invalid challenge token: {}", token)))
    }
}

/// 將答案寫入網頁伺服器的 web root：`<webroot>/.well-known/acme-challenge/<token>`。
///
/// 目錄以 `0755`、檔案以 `0644` 建立，讓網頁伺服器能讀取。
#[derive(Debug, Clone)]
pub struct WebrootPublisher {
    webroot: PathBuf,
}

impl WebrootPublisher {
    const CHALLENGE_DIR: &'static str = ".well-known/acme-challenge";

    pub fn new(webroot: impl Into<PathBuf>) -> Self {
        Self {
            webroot: webroot.into(),
        }
    }

    pub fn challenge_path(&self, token: &str) -> PathBuf {
        self.webroot.join(Self::CHALLENGE_DIR).join(token)
    }

    fn create_dir(path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(path)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn write_file(path: &Path, content: &[u8]) -> io::Result<()> {
        use std::io::Write;

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        options.open(path)?.write_all(content)
    }
}

impl ChallengePublisher for WebrootPublisher {
    fn publish(&self, _domain: &str, token: &str, key_authorization: &str) -> std::result::Result<(), StorageError> {
        check_token(token)?;
        Self::create_dir(&self.webroot.join(Self::CHALLENGE_DIR))?;
        Self::write_file(&self.challenge_path(token), key_authorization.as_bytes())?;
        Ok(())
    }

    fn unpublish(&self, _domain: &str, token: &str) -> std::result::Result<(), StorageError> {
        check_token(token)?;
        match fs::remove_file(self.challenge_path(token)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// 將答案保存在記憶體中（token → key authorization）。
///
/// 適合搭配程式內建的 HTTP 伺服器使用；複製出來的實例共用同一份資料。
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    answers: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 查詢 token 對應的 key authorization。
    pub fn get(&self, token: &str) -> Option<String> {
        self.answers.lock().ok()?.get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.answers.lock().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ChallengePublisher for MemoryPublisher {
    fn publish(&self, _domain: &str, token: &str, key_authorization: &str) -> std::result::Result<(), StorageError> {
        check_token(token)?;
        self.answers
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(token.to_string(), key_authorization.to_string());
        Ok(())
    }

    fn unpublish(&self, _domain: &str, token: &str) -> std::result::Result<(), StorageError> {
        self.answers
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .remove(token);
        Ok(())
    }
}

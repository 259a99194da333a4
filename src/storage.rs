//! 金鑰、CSR 與憑證的持久化儲存。
//!
//! 所有 key 都是以 `/` 分隔的相對路徑，例如 `_account/acme-v02.api.letsencrypt.org/private.pem`
//! 或 `example.com/fullchain.pem`，並會被正規化以避免跳出儲存根目錄。

use std::{
    collections::{HashMap, HashSet},
    fmt, fs,
    io::{self, Write},
    path::{Component, Path, PathBuf},
    sync::{Arc, RwLock},
};

use thiserror::Error;

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Key is invalid: {0}")]
    InvalidKey(String),
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Key is a dir: {0}")]
    IsDir(String),
    #[error("Not a directory: {0}")]
    NotDirectory(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

/// 儲存操作的結果類型，封裝 [`StorageError`]。
pub type Result<T> = std::result::Result<T, StorageError>;

/// 定義儲存系統所需實現的 API：以 key 讀取、寫入、刪除檔案。
pub trait Storage: Send + Sync + fmt::Debug {
    /// 讀取指定 key 所對應檔案的內容；不存在時回傳 [`StorageError::NotFound`]。
    fn read_file(&self, key: &str) -> Result<Vec<u8>>;

    /// 將資料寫入指定 key 所對應的檔案中，必要時自動建立父目錄。
    fn write_file(&self, key: &str, value: &[u8]) -> Result<()>;

    /// 刪除指定 key 所對應的檔案或目錄；不存在時不視為錯誤。
    fn remove(&self, key: &str) -> Result<()>;

    /// 檢查指定 key 是否存在於儲存系統中。
    fn exists(&self, key: &str) -> Result<bool>;
}

/// 私有工具，提供 key 正規化與驗證等輔助函式。
struct KeyUtils;

impl KeyUtils {
    /// 將 key 正規化為相對路徑，並拒絕不合法字元與跳出根目錄的 `..`。
    fn normalize(key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey("Empty key".to_string()));
        }
        if key.contains('\0') || key.contains('\n') || key.contains('\r') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid characters in key: {}",
                key
            )));
        }
        if key.contains("//") || key.contains('\\') {
            return Err(StorageError::InvalidKey(format!(
                "Invalid separator in key: {}",
                key
            )));
        }

        let mut normalized = PathBuf::new();
        for component in Path::new(key).components() {
            match component {
                Component::RootDir | Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(StorageError::InvalidKey(format!(
                            "Cannot use '..' to escape root directory: {}",
                            key
                        )));
                    }
                }
                Component::Normal(name) => match name.to_str() {
                    Some(name) => normalized.push(name),
                    None => {
                        return Err(StorageError::InvalidKey(format!(
                            "Non-UTF8 path component in: {}",
                            key
                        )))
                    }
                },
                Component::Prefix(_) => {
                    return Err(StorageError::InvalidKey(format!("Invalid path: {}", key)))
                }
            }
        }
        Ok(normalized)
    }

    /// 驗證檔案 key：不得以斜線結尾，也不得指向根目錄本身。
    fn verify_file_key(key: &str) -> Result<PathBuf> {
        let path = Self::normalize(key)?;
        if key.ends_with('/') || path.as_os_str().is_empty() {
            return Err(StorageError::InvalidKey(format!(
                "File key cannot end with '/': {}",
                key
            )));
        }
        Ok(path)
    }
}

/// 以實體目錄為根的儲存實作，每個 key 對應一個檔案。
///
/// 在 unix 上，目錄以 `0700`、檔案以 `0600` 權限建立，因為同一棵目錄樹內存放私鑰。
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// 開啟（必要時建立）以 `root` 為根的儲存。
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        Self::make_dirs(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 判斷指定 key 是否為目錄。
    pub fn is_dir(&self, key: &str) -> Result<bool> {
        Ok(self.path_of(key)?.is_dir())
    }

    fn path_of(&self, key: &str) -> Result<PathBuf> {
        Ok(self.root.join(KeyUtils::normalize(key)?))
    }

    fn make_dirs(path: &Path) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(path)?;
        }
        #[cfg(not(unix))]
        fs::create_dir_all(path)?;
        Ok(())
    }

    fn open_for_write(path: &Path) -> io::Result<fs::File> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path)
    }
}

impl Storage for FileStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(KeyUtils::verify_file_key(key)?);
        if path.is_dir() {
            return Err(StorageError::IsDir(key.to_string()));
        }
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.root.join(KeyUtils::verify_file_key(key)?);
        if let Some(parent) = path.parent() {
            if parent.is_file() {
                return Err(StorageError::NotDirectory(
                    parent.to_string_lossy().into_owned(),
                ));
            }
            Self::make_dirs(parent)?;
        }
        if path.is_dir() {
            return Err(StorageError::IsDir(key.to_string()));
        }

        // 先寫入暫存檔再改名，讀取端不會看到寫了一半的憑證或金鑰。
        let mut temp = path.clone().into_os_string();
        temp.push(".tmp");
        let temp = PathBuf::from(temp);
        let mut file = Self::open_for_write(&temp)?;
        file.write_all(value)?;
        file.sync_all()?;
        fs::rename(&temp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_of(key)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.path_of(key)?.exists())
    }
}

/// 基於記憶體的儲存實作，資料與目錄結構皆保存在記憶體中。
#[derive(Debug, Default, Clone)]
pub struct MemStorage {
    data: Arc<RwLock<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<RwLock<HashSet<PathBuf>>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// 判斷指定 key 是否為（因寫入檔案而產生的）目錄。
    pub fn is_dir(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self
            .dirs
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains(&path))
    }

    /// 將 `path` 的所有上層目錄登記為目錄，遇到同名檔案則失敗。
    fn register_parents(&self, path: &Path) -> Result<()> {
        let data = self.data.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut dirs = self.dirs.write().map_err(|_| StorageError::LockPoisoned)?;
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_os_str().is_empty() {
                break;
            }
            if data.contains_key(ancestor) {
                return Err(StorageError::NotDirectory(
                    ancestor.to_string_lossy().into_owned(),
                ));
            }
            dirs.insert(ancestor.to_path_buf());
        }
        Ok(())
    }
}

impl Storage for MemStorage {
    fn read_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = KeyUtils::verify_file_key(key)?;
        if self.is_dir(key)? {
            return Err(StorageError::IsDir(key.to_string()));
        }
        self.data
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .get(&path)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    fn write_file(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = KeyUtils::verify_file_key(key)?;
        if self.is_dir(key)? {
            return Err(StorageError::IsDir(key.to_string()));
        }
        self.register_parents(&path)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .insert(path, value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = KeyUtils::normalize(key)?;
        self.data
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .retain(|p, _| !p.starts_with(&path));
        self.dirs
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .retain(|p| !p.starts_with(&path));
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = KeyUtils::normalize(key)?;
        Ok(self
            .data
            .read()
            .map_err(|_| StorageError::LockPoisoned)?
            .contains_key(&path)
            || self
                .dirs
                .read()
                .map_err(|_| StorageError::LockPoisoned)?
                .contains(&path))
    }
}

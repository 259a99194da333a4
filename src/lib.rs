//! # lescrypt
//!
//! ACME（RFC 8555）客戶端協議引擎，用於向 Let's Encrypt 等 CA 自動申請憑證。
//!
//! 一次簽發依序經過：
//!
//! 1. 取得目錄並以 `HEAD newNonce` 取得第一個 nonce
//! 2. 以帳戶金鑰（RSA 或 P-256）簽署的 JWS 註冊或找回帳戶
//! 3. 建立訂單並逐一完成 HTTP-01 授權（發布答案、自我檢查、通知 CA、輪詢狀態）
//! 4. 以網域金鑰產生 CSR 送出 finalize，輪詢並下載憑證鏈
//! 5. 將 `cert.pem`、`chain.pem` 與 `fullchain.pem` 保存至 `<主網域>/`
//!
//! 所有輪詢都有次數上限並可透過 [`CancellationToken`] 中止；收到 `badNonce`
//! 時會以新的 nonce 重送有限次數。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use lescrypt::{logger::LogFacade, AcmeClient, AcmeConfig, CancellationToken};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AcmeConfig::default()
//!         .with_directory_url(AcmeConfig::LETS_ENCRYPT_STAGING)
//!         .with_contact("admin@example.com")
//!         .with_webroot("/var/www/html");
//!
//!     let client = AcmeClient::builder(config)
//!         .logger(Arc::new(LogFacade::new("lescrypt")))
//!         .build()?;
//!
//!     let bundle = client.obtain_certificate(
//!         &["example.com", "www.example.com"],
//!         &CancellationToken::new(),
//!     )?;
//!     println!("{}", bundle.fullchain);
//!     Ok(())
//! }
//! ```
//!
//! 各步驟也可以單獨使用，詳見 [`session`]、[`account`]、[`order`]、
//! [`authorization`] 與 [`issuance`] 模組。

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod error;
pub mod issuance;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod logger;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod poll;
pub mod protection;
pub mod session;
pub mod signature;
pub mod storage;
pub mod transport;

pub use certificate::{Certificate, CertificateBundle};
pub use challenge::{ChallengePublisher, ChallengeType, MemoryPublisher, WebrootPublisher};
pub use client::{AcmeClient, AcmeClientBuilder};
pub use config::AcmeConfig;
pub use csr::CsrSubject;
pub use error::{AcmeError, ErrorKind, Problem, Result};
pub use key_pair::KeyAlgorithm;
pub use poll::{CancellationToken, PollPolicy};
pub use storage::{FileStorage, MemStorage, Storage};

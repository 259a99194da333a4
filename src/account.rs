//! ACME 帳戶註冊。
//!
//! 帳戶以伺服器發放的帳戶 URL 識別。以同一把金鑰重新註冊時，伺服器會回傳既有帳戶，
//! 因此每次開啟工作階段都直接送出 newAccount 取得帳戶 URL，不另外保存。

use serde::Deserialize;

use crate::{
    error::{AcmeError, Result},
    jws::Payload,
    payload::{NewAccountPayload, PayloadT},
    session::Session,
};

/// 表示 ACME 帳戶。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// 帳戶 URL，也是之後請求的 `kid`。
    pub url: String,
    /// 帳戶所屬聯絡資訊（`mailto:` URI）。
    pub contacts: Vec<String>,
    pub terms_agreed: bool,
    /// 伺服器回報的帳戶狀態，例如 `valid`。
    pub status: Option<String>,
    /// 本次請求是否建立了新帳戶（HTTP 201）。
    pub created: bool,
}

#[derive(Debug, Default, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contact: Vec<String>,
}

/// 確保帳戶存在並將帳戶 URL 設為工作階段的 `kid`。
///
/// # 參數
///
/// - `session`: 尚未取得 `kid` 的工作階段，請求以內嵌 `jwk` 簽名。
/// - `contacts`: 聯絡用電子郵件，可為空；未帶 `mailto:` 前綴時自動補上。
///
/// # 錯誤
///
/// - 非 2xx 回應：[`AcmeError::Server`]，保留伺服器的 problem document。
/// - 回應沒有 `Location` 標頭：[`AcmeError::MissingAccount`]。
pub fn ensure_account<S: AsRef<str>>(session: &mut Session, contacts: &[S]) -> Result<Account> {
    let payload = NewAccountPayload::new(contacts);
    payload.validate()?;
    let json = payload.to_json_string()?;

    let url = session.directory().new_account.clone();
    let response = session.signed_request_with_jwk(&url, Payload::Json(&json))?;
    if !response.is_success() {
        return Err(AcmeError::server(&url, response.status, &response.body));
    }

    let account_url = response
        .location()
        .filter(|l| !l.is_empty())
        .ok_or(AcmeError::MissingAccount)?
        .to_string();
    // 帳戶內容只用於補充資訊，無法解析時仍沿用 Location 取得的帳戶
    let body: AccountResponse = match serde_json::from_slice(&response.body) {
        Ok(body) => body,
        Err(e) => {
            session.logger().debug(format_args!(
                "Ignoring unreadable account body from {}: {}",
                url, e
            ));
            AccountResponse::default()
        }
    };
    let created = response.status == 201;

    if created {
        session
            .logger()
            .info(format_args!("Registered account {}", account_url));
    } else {
        session
            .logger()
            .info(format_args!("Using existing account {}", account_url));
    }
    session.set_kid(account_url.clone());

    Ok(Account {
        url: account_url,
        contacts: if body.contact.is_empty() {
            payload.contact
        } else {
            body.contact
        },
        terms_agreed: payload.terms_of_service_agreed,
        status: body.status,
        created,
    })
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{server_detail, AcmeError, Problem, Result},
    transport::Transport,
};

/// 目錄中的 `meta` 物件。
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DirectoryMeta {
    #[serde(rename = "termsOfService", default)]
    pub terms_of_service: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(rename = "caaIdentities", default)]
    pub caa_identities: Vec<String>,
    #[serde(rename = "externalAccountRequired", default)]
    pub external_account_required: bool,
}

/// 表示 ACME 伺服器的目錄，包含帳號、nonce、訂單等端點的 URL。
///
/// 每個工作階段取得一次，之後不再變動。
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Directory {
    /// 用於取得新的 nonce 值的 API 路徑。
    #[serde(rename = "newNonce")]
    pub new_nonce: String,
    /// 用於新帳號註冊的 API 路徑。
    #[serde(rename = "newAccount")]
    pub new_account: String,
    #[serde(rename = "newOrder")]
    pub new_order: String,
    #[serde(rename = "revokeCert", default)]
    pub revoke_cert: Option<String>,
    #[serde(rename = "keyChange", default)]
    pub key_change: Option<String>,
    /// 用於取得續期資訊的 API 路徑，可能不存在。
    #[serde(rename = "renewalInfo", default)]
    pub renewal_info: Option<String>,
    #[serde(default)]
    pub meta: Option<DirectoryMeta>,
}

impl Directory {
    const REQUIRED: [&'static str; 3] = ["newNonce", "newAccount", "newOrder"];

    /// 目錄文件的 URL：`ca_url` 已以 `/directory` 結尾時原樣使用，否則補上 `/directory`。
    pub fn url_for(ca_url: &str) -> String {
        let trimmed = ca_url.trim_end_matches('/');
        if trimmed.ends_with("/directory") {
            trimmed.to_string()
        } else {
            format!("{}/directory", trimmed)
        }
    }

    /// 取得並解析 CA 的目錄。
    ///
    /// # 參數
    ///
    /// - `transport`: 發送 GET 請求的傳輸層。
    /// - `ca_url`: CA 的基底 URL 或目錄 URL。
    ///
    /// # 錯誤
    ///
    /// 非 2xx 回應、內容不是 JSON 物件，或缺少 `newNonce`、`newAccount`、`newOrder`
    /// 任一項時回傳 [`AcmeError::Protocol`]，訊息中指明缺少的欄位。不會重試。
    pub fn resolve(transport: &dyn Transport, ca_url: &str) -> Result<Self> {
        let url = Self::url_for(ca_url);
        let response = transport.get(&url)?;
        if !response.is_success() {
            let problem = Problem::from_body(&response.body);
            return Err(AcmeError::Protocol(format!(
                "Directory request to {} failed: HTTP {}, {}",
                url,
                response.status,
                server_detail(problem.as_ref(), &response.body)
            )));
        }

        let value: Value = serde_json::from_slice(&response.body).map_err(|e| {
            AcmeError::Protocol(format!("Directory at {} is not valid JSON: {}", url, e))
        })?;
        let object = value.as_object().ok_or_else(|| {
            AcmeError::Protocol(format!("Directory at {} is not a JSON object", url))
        })?;
        for key in Self::REQUIRED {
            if !object.get(key).map_or(false, Value::is_string) {
                return Err(AcmeError::Protocol(format!(
                    "Directory at {} is missing {}",
                    url, key
                )));
            }
        }

        serde_json::from_value(value)
            .map_err(|e| AcmeError::Protocol(format!("Malformed directory at {}: {}", url, e)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        error::ErrorKind,
        transport::{HttpResponse, Method, MockTransport},
    };

    #[test]
    fn test_url_for() {
        assert_eq!(
            Directory::url_for("https://acme-v02.api.letsencrypt.org"),
            "https://acme-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(
            Directory::url_for("https://acme-staging-v02.api.letsencrypt.org/directory"),
            "https://acme-staging-v02.api.letsencrypt.org/directory"
        );
        assert_eq!(Directory::url_for("https://ca/"), "https://ca/directory");
    }

    #[test]
    fn test_resolve_full_directory() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "https://ca/directory",
            HttpResponse::json(
                200,
                &json!({
                    "newNonce": "https://ca/new-nonce",
                    "newAccount": "https://ca/new-acct",
                    "newOrder": "https://ca/new-order",
                    "revokeCert": "https://ca/revoke",
                    "keyChange": "https://ca/key-change",
                    "meta": {"termsOfService": "https://ca/tos", "caaIdentities": ["ca"]}
                }),
            ),
        );

        let dir = Directory::resolve(&mock, "https://ca").unwrap();
        assert_eq!(dir.new_nonce, "https://ca/new-nonce");
        assert_eq!(dir.revoke_cert.as_deref(), Some("https://ca/revoke"));
        assert!(dir.renewal_info.is_none());
        let meta = dir.meta.unwrap();
        assert_eq!(meta.terms_of_service.as_deref(), Some("https://ca/tos"));
        assert_eq!(meta.caa_identities, vec!["ca"]);
    }

    #[test]
    fn test_missing_required_key_names_it() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "https://ca/directory",
            HttpResponse::json(
                200,
                &json!({"newNonce": "https://ca/n", "newAccount": "https://ca/a"}),
            ),
        );

        let err = Directory::resolve(&mock, "https://ca/directory").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("newOrder"));
    }

    #[test]
    fn test_non_success_is_protocol_error() {
        let mock = MockTransport::new();
        mock.on(
            Method::Get,
            "https://ca/directory",
            HttpResponse::new(503).with_body("maintenance"),
        );

        let err = Directory::resolve(&mock, "https://ca").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("maintenance"));
        assert_eq!(mock.count(Method::Get, "https://ca/directory"), 1);
    }
}

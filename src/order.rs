use serde::{Deserialize, Serialize};

use crate::{
    error::{AcmeError, Problem, Result},
    payload::{Identifier, NewOrderPayload},
    session::{parse_body, Session},
    transport::HttpResponse,
};

/// 訂單狀態。
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// 表示訂單資料。
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Order {
    /// 伺服器回傳的訂單 URL（取自 `Location` 標頭，不在內容中）；伺服器未提供時為空字串
    #[serde(skip)]
    pub url: String,
    /// 訂單當前狀態，未提供時視為 `pending`
    #[serde(default)]
    pub status: OrderStatus,
    /// 過期時間（RFC 3339 字串）
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表，每個識別項一個
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

impl Order {
    /// 為 `domains` 建立新訂單。
    ///
    /// # 錯誤
    ///
    /// - 網域清單為空：[`AcmeError::Config`]
    /// - 非 2xx 回應：[`AcmeError::Server`]
    /// - 回應缺少 `finalize` 或 `authorizations`：[`AcmeError::Protocol`]
    ///
    /// 沒有 `Location` 標頭時訂單仍可使用，只是之後無法以 [`Order::refresh`] 重新讀取。
    pub fn create<S: AsRef<str>>(session: &mut Session, domains: &[S]) -> Result<Self> {
        let url = session.directory().new_order.clone();
        let response = session.post_payload(&url, &NewOrderPayload::new(domains))?;
        if !response.is_success() {
            return Err(AcmeError::server(&url, response.status, &response.body));
        }

        let order_url = response.location().unwrap_or_default().to_string();
        let order = Self::from_response(&order_url, &response)?;

        session.logger().info(format_args!(
            "Created order {} with {} authorization(s)",
            order.url,
            order.authorizations.len()
        ));
        Ok(order)
    }

    /// 以 POST-as-GET 重新讀取訂單。
    ///
    /// # 錯誤
    ///
    /// 訂單沒有 URL 時回傳 [`AcmeError::Protocol`]。
    pub fn refresh(&self, session: &mut Session) -> Result<Self> {
        if !self.has_url() {
            return Err(AcmeError::Protocol(
                "Order has no URL to refresh from".to_string(),
            ));
        }
        let mut order: Order = session.fetch(&self.url)?;
        order.url = self.url.clone();
        Ok(order)
    }

    /// 伺服器是否提供了訂單 URL。
    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }

    /// 解析含有訂單物件的回應（newOrder、finalize 與訂單查詢都回傳訂單物件）。
    pub(crate) fn from_response(order_url: &str, response: &HttpResponse) -> Result<Self> {
        let mut order: Order = parse_body(order_url, response)?;
        order.url = order_url.to_string();
        if order.finalize.is_empty() {
            return Err(AcmeError::Protocol(format!("Order {} has no finalize URL", order_url)));
        }
        Ok(order)
    }

    /// 訂單包含的網域名稱，依伺服器回傳順序。
    pub fn domains(&self) -> Vec<&str> {
        self.identifiers.iter().map(|i| i.value.as_str()).collect()
    }
}

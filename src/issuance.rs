//! 簽發流程：產生 CSR、最終確認訂單並下載憑證。

use openssl::x509::X509Req;
use serde::Deserialize;

use crate::{
    certificate::{CertificateBundle, CertificateSink},
    csr::{self, Csr, CsrSubject},
    error::{server_detail, AcmeError, Problem, Result},
    key_pair::{KeyAlgorithm, KeyPair, KeyStore},
    order::{Order, OrderStatus},
    payload::FinalizeOrderPayload,
    poll::{poll, CancellationToken, Poll, PollPolicy},
    session::{parse_body, Session},
    storage::Storage,
};

/// 完成簽發所需的設定與協作者。
pub struct Issuer<'a> {
    /// 存放網域金鑰、CSR 與憑證。
    pub storage: &'a dyn Storage,
    /// 網域金鑰不存在時以此演算法產生。
    pub domain_key: KeyAlgorithm,
    /// 沿用 `<domain>/last.csr`，不重新產生 CSR。
    pub reuse_csr: bool,
    /// CN 以外的 CSR 主體欄位。
    pub subject: CsrSubject,
    pub poll: PollPolicy,
}

impl<'a> Issuer<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            domain_key: KeyAlgorithm::default(),
            reuse_csr: false,
            subject: CsrSubject::default(),
            poll: PollPolicy::default(),
        }
    }

    /// 對所有授權皆已完成的訂單進行簽發，成功後保存憑證。
    ///
    /// # 參數
    ///
    /// - `session`: 已註冊帳戶的工作階段。
    /// - `order`: 已完成授權的訂單。
    /// - `domains`: 網域清單，第一個為主要網域，決定存放位置與 CN。
    /// - `cancel`: 取消輪詢用的 token。
    ///
    /// # 錯誤
    ///
    /// - 最終確認被拒：[`AcmeError::Finalize`]
    /// - 憑證下載回應非 200/202：[`AcmeError::Issuance`]
    /// - 輪詢次數用盡：[`AcmeError::Timeout`]
    /// - 憑證內容無法解析：[`AcmeError::Parse`]，此時不寫入任何憑證檔案
    pub fn issue<S: AsRef<str>>(
        &self,
        session: &mut Session,
        order: &Order,
        domains: &[S],
        cancel: &CancellationToken,
    ) -> Result<CertificateBundle> {
        let primary = domains
            .first()
            .map(|d| d.as_ref().to_string())
            .ok_or_else(|| AcmeError::Config("At least one domain is required".into()))?;

        let (domain_key, generated) = self
            .storage
            .load_or_generate(&format!("{}/private.pem", primary), self.domain_key)?;
        if generated {
            session.logger().info(format_args!(
                "Generated {} key for {}",
                self.domain_key, primary
            ));
        }

        let csr = self.certificate_request(session, &primary, domains, &domain_key)?;
        let cert_url = self.finalize(session, order, &csr, cancel)?;
        let pem = self.download(session, &cert_url, cancel)?;

        let bundle = CertificateBundle::parse(&pem)?;
        self.storage.save_certificate(&primary, &bundle)?;
        session.logger().info(format_args!(
            "Certificate for {} saved with {} chain certificate(s)",
            primary,
            bundle.chain.len()
        ));
        Ok(bundle)
    }

    fn certificate_request<S: AsRef<str>>(
        &self,
        session: &Session,
        primary: &str,
        domains: &[S],
        domain_key: &KeyPair,
    ) -> Result<X509Req> {
        let path = format!("{}/last.csr", primary);
        if self.reuse_csr && self.storage.exists(&path)? {
            session
                .logger()
                .info(format_args!("Reusing CSR from {}", path));
            return Ok(csr::from_pem(&self.storage.read_file(&path)?)?);
        }

        let req = Csr::for_domains(domains)
            .with_subject(self.subject.clone())
            .build(domain_key)?;
        self.storage.write_file(&path, &req.to_pem()?)?;
        Ok(req)
    }

    /// 送出 CSR，回傳憑證 URL。
    ///
    /// finalize 回應可能只有 `certificate` 欄位；沒有憑證 URL 且訂單 URL 已知時，
    /// 輪詢訂單直到出現憑證 URL。
    fn finalize(
        &self,
        session: &mut Session,
        order: &Order,
        csr: &X509Req,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let payload = FinalizeOrderPayload::new(&csr.to_der()?);
        let response = session.post_payload(&order.finalize, &payload)?;
        if !response.is_success() {
            let problem = Problem::from_body(&response.body);
            return Err(AcmeError::Finalize {
                status: response.status,
                detail: server_detail(problem.as_ref(), &response.body),
            });
        }
        session
            .logger()
            .info(format_args!("Finalized order at {}", order.finalize));

        let finalized: FinalizeResponse = if response.body.iter().all(u8::is_ascii_whitespace) {
            FinalizeResponse::default()
        } else {
            parse_body(&order.finalize, &response)?
        };
        if let Some(url) = finalized.certificate_url(order, response.status)? {
            return Ok(url);
        }
        if !order.has_url() {
            return Err(AcmeError::Protocol(format!(
                "Finalize response from {} has no certificate URL",
                order.finalize
            )));
        }

        poll(&self.poll, cancel, "order processing", |attempt| {
            let current = order.refresh(session)?;
            session.logger().debug(format_args!(
                "Order {} is {:?} (attempt {})",
                order.url, current.status, attempt
            ));
            Ok(match FinalizeResponse::from(current).certificate_url(order, 200)? {
                Some(url) => Poll::Ready(url),
                None => Poll::Pending,
            })
        })
    }

    fn download(
        &self,
        session: &mut Session,
        cert_url: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        poll(&self.poll, cancel, "certificate download", |attempt| {
            let response = session.post_as_get(cert_url)?;
            session.logger().debug(format_args!(
                "Certificate download returned HTTP {} (attempt {})",
                response.status, attempt
            ));
            match response.status {
                200 => Ok(Poll::Ready(response.text())),
                202 => Ok(Poll::Pending),
                status => {
                    let problem = Problem::from_body(&response.body);
                    Err(AcmeError::Issuance {
                        status,
                        detail: server_detail(problem.as_ref(), &response.body),
                    })
                }
            }
        })
    }
}

/// finalize 回應與訂單查詢中用得到的欄位，全部可省略。
#[derive(Debug, Default, Deserialize)]
struct FinalizeResponse {
    #[serde(default)]
    status: Option<OrderStatus>,
    #[serde(default)]
    certificate: Option<String>,
    #[serde(default)]
    error: Option<Problem>,
}

impl From<Order> for FinalizeResponse {
    fn from(order: Order) -> Self {
        Self {
            status: Some(order.status),
            certificate: order.certificate,
            error: order.error,
        }
    }
}

impl FinalizeResponse {
    /// 已有憑證 URL 時回傳它；訂單失敗時回傳 [`AcmeError::Finalize`]。
    fn certificate_url(self, order: &Order, http_status: u16) -> Result<Option<String>> {
        if self.status == Some(OrderStatus::Invalid) {
            return Err(AcmeError::Finalize {
                status: http_status,
                detail: self
                    .error
                    .as_ref()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| format!("order at {} is invalid", order.finalize)),
            });
        }
        Ok(self.certificate.filter(|url| !url.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::{
        certificate::tests::self_signed,
        error::ErrorKind,
        payload::Identifier,
        session::tests::test_session,
        storage::MemStorage,
        transport::{HttpResponse, Method, MockTransport},
    };

    const ORDER: &str = "https://ca/order/1";
    const FINALIZE: &str = "https://ca/order/1/finalize";
    const CERT: &str = "https://ca/cert/1";

    fn order() -> Order {
        Order {
            url: ORDER.into(),
            status: OrderStatus::Ready,
            expires: None,
            identifiers: vec![Identifier::dns("example.com")],
            authorizations: vec![],
            finalize: FINALIZE.into(),
            certificate: None,
            error: None,
        }
    }

    fn order_body(status: &str, certificate: Option<&str>) -> serde_json::Value {
        let mut body = json!({
            "status": status,
            "identifiers": [{"type": "dns", "value": "example.com"}],
            "authorizations": [],
            "finalize": FINALIZE
        });
        if let Some(url) = certificate {
            body["certificate"] = json!(url);
        }
        body
    }

    fn issuer(storage: &MemStorage) -> Issuer<'_> {
        let mut issuer = Issuer::new(storage);
        issuer.domain_key = KeyAlgorithm::EcP256;
        issuer.poll = PollPolicy::new(Duration::ZERO, 30);
        issuer
    }

    #[test]
    fn test_certificate_retry_then_success() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        let chain = format!("{}{}", self_signed("example.com", 90), self_signed("R3", 365));
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("valid", Some(CERT))),
        );
        mock.on(Method::Post, CERT, HttpResponse::new(202))
            .on(Method::Post, CERT, HttpResponse::new(200).with_body(chain.clone()));

        let bundle = issuer(&storage)
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap();

        assert_eq!(bundle.fullchain, chain);
        assert_eq!(mock.count(Method::Post, CERT), 2);
        assert!(storage.exists("example.com/private.pem").unwrap());
        assert!(storage.exists("example.com/public.pem").unwrap());
        assert!(storage.exists("example.com/last.csr").unwrap());
        assert_eq!(
            storage.read_file("example.com/fullchain.pem").unwrap(),
            chain.as_bytes()
        );
    }

    #[test]
    fn test_configured_subject_is_written_to_csr() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("valid", Some(CERT))),
        );
        mock.on(
            Method::Post,
            CERT,
            HttpResponse::new(200).with_body(self_signed("example.com", 90)),
        );

        let mut issuer = issuer(&storage);
        issuer.subject = CsrSubject {
            organization: Some("Example Org".into()),
            ..CsrSubject::default()
        };
        issuer
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap();

        let req = csr::from_pem(&storage.read_file("example.com/last.csr").unwrap()).unwrap();
        let text = String::from_utf8(req.to_text().unwrap()).unwrap();
        assert!(text.contains("O = Example Org"));
        assert!(text.contains("CN = example.com"));
    }

    #[test]
    fn test_processing_order_is_polled_for_certificate_url() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("processing", None)),
        );
        mock.on(Method::Post, ORDER, HttpResponse::json(200, &order_body("processing", None)))
            .on(Method::Post, ORDER, HttpResponse::json(200, &order_body("valid", Some(CERT))));
        mock.on(
            Method::Post,
            CERT,
            HttpResponse::new(200).with_body(self_signed("example.com", 90)),
        );

        issuer(&storage)
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap();
        assert_eq!(mock.count(Method::Post, ORDER), 2);
    }

    #[test]
    fn test_finalize_rejection() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(
                403,
                &json!({"type": "urn:ietf:params:acme:error:orderNotReady", "detail": "order not ready"}),
            ),
        );

        let err = issuer(&storage)
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap_err();
        match err {
            AcmeError::Finalize { status, detail } => {
                assert_eq!(status, 403);
                assert!(detail.contains("order not ready"));
            }
            other => panic!("expected finalize error, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_download_status() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("valid", Some(CERT))),
        );
        mock.on(Method::Post, CERT, HttpResponse::new(500).with_body("oops"));

        let err = issuer(&storage)
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Issuance);
        assert!(!storage.exists("example.com/cert.pem").unwrap());
    }

    #[test]
    fn test_download_budget_exhausted() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("valid", Some(CERT))),
        );
        mock.on(Method::Post, CERT, HttpResponse::new(202));

        let mut issuer = issuer(&storage);
        issuer.poll = PollPolicy::new(Duration::ZERO, 5);
        let err = issuer
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AcmeError::Timeout {
                operation: "certificate download",
                attempts: 5
            }
        ));
    }

    #[test]
    fn test_garbage_certificate_writes_nothing() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("valid", Some(CERT))),
        );
        mock.on(Method::Post, CERT, HttpResponse::new(200).with_body("<html>"));

        let err = issuer(&storage)
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(!storage.exists("example.com/cert.pem").unwrap());
        assert!(!storage.exists("example.com/fullchain.pem").unwrap());
    }

    #[test]
    fn test_reuse_csr_keeps_stored_request() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &order_body("valid", Some(CERT))),
        );
        mock.on(
            Method::Post,
            CERT,
            HttpResponse::new(200).with_body(self_signed("example.com", 90)),
        );

        let mut issuer = issuer(&storage);
        issuer
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap();
        let stored = storage.read_file("example.com/last.csr").unwrap();

        issuer.reuse_csr = true;
        issuer
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap();
        assert_eq!(storage.read_file("example.com/last.csr").unwrap(), stored);
    }

    #[test]
    fn test_finalize_response_with_only_certificate_url() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &json!({"certificate": CERT})),
        );
        mock.on(Method::Post, CERT, HttpResponse::new(202))
            .on(Method::Post, CERT, HttpResponse::new(200).with_body(self_signed("example.com", 90)));

        let mut order = order();
        order.url = String::new();
        issuer(&storage)
            .issue(&mut session, &order, &["example.com"], &CancellationToken::new())
            .unwrap();
        assert_eq!(mock.count(Method::Post, CERT), 2);
        assert_eq!(mock.count(Method::Post, ORDER), 0);
    }

    #[test]
    fn test_missing_certificate_url_without_order_url() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(200, &json!({"status": "processing"})),
        );

        let mut order = order();
        order.url = String::new();
        let err = issuer(&storage)
            .issue(&mut session, &order, &["example.com"], &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(!storage.exists("example.com/cert.pem").unwrap());
    }

    #[test]
    fn test_invalid_order_in_finalize_response() {
        let mock = MockTransport::new();
        let mut session = test_session(&mock);
        let storage = MemStorage::new();
        mock.on(
            Method::Post,
            FINALIZE,
            HttpResponse::json(
                200,
                &json!({"status": "invalid", "error": {"type": "urn:ietf:params:acme:error:badCSR", "detail": "bad csr"}}),
            ),
        );

        let err = issuer(&storage)
            .issue(&mut session, &order(), &["example.com"], &CancellationToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Finalize);
        assert!(err.to_string().contains("bad csr"));
    }
}

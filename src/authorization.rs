//! 授權流程：對訂單中的每個授權完成挑戰並等待驗證結果。
//!
//! 每個授權依序處理：讀取授權、選取挑戰、公開答案、自我檢查、通知伺服器、輪詢結果，
//! 最後移除公開的答案。全部授權都成為 `valid` 後才交給簽發流程。

use crate::{
    challenge::{
        key_authorization, Authorization, AuthorizationStatus, Challenge, ChallengePublisher,
        ChallengeStatus, ChallengeType,
    },
    error::{AcmeError, Result},
    order::Order,
    payload::ChallengeResponsePayload,
    poll::{poll, CancellationToken, Poll, PollPolicy},
    session::{parse_body, Session},
};

/// 完成授權所需的設定與協作者。
pub struct Authorizer<'a> {
    pub publisher: &'a dyn ChallengePublisher,
    pub challenge_type: ChallengeType,
    pub poll: PollPolicy,
    /// 通知伺服器前先自行取得挑戰資源並比對內容。
    pub self_check: bool,
}

impl<'a> Authorizer<'a> {
    pub fn new(publisher: &'a dyn ChallengePublisher) -> Self {
        Self {
            publisher,
            challenge_type: ChallengeType::default(),
            poll: PollPolicy::default(),
            self_check: true,
        }
    }

    /// 依序完成訂單中的所有授權。
    ///
    /// # 錯誤
    ///
    /// 任一授權失敗即停止，後續授權不會處理。
    pub fn authorize(
        &self,
        session: &mut Session,
        order: &Order,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for url in &order.authorizations {
            cancel.check()?;
            self.authorize_one(session, url, cancel)?;
        }
        Ok(())
    }

    /// 完成單一授權。
    pub fn authorize_one(
        &self,
        session: &mut Session,
        authz_url: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let authz: Authorization = session.fetch(authz_url)?;
        let domain = authz.domain().to_string();
        match authz.status {
            AuthorizationStatus::Valid => {
                session
                    .logger()
                    .info(format_args!("Authorization for {} is already valid", domain));
                return Ok(());
            }
            AuthorizationStatus::Pending | AuthorizationStatus::Processing => {}
            status => {
                let detail = authz
                    .challenges
                    .iter()
                    .find_map(|c| c.error.as_ref().map(ToString::to_string))
                    .unwrap_or_else(|| format!("authorization is {:?}", status));
                return Err(AcmeError::ChallengeFailed { domain, detail });
            }
        }

        let challenge = authz.select_challenge(&self.challenge_type)?.clone();
        let key_auth = key_authorization(&challenge.token, session.account_key())?;

        self.publisher.publish(&domain, &challenge.token, &key_auth)?;
        session.logger().info(format_args!(
            "Published {} challenge for {}",
            self.challenge_type, domain
        ));

        let result = self.complete_challenge(session, &domain, &challenge, &key_auth, cancel);

        if let Err(e) = self.publisher.unpublish(&domain, &challenge.token) {
            session.logger().warn(format_args!(
                "Failed to remove challenge answer for {}: {}",
                domain, e
            ));
        }
        result
    }

    fn complete_challenge(
        &self,
        session: &mut Session,
        domain: &str,
        challenge: &Challenge,
        key_auth: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.self_check {
            if let Some(url) = self.challenge_type.self_check_url(domain, &challenge.token) {
                self_check(session, &url, key_auth)?;
            }
        }

        if challenge.status == ChallengeStatus::Pending {
            let response =
                session.post_payload(&challenge.url, &ChallengeResponsePayload::new(key_auth))?;
            if !response.is_success() {
                return Err(AcmeError::server(&challenge.url, response.status, &response.body));
            }
            let updated: Challenge = parse_body(&challenge.url, &response)?;
            if updated.status == ChallengeStatus::Invalid {
                return Err(AcmeError::ChallengeFailed {
                    domain: domain.to_string(),
                    detail: updated.failure_detail(),
                });
            }
        }

        poll(&self.poll, cancel, "challenge validation", |attempt| {
            let current: Challenge = session.fetch(&challenge.url)?;
            session.logger().debug(format_args!(
                "Challenge for {} is {:?} (attempt {})",
                domain, current.status, attempt
            ));
            match current.status {
                ChallengeStatus::Valid => Ok(Poll::Ready(())),
                ChallengeStatus::Invalid => Err(AcmeError::ChallengeFailed {
                    domain: domain.to_string(),
                    detail: current.failure_detail(),
                }),
                _ => Ok(Poll::Pending),
            }
        })?;

        session
            .logger()
            .info(format_args!("Authorization for {} is valid", domain));
        Ok(())
    }
}

/// 取得挑戰資源並與預期的 key authorization 比對（去除前後空白）。
fn self_check(session: &Session, url: &str, expected: &str) -> Result<()> {
    let found = match session.transport().get(url) {
        Ok(response) if response.is_success() => response.text().trim().to_string(),
        Ok(response) => format!("HTTP {}", response.status),
        Err(e) => e.to_string(),
    };
    if found != expected {
        return Err(AcmeError::SelfCheck {
            url: url.to_string(),
            expected: expected.to_string(),
            found,
        });
    }
    session
        .logger()
        .debug(format_args!("Self check passed for {}", url));
    Ok(())
}

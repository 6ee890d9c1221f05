//! API-facing request/response models and thin handlers over [`SlotService`].

use serde::{Deserialize, Serialize};

use crate::core::{
    ClearScope, HeartbeatAck, HeartbeatReport, OwnerId, PokeAction, ReportAck, ReportBody,
    SlotError, SlotService, SlotStatus, SlotView, Submission, Token, WorkerSession,
};

/// Task submission payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitRequest {
    /// Client-generated token.
    pub token: Option<Token>,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Task input.
    pub payload: String,
}

/// Executor claim response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// Token.
    pub token: Token,
    /// Title.
    pub title: String,
    /// Task input.
    pub payload: String,
}

/// Executor state report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Token.
    pub token: Token,
    /// Reported state.
    pub state: SlotStatus,
    /// Output or reason.
    pub text: Option<String>,
    /// Progress percentage.
    pub progress: Option<u32>,
}

/// Executor heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Token.
    pub token: Token,
    /// Session id.
    pub sid: Option<String>,
    /// Sequence number within the session.
    pub seq: Option<u64>,
    /// Executor-measured round-trip time.
    pub rtt_ms: Option<i64>,
    /// Executor clock at send time, used when `rtt_ms` is absent.
    pub client_ts: Option<i64>,
}

impl HeartbeatRequest {
    /// Convert to the service-level report, deriving RTT from `client_ts` if needed.
    pub fn into_report(self, now_ms: u128) -> HeartbeatReport {
        let session = self.sid.filter(|s| !s.is_empty()).map(|session_id| WorkerSession {
            session_id,
            seq: self.seq.unwrap_or(0),
        });
        let rtt_ms = self.rtt_ms.or_else(|| {
            let now = i64::try_from(now_ms).ok()?;
            self.client_ts.and_then(|sent| now.checked_sub(sent))
        });
        HeartbeatReport { session, rtt_ms }
    }
}

/// Client poke.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PokeRequest {
    /// Token.
    pub token: Token,
    /// Requested action.
    pub action: PokeAction,
}

/// Bulk cleanup request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearRequest {
    /// Scope.
    pub scope: ClearScope,
}

/// Limit change request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LimitRequest {
    /// New limit.
    pub concurrency_limit: u32,
}

/// List response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    /// Current concurrency limit.
    pub concurrency_limit: u32,
    /// Ceiling.
    pub hard_cap: u32,
    /// Owner's slots.
    pub slots: Vec<SlotView>,
}

/// Health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    /// Healthy flag.
    pub ok: bool,
    /// Connected observers.
    pub observers: usize,
}

/// Submit a task.
pub fn submit(service: &SlotService, owner: &OwnerId, req: SubmitRequest) -> Result<SlotView, SlotError> {
    let slot = service.submit(
        owner,
        Submission {
            token: req.token,
            title: req.title,
            payload: req.payload,
        },
    )?;
    Ok(SlotView::from_slot(&slot, service.clock().now_ms()))
}

/// List an owner's slots with the current limit.
pub fn list(service: &SlotService, owner: &OwnerId) -> Result<ListResponse, SlotError> {
    Ok(ListResponse {
        concurrency_limit: service.concurrency_limit(),
        hard_cap: service.hard_cap(),
        slots: service.list(owner)?,
    })
}

/// Executor claim.
pub fn claim(service: &SlotService, token: &Token) -> Result<ClaimResponse, SlotError> {
    let slot = service.claim(token)?;
    Ok(ClaimResponse {
        token: slot.token,
        title: slot.title,
        payload: slot.payload_in,
    })
}

/// Executor report.
pub fn report(service: &SlotService, req: ReportRequest) -> Result<ReportAck, SlotError> {
    service.report(
        &req.token,
        req.state,
        ReportBody {
            text: req.text,
            progress: req.progress,
        },
    )
}

/// Executor heartbeat.
pub fn heartbeat(service: &SlotService, req: HeartbeatRequest) -> HeartbeatAck {
    let token = req.token.clone();
    let report = req.into_report(service.clock().now_ms());
    service.heartbeat(&token, &report)
}

/// Client poke.
pub fn poke(service: &SlotService, owner: &OwnerId, req: &PokeRequest) -> Result<SlotView, SlotError> {
    let slot = service.poke(&req.token, owner, req.action)?;
    Ok(SlotView::from_slot(&slot, service.clock().now_ms()))
}

/// Health check.
pub fn health(service: &SlotService) -> Health {
    Health {
        ok: true,
        observers: service.notifier().observer_count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_rtt_falls_back_to_client_timestamp() {
        let req = HeartbeatRequest {
            token: Token::from("t"),
            sid: Some("s".into()),
            seq: Some(3),
            rtt_ms: None,
            client_ts: Some(9_500),
        };
        let report = req.into_report(10_000);
        assert_eq!(report.rtt_ms, Some(500));
        assert_eq!(
            report.session,
            Some(WorkerSession {
                session_id: "s".into(),
                seq: 3
            })
        );
    }

    #[test]
    fn absurd_client_timestamp_yields_no_rtt() {
        let req = HeartbeatRequest {
            token: Token::from("t"),
            sid: None,
            seq: None,
            rtt_ms: None,
            client_ts: Some(i64::MIN),
        };
        let report = req.into_report(10_000);
        assert_eq!(report.rtt_ms, None);
        assert_eq!(report.session, None);
    }

    #[test]
    fn heartbeat_request_parses_without_optional_fields() {
        let req: HeartbeatRequest = serde_json::from_str(r#"{"token":"t"}"#).unwrap();
        assert_eq!(req.token, Token::from("t"));
        assert!(req.client_ts.is_none());
    }

    #[test]
    fn report_request_parses_wire_state() {
        let req: ReportRequest =
            serde_json::from_str(r#"{"token":"t","state":"done","text":"out","progress":null}"#)
                .unwrap();
        assert_eq!(req.state, SlotStatus::Done);
        assert_eq!(req.text.as_deref(), Some("out"));
    }
}

//! Admission seam for transports that dispatch gated tool calls.

use async_trait::async_trait;

use super::{EntitlementError, EntitlementService};
use crate::types::{ExecutionStatus, Principal, RecordOutcome, ReplayId, Reservation};

/// Pre/post hooks a tool dispatcher wraps around each paid call.
///
/// A transport holds this as `Arc<dyn EntitlementGate>` so it can run without
/// metering (self-hosted mode) or against a test double.
#[async_trait]
pub trait EntitlementGate: Send + Sync {
    async fn pre_authorize_tool(
        &self,
        principal: &Principal,
        tool_name: &str,
        replay_id: &ReplayId,
    ) -> Result<Reservation, EntitlementError>;

    async fn finalize_tool_execution(
        &self,
        reservation: &Reservation,
        tool_name: &str,
        replay_id: &ReplayId,
        audit_id: Option<&str>,
        status: ExecutionStatus,
    ) -> Result<RecordOutcome, EntitlementError>;
}

#[async_trait]
impl EntitlementGate for EntitlementService {
    async fn pre_authorize_tool(
        &self,
        principal: &Principal,
        tool_name: &str,
        replay_id: &ReplayId,
    ) -> Result<Reservation, EntitlementError> {
        EntitlementService::pre_authorize_tool(self, principal, tool_name, replay_id).await
    }

    async fn finalize_tool_execution(
        &self,
        reservation: &Reservation,
        tool_name: &str,
        replay_id: &ReplayId,
        audit_id: Option<&str>,
        status: ExecutionStatus,
    ) -> Result<RecordOutcome, EntitlementError> {
        EntitlementService::finalize_tool_execution(
            self,
            reservation,
            tool_name,
            replay_id,
            audit_id,
            status,
        )
        .await
    }
}

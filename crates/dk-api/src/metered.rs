//! Upstream call wrapper: runs the completion for an admitted request and
//! charges the billed tokens back to the caller's daily record.

use dk_llm::{ChatCompletion, ChatProvider, ChatRequest, LlmError};
use dk_quota::{Admission, QuotaError, Settlement, UsageGate};

#[derive(Debug)]
pub struct MeteredReply {
    pub completion: ChatCompletion,
    /// `None` when the tokens could not be recorded.
    pub settlement: Option<Settlement>,
    /// Token-quota overrun caused by this call. The reply is still delivered.
    pub warning: Option<QuotaError>,
}

/// Performs one completion for `admission` and settles its token usage.
///
/// A failed upstream call leaves the pre-counted call consumed and records no
/// tokens. A failed settlement is logged and does not withhold the result
/// the caller has already paid for.
pub async fn call_metered(
    provider: &dyn ChatProvider,
    gate: &UsageGate,
    admission: &Admission,
    request: &ChatRequest,
) -> Result<MeteredReply, LlmError> {
    let completion = provider.complete(request).await.map_err(|e| {
        tracing::warn!(
            "{} completion failed for {}: {}",
            provider.name(),
            admission.key,
            e
        );
        e
    })?;

    let used = completion.usage_tokens;
    let (settlement, warning) = match gate.settle(admission, used).await {
        Ok(settlement) => {
            let warning = settlement.token_overrun();
            (Some(settlement), warning)
        }
        Err(e) => {
            tracing::error!(
                "Failed to record {} tokens on {}: {}",
                used,
                admission.key,
                e
            );
            (None, None)
        }
    };

    Ok(MeteredReply {
        completion,
        settlement,
        warning,
    })
}

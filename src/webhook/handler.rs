//! AdmissionReview handling

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use tracing::{debug, error, info};

use pravega_common::crd::PravegaCluster;

use super::{validate, WebhookState};

/// Answer liveness probes
pub async fn health_handler() -> StatusCode {
    StatusCode::OK
}

/// Handle a validating admission review for a PravegaCluster
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review(&state, &req).await.into_review())
}

fn decode(obj: &DynamicObject) -> Result<PravegaCluster, serde_json::Error> {
    serde_json::to_value(obj).and_then(serde_json::from_value)
}

async fn review(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allowed = AdmissionResponse::from(request);
    if matches!(request.operation, Operation::Delete | Operation::Connect) {
        debug!(uid = %request.uid, name = %request.name, "nothing to validate");
        return allowed;
    }

    let Some(obj) = request.object.as_ref() else {
        return allowed.deny("request carries no object");
    };
    let proposed = match decode(obj) {
        Ok(cluster) => cluster,
        Err(e) => return allowed.deny(format!("failed to decode PravegaCluster: {e}")),
    };
    let prior = request.old_object.as_ref().and_then(|o| decode(o).ok());

    match validate(&request.operation, &proposed, prior.as_ref(), state.configmaps.as_ref()).await {
        Ok(()) => {
            debug!(uid = %request.uid, name = %request.name, operation = ?request.operation, "admitted");
            allowed
        }
        Err(denial) => {
            info!(
                uid = %request.uid,
                name = %request.name,
                operation = ?request.operation,
                reason = %denial,
                "rejected"
            );
            allowed.deny(denial.to_string())
        }
    }
}

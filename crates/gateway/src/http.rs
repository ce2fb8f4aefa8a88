use std::time::Duration;

use async_trait::async_trait;
use rebate_core::config::ApiConfig;
use rebate_core::domain::matrix::MatrixRecord;
use rebate_core::domain::policy::PolicyId;
use rebate_core::envelope::{envelope_message, unwrap_envelope, unwrap_optional};
use rebate_core::session::{AllocationSnapshot, SaveAck, SaveMatrixRequest};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{GatewayError, MatrixGateway};

const PARENT_MATRIX_KEY: &str = "hq_matrix";
const EMBEDDED_CHILD_KEY: &str = "agency_matrix";
const CHILD_MATRIX_KEY: &str = "matrix";

/// [`MatrixGateway`] backed by the policy REST API.
#[derive(Clone)]
pub struct HttpMatrixGateway {
    client: Client,
    config: ApiConfig,
}

impl HttpMatrixGateway {
    pub fn new(config: ApiConfig) -> Result<Self, GatewayError> {
        if config.timeout_secs == 0 {
            return Err(GatewayError::Configuration("timeout_secs must be positive".to_string()));
        }
        let client = Client::builder().timeout(Duration::from_secs(config.timeout_secs)).build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn get(&self, url: &str) -> Result<Response, GatewayError> {
        self.authorize(self.client.get(url)).send().await.map_err(|error| {
            error!(event_name = "gateway.request_failed", url, error = %error, "matrix fetch request failed");
            GatewayError::from(error)
        })
    }
}

#[async_trait]
impl MatrixGateway for HttpMatrixGateway {
    async fn fetch_allocation(
        &self,
        policy_id: &PolicyId,
    ) -> Result<AllocationSnapshot, GatewayError> {
        let url = self.config.endpoint(&self.config.matrix_path, &policy_id.0);
        debug!(event_name = "gateway.fetch_allocation", policy_id = %policy_id, url = %url, "fetching parent matrix");

        let body = read_json(self.get(&url).await?).await?;
        let parent = decode_records(unwrap_envelope(&body, PARENT_MATRIX_KEY)?, PARENT_MATRIX_KEY)?;
        let child = match unwrap_optional(&body, EMBEDDED_CHILD_KEY)? {
            Some(value) => non_empty(decode_records(value, EMBEDDED_CHILD_KEY)?),
            None => None,
        };

        info!(
            event_name = "gateway.fetch_allocation.completed",
            policy_id = %policy_id,
            parent_records = parent.len(),
            embedded_child = child.is_some(),
            "parent matrix fetched"
        );
        Ok(AllocationSnapshot { parent, child })
    }

    async fn fetch_child_matrix(
        &self,
        policy_id: &PolicyId,
    ) -> Result<Option<Vec<MatrixRecord>>, GatewayError> {
        let url = self.config.endpoint(&self.config.child_matrix_path, &policy_id.0);
        debug!(event_name = "gateway.fetch_child_matrix", policy_id = %policy_id, url = %url, "fetching child matrix");

        let response = self.get(&url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            info!(
                event_name = "gateway.fetch_child_matrix.absent",
                policy_id = %policy_id,
                "no saved child matrix"
            );
            return Ok(None);
        }

        // Absence is signalled by 404 or an explicit null; a body without the
        // key is malformed and must not be read as an empty allocation.
        let body = read_json(response).await?;
        match unwrap_envelope(&body, CHILD_MATRIX_KEY)? {
            Value::Null => Ok(None),
            value => Ok(non_empty(decode_records(value, CHILD_MATRIX_KEY)?)),
        }
    }

    async fn save_matrix(&self, request: &SaveMatrixRequest) -> Result<SaveAck, GatewayError> {
        let url = self.config.endpoint(&self.config.save_path, &request.policy_id.0);
        info!(
            event_name = "gateway.save_matrix",
            policy_id = %request.policy_id,
            records = request.matrix.len(),
            "posting child matrix"
        );

        let response =
            self.authorize(self.client.post(&url).json(request)).send().await.map_err(|error| {
                error!(event_name = "gateway.request_failed", url = %url, error = %error, "matrix save request failed");
                GatewayError::from(error)
            })?;
        let body = read_json(response).await?;
        let message = envelope_message(&body)?;

        Ok(SaveAck { message })
    }
}

async fn read_json(response: Response) -> Result<Value, GatewayError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = failure_message(status, &body);
        warn!(event_name = "gateway.unexpected_status", status = %status, message = %message, "endpoint returned failure status");
        return Err(GatewayError::Status { status: status.as_u16(), message });
    }

    response.json::<Value>().await.map_err(|error| {
        error!(event_name = "gateway.decode_failed", error = %error, "response body is not JSON");
        GatewayError::Decode(format!("response body is not JSON: {error}"))
    })
}

fn failure_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        ["message", "error"]
            .iter()
            .find_map(|field| value.get(*field).and_then(Value::as_str).map(str::to_owned))
    });
    from_json
        .or_else(|| Some(body.trim().to_owned()).filter(|text| !text.is_empty()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_owned())
}

/// Decodes a record array, skipping elements that do not parse at all.
pub(crate) fn decode_records(value: &Value, key: &str) -> Result<Vec<MatrixRecord>, GatewayError> {
    let items = value
        .as_array()
        .ok_or_else(|| GatewayError::Decode(format!("`{key}` is not an array")))?;

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match MatrixRecord::deserialize(item) {
            Ok(record) => records.push(record),
            Err(error) => warn!(
                event_name = "gateway.record_skipped",
                key,
                index,
                error = %error,
                "skipping undecodable matrix record"
            ),
        }
    }
    Ok(records)
}

fn non_empty(records: Vec<MatrixRecord>) -> Option<Vec<MatrixRecord>> {
    (!records.is_empty()).then_some(records)
}

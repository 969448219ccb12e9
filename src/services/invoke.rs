use serde::Serialize;
use serde_json::Value;

use super::ExtensionService;
use crate::identity::CurrentUser;
use crate::models::EndpointType;
use crate::response::ServiceError;

/// Result of calling an extension function: the upstream status and body.
/// Bodies that are not JSON come back as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Invocation {
    pub status: u16,
    pub body: Value,
}

/// Calls extension functions server-side so header secrets never leave the
/// service.
#[derive(Clone)]
pub struct FunctionInvoker {
    extensions: ExtensionService,
    client: reqwest::Client,
}

impl FunctionInvoker {
    pub fn new(extensions: ExtensionService, client: reqwest::Client) -> Self {
        Self { extensions, client }
    }

    pub async fn invoke(
        &self,
        user: &CurrentUser,
        extension_id: &str,
        function_name: &str,
        args: Value,
    ) -> Result<Invocation, ServiceError> {
        let extension = self.extensions.find_by_id(user, extension_id).await?;
        let function = extension
            .functions
            .iter()
            .find(|f| f.schema_name().as_deref() == Some(function_name))
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Function {} not found in extension {}",
                    function_name, extension.id
                ))
            })?;

        let mut rb = self
            .client
            .request(function.endpoint_type.as_method(), &function.endpoint);
        for header in &extension.headers {
            let value = self.extensions.find_secure_header_value(header).await?;
            rb = rb.header(header.key.as_str(), value);
        }
        rb = match function.endpoint_type {
            EndpointType::Get => rb.query(&query_pairs(&args)?),
            _ => rb.json(&args),
        };

        let resp = rb.send().await.map_err(|err| {
            tracing::warn!(extension = %extension.id, function = %function_name, error = ?err, "function call failed");
            ServiceError::Upstream(format!("Error calling function {}: {}", function_name, err))
        })?;
        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|err| ServiceError::Upstream(format!("Error reading function response: {}", err)))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        tracing::info!(extension = %extension.id, function = %function_name, status, "function invoked");
        Ok(Invocation { status, body })
    }
}

/// Flattens GET arguments into query pairs.  Only a JSON object (or null)
/// maps onto a query string.
fn query_pairs(args: &Value) -> Result<Vec<(String, String)>, ServiceError> {
    match args {
        Value::Null => Ok(Vec::new()),
        Value::Object(map) => Ok(map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), value)
            })
            .collect()),
        _ => Err(ServiceError::Validation(vec![
            "Arguments for a GET function must be a JSON object".to_string(),
        ])),
    }
}

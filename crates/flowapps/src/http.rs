//! Generic HTTP app: poll a JSON endpoint, send arbitrary requests.
//!
//! Connections store a `token` (sent as a bearer token on every request) and
//! optionally a `verify_url` that must answer with a success status for the
//! token to count as valid.

use async_trait::async_trait;
use flowcore::{
    json_object, Action, ActionItem, ActionSink, Authentication, BeforeRequest, HttpError,
    IntegrationError, Interval, JsonObject, JsonObjectExt, Method, RequestConfig, RunContext,
    Trigger, TriggerItem, TriggerSink,
};
use serde_json::{json, Value as JsonValue};
use std::cmp::Ordering;

/// Adds `Authorization: Bearer <token>` when the connection has a token
pub struct BearerToken;

impl BeforeRequest for BearerToken {
    fn apply(&self, auth: &JsonObject, request: RequestConfig) -> RequestConfig {
        let has_header = request
            .headers
            .keys()
            .any(|name| name.eq_ignore_ascii_case("authorization"));
        match auth.get_str("token") {
            Some(token) if !has_header && !token.is_empty() => {
                request.header("Authorization", format!("Bearer {}", token))
            }
            _ => request,
        }
    }
}

pub struct TokenAuthentication;

#[async_trait]
impl Authentication for TokenAuthentication {
    async fn verify_credentials(&self, ctx: &RunContext) -> Result<JsonObject, IntegrationError> {
        let token = ctx
            .auth
            .get("token")
            .await
            .and_then(|t| t.as_str().map(|s| s.trim().to_string()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IntegrationError::new("a token is required"))?;

        if let Some(JsonValue::String(url)) = ctx.auth.get("verify_url").await {
            ctx.http()?.get(url).await?;
        }
        Ok(json_object(json!({ "token": token })))
    }

    async fn is_still_verified(&self, ctx: &RunContext) -> Result<bool, IntegrationError> {
        let has_token = matches!(ctx.auth.get("token").await, Some(JsonValue::String(t)) if !t.is_empty());
        if !has_token {
            return Ok(false);
        }
        match ctx.auth.get("verify_url").await {
            Some(JsonValue::String(url)) => match ctx.http()?.get(url).await {
                Ok(_) => Ok(true),
                Err(HttpError::Status { .. }) => Ok(false),
                Err(err) => Err(err.into()),
            },
            _ => Ok(true),
        }
    }
}

/// Polls `url` and emits one item per element of the array found at
/// `items_path`, keyed by `id_field`.
pub struct PollJson;

#[async_trait]
impl Trigger for PollJson {
    fn key(&self) -> &str {
        "poll_json"
    }

    fn name(&self) -> &str {
        "Poll JSON"
    }

    fn description(&self) -> &str {
        "Triggers on new elements of a JSON array served over HTTP"
    }

    fn interval(&self, parameters: &JsonObject) -> Option<Interval> {
        parameters.get_str("interval").and_then(|s| s.parse().ok())
    }

    async fn run(&self, ctx: &RunContext, items: &TriggerSink) -> Result<(), IntegrationError> {
        let params = ctx.parameters();
        let url = params
            .get_str("url")
            .ok_or_else(|| IntegrationError::new("parameter 'url' is required"))?;
        let response = ctx.http()?.get(url).await?;

        let id_field = params.get_str("id_field").unwrap_or("id");
        let (found, missing_id) =
            extract_items(&response.body, params.get_str("items_path"), id_field)?;
        if missing_id > 0 {
            ctx.events
                .warn(format!("{} elements had no '{}' field", missing_id, id_field));
        }
        for item in found {
            items.push(item).await?;
        }
        Ok(())
    }

    fn sort(&self, item: &TriggerItem, next_item: &TriggerItem) -> Ordering {
        item.internal_id().cmp(next_item.internal_id())
    }
}

/// Items from the array at `path` (dot separated, empty for the root) plus
/// the number of elements skipped for lacking an id.
pub(crate) fn extract_items(
    body: &JsonValue,
    path: Option<&str>,
    id_field: &str,
) -> Result<(Vec<TriggerItem>, usize), IntegrationError> {
    let mut target = body;
    for segment in path.unwrap_or_default().split('.').filter(|s| !s.is_empty()) {
        target = target.get(segment).ok_or_else(|| {
            IntegrationError::new(format!("path segment '{}' not found", segment))
        })?;
    }
    let elements = target
        .as_array()
        .ok_or_else(|| IntegrationError::new("response does not contain an array at the path"))?;

    let mut items = Vec::with_capacity(elements.len());
    let mut missing_id = 0;
    for element in elements {
        let Some(object) = element.as_object() else {
            missing_id += 1;
            continue;
        };
        let id = match object.get(id_field) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(JsonValue::Number(n)) => n.to_string(),
            _ => {
                missing_id += 1;
                continue;
            }
        };
        items.push(TriggerItem::new(id, object.clone()));
    }
    Ok((items, missing_id))
}

/// Sends one request and outputs `{ status, headers, body }`
pub struct SendRequest;

#[async_trait]
impl Action for SendRequest {
    fn key(&self) -> &str {
        "send_request"
    }

    fn name(&self) -> &str {
        "Send request"
    }

    fn description(&self) -> &str {
        "Send an HTTP request and return the response"
    }

    async fn run(&self, ctx: &RunContext, output: &ActionSink) -> Result<(), IntegrationError> {
        let request = build_request(ctx.parameters())?;
        ctx.events.info(format!("{} {}", request.method, request.url));

        let response = ctx.http()?.send(request).await?;
        ctx.events.info(format!("Response status: {}", response.status));

        let headers: JsonObject = response
            .headers
            .into_iter()
            .map(|(name, value)| (name, JsonValue::String(value)))
            .collect();
        output.set(ActionItem::new(json_object(json!({
            "status": response.status,
            "headers": headers,
            "body": response.body,
        }))))
    }
}

pub(crate) fn build_request(params: &JsonObject) -> Result<RequestConfig, IntegrationError> {
    let url = params
        .get_str("url")
        .ok_or_else(|| IntegrationError::new("parameter 'url' is required"))?;
    let method = params.get_str("method").unwrap_or("GET").to_uppercase();
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| IntegrationError::new(format!("Unsupported method: {}", method)))?;

    let mut request = RequestConfig::new(method, url);
    for (name, value) in params.get_object("headers").into_iter().flatten() {
        if let Some(value) = value.as_str() {
            request = request.header(name.clone(), value);
        }
    }
    for (name, value) in params.get_object("query").into_iter().flatten() {
        let value = match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        request = request.query(name.clone(), value);
    }
    match params.get("body") {
        // Templated bodies arrive as strings; send JSON text as JSON
        Some(JsonValue::String(text)) => {
            let body = serde_json::from_str(text).unwrap_or_else(|_| JsonValue::String(text.clone()));
            request = request.json(body);
        }
        Some(JsonValue::Null) | None => {}
        Some(body) => request = request.json(body.clone()),
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_items_follows_path_and_skips_unkeyed() {
        let body = json!({
            "data": { "issues": [
                { "number": 12, "title": "a" },
                { "title": "no id" },
                { "number": "9", "title": "b" },
                "garbage"
            ]}
        });
        let (items, missing) = extract_items(&body, Some("data.issues"), "number").unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.internal_id().to_string()).collect();
        assert_eq!(ids, vec!["12", "9"]);
        assert_eq!(missing, 2);
    }

    #[test]
    fn test_extract_items_rejects_non_arrays() {
        assert!(extract_items(&json!({ "a": 1 }), None, "id").is_err());
        assert!(extract_items(&json!({ "a": [] }), Some("b"), "id").is_err());
        assert!(extract_items(&json!([]), None, "id").unwrap().0.is_empty());
    }

    #[test]
    fn test_build_request() {
        let params = json_object(json!({
            "method": "post",
            "url": "https://api.test/items",
            "headers": { "x-trace": "1" },
            "query": { "page": 2 },
            "body": "{\"name\":\"x\"}"
        }));
        let request = build_request(&params).unwrap();

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.headers["x-trace"], "1");
        assert_eq!(request.query, vec![("page".to_string(), "2".to_string())]);
        assert_eq!(request.body, Some(json!({ "name": "x" })));
    }

    #[test]
    fn test_bearer_token_keeps_explicit_header() {
        let auth = json_object(json!({ "token": "abc" }));
        let added = BearerToken.apply(&auth, RequestConfig::new(Method::GET, "/x"));
        assert_eq!(added.headers["Authorization"], "Bearer abc");

        let explicit = RequestConfig::new(Method::GET, "/x").header("authorization", "Basic zz");
        let kept = BearerToken.apply(&auth, explicit);
        assert_eq!(kept.headers.len(), 1);
        assert_eq!(kept.headers["authorization"], "Basic zz");
    }
}

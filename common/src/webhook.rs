// Webhook request validation and payload extraction
//
// Pipeline, short-circuiting on the first failure:
// method match → authentication → payload extraction → JSON schema.

use crate::errors::{ConfigError, WebhookRejection};
use axum::body::Bytes;
use axum::http::{header, HeaderMap, Method, Uri};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::Sha256;
use std::net::SocketAddr;
use std::sync::Arc;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const TRIGGER_TYPE: &str = "webhook";
const SIGNATURE_HEADERS: [&str; 2] = ["x-hub-signature-256", "x-signature-256"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum AuthType {
    #[default]
    None,
    Token,
    Hmac,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawWebhookConfig {
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    auth_type: AuthType,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    secret: Option<String>,
    #[serde(default)]
    schema: Option<Value>,
}

/// How incoming requests authenticate
#[derive(Debug, Clone)]
pub enum WebhookAuth {
    None,
    /// Bearer header or `token` query parameter
    Token(String),
    /// HMAC-SHA256 of the raw body keyed by the shared secret
    Hmac(String),
}

/// Parsed webhook trigger configuration
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub method: Method,
    pub auth: WebhookAuth,
    schema: Option<Arc<jsonschema::Validator>>,
}

impl WebhookConfig {
    pub fn from_config(config: &Value) -> Result<Self, ConfigError> {
        let raw: RawWebhookConfig =
            serde_json::from_value(config.clone()).map_err(|e| ConfigError::InvalidShape {
                trigger_type: TRIGGER_TYPE.to_string(),
                reason: e.to_string(),
            })?;

        let method = Method::from_bytes(raw.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
            ConfigError::InvalidFieldValue {
                field: "method".to_string(),
                reason: format!("'{}' is not an HTTP method", raw.method),
            }
        })?;

        let auth = match raw.auth_type {
            AuthType::None => WebhookAuth::None,
            AuthType::Token => WebhookAuth::Token(
                raw.token
                    .filter(|t| !t.is_empty())
                    .ok_or_else(|| ConfigError::MissingField("token".to_string()))?,
            ),
            AuthType::Hmac => WebhookAuth::Hmac(
                raw.secret
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| ConfigError::MissingField("secret".to_string()))?,
            ),
        };

        let schema = raw
            .schema
            .filter(|s| !s.is_null())
            .map(|s| {
                jsonschema::validator_for(&s)
                    .map(Arc::new)
                    .map_err(|e| ConfigError::InvalidSchema(e.to_string()))
            })
            .transpose()?;

        Ok(Self {
            method,
            auth,
            schema,
        })
    }

    /// Validate a request and build the firing payload
    pub fn accept(&self, request: &WebhookRequest) -> Result<Value, WebhookRejection> {
        if request.method != self.method {
            return Err(WebhookRejection::MethodNotAllowed {
                expected: self.method.to_string(),
                actual: request.method.to_string(),
            });
        }

        self.authenticate(request)?;

        let data = extract_data(request)?;

        if let Some(validator) = &self.schema {
            if let Some(error) = validator.iter_errors(&data).next() {
                return Err(WebhookRejection::SchemaValidation(error.to_string()));
            }
        }

        Ok(request.firing_payload(data))
    }

    fn authenticate(&self, request: &WebhookRequest) -> Result<(), WebhookRejection> {
        match &self.auth {
            WebhookAuth::None => Ok(()),
            WebhookAuth::Token(expected) => {
                let presented = bearer_token(&request.headers)
                    .map(str::to_string)
                    .or_else(|| query_pairs(&request.uri).remove("token"))
                    .ok_or_else(|| WebhookRejection::Unauthorized("missing token".to_string()))?;

                if bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
                    Ok(())
                } else {
                    Err(WebhookRejection::Unauthorized("invalid token".to_string()))
                }
            }
            WebhookAuth::Hmac(secret) => {
                let signature = SIGNATURE_HEADERS
                    .iter()
                    .find_map(|name| request.headers.get(*name))
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        WebhookRejection::Unauthorized("missing signature header".to_string())
                    })?;

                if verify_signature(&request.body, signature, secret) {
                    Ok(())
                } else {
                    Err(WebhookRejection::Unauthorized("invalid signature".to_string()))
                }
            }
        }
    }
}

/// Everything the validation pipeline needs from an HTTP request
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub client_addr: Option<SocketAddr>,
    pub body: Bytes,
}

impl WebhookRequest {
    fn firing_payload(&self, data: Value) -> Value {
        let headers: Map<String, Value> = self
            .headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
            })
            .collect();

        json!({
            "method": self.method.as_str(),
            "headers": headers,
            "url": self.uri.to_string(),
            "client": self.client_addr.map(|addr| addr.to_string()),
            "data": data,
        })
    }
}

/// Verify a hex HMAC-SHA256 signature, optionally prefixed with `sha256=`
pub fn verify_signature(body: &[u8], signature: &str, secret: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);

    let Ok(expected) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Hex HMAC-SHA256 signature of `body`, in the `sha256=` header form
pub fn sign_body(body: &[u8], secret: &str) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer ").or_else(|| v.strip_prefix("bearer ")))
}

fn query_pairs(uri: &Uri) -> std::collections::HashMap<String, String> {
    uri.query()
        .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
        .map(|pairs| pairs.into_iter().collect())
        .unwrap_or_default()
}

fn pairs_to_object(pairs: Vec<(String, String)>) -> Value {
    Value::Object(
        pairs
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect(),
    )
}

fn extract_data(request: &WebhookRequest) -> Result<Value, WebhookRejection> {
    if request.method == Method::GET {
        let pairs = request
            .uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default();
        return Ok(pairs_to_object(pairs));
    }

    let content_type = request
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if request.body.is_empty() {
        return Ok(json!({}));
    }

    if content_type.starts_with("application/json") || content_type.contains("+json") {
        return serde_json::from_slice(&request.body)
            .map_err(|e| WebhookRejection::InvalidPayload(format!("malformed JSON body: {}", e)));
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let pairs = serde_urlencoded::from_bytes::<Vec<(String, String)>>(&request.body)
            .map_err(|e| WebhookRejection::InvalidPayload(format!("malformed form body: {}", e)))?;
        return Ok(pairs_to_object(pairs));
    }

    Ok(json!({ "raw": String::from_utf8_lossy(&request.body) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn request(method: Method, uri: &str, content_type: Option<&str>, body: &str) -> WebhookRequest {
        let mut headers = HeaderMap::new();
        if let Some(ct) = content_type {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(ct).unwrap());
        }
        WebhookRequest {
            method,
            uri: uri.parse().unwrap(),
            headers,
            client_addr: Some("10.0.0.5:4242".parse().unwrap()),
            body: Bytes::from(body.to_string()),
        }
    }

    #[test]
    fn test_defaults_to_post_without_auth() {
        let config = WebhookConfig::from_config(&json!({})).unwrap();
        assert_eq!(config.method, Method::POST);
        assert!(matches!(config.auth, WebhookAuth::None));
    }

    #[test]
    fn test_token_auth_requires_token() {
        let err = WebhookConfig::from_config(&json!({"authType": "token"})).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("token".to_string()));

        let err = WebhookConfig::from_config(&json!({"authType": "hmac", "secret": ""})).unwrap_err();
        assert_eq!(err, ConfigError::MissingField("secret".to_string()));
    }

    #[test]
    fn test_invalid_schema_is_config_error() {
        let err = WebhookConfig::from_config(&json!({"schema": {"type": "not-a-type"}})).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchema(_)));
    }

    #[test]
    fn test_method_mismatch() {
        let config = WebhookConfig::from_config(&json!({"method": "put"})).unwrap();
        let err = config
            .accept(&request(Method::POST, "/webhook/x", None, ""))
            .unwrap_err();
        assert!(matches!(err, WebhookRejection::MethodNotAllowed { .. }));
    }

    #[test]
    fn test_bearer_token() {
        let config =
            WebhookConfig::from_config(&json!({"authType": "token", "token": "secret123"})).unwrap();

        let mut ok = request(Method::POST, "/webhook/x", Some("application/json"), "{}");
        ok.headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer secret123"),
        );
        assert!(config.accept(&ok).is_ok());

        let mut wrong = ok.clone();
        wrong
            .headers
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer wrong"));
        assert!(matches!(
            config.accept(&wrong),
            Err(WebhookRejection::Unauthorized(_))
        ));

        let missing = request(Method::POST, "/webhook/x", Some("application/json"), "{}");
        assert!(matches!(
            config.accept(&missing),
            Err(WebhookRejection::Unauthorized(_))
        ));
    }

    #[test]
    fn test_bearer_token_is_compared_verbatim() {
        let config =
            WebhookConfig::from_config(&json!({"authType": "token", "token": "secret123"})).unwrap();

        for value in ["Bearer  secret123", "Bearer secret123 ", "Bearer \tsecret123"] {
            let mut req = request(Method::POST, "/webhook/x", Some("application/json"), "{}");
            req.headers
                .insert(header::AUTHORIZATION, HeaderValue::from_static(value));
            assert!(
                matches!(config.accept(&req), Err(WebhookRejection::Unauthorized(_))),
                "{:?} should not authenticate",
                value
            );
        }
    }

    #[test]
    fn test_query_token() {
        let config =
            WebhookConfig::from_config(&json!({"authType": "token", "token": "abc"})).unwrap();
        let req = request(Method::POST, "/webhook/x?token=abc", None, "");
        assert!(config.accept(&req).is_ok());
    }

    #[test]
    fn test_hmac_signature_with_and_without_prefix() {
        let config =
            WebhookConfig::from_config(&json!({"authType": "hmac", "secret": "shh"})).unwrap();
        let body = r#"{"event":"push"}"#;
        let signature = sign_body(body.as_bytes(), "shh");

        let mut req = request(Method::POST, "/webhook/x", Some("application/json"), body);
        req.headers.insert(
            "x-hub-signature-256",
            HeaderValue::from_str(&signature).unwrap(),
        );
        assert!(config.accept(&req).is_ok());

        let mut bare = request(Method::POST, "/webhook/x", Some("application/json"), body);
        bare.headers.insert(
            "x-signature-256",
            HeaderValue::from_str(signature.trim_start_matches("sha256=")).unwrap(),
        );
        assert!(config.accept(&bare).is_ok());
    }

    #[test]
    fn test_hmac_rejects_tampered_body() {
        let signature = sign_body(b"original", "shh");
        assert!(verify_signature(b"original", &signature, "shh"));
        assert!(!verify_signature(b"tampered", &signature, "shh"));
        assert!(!verify_signature(b"original", "sha256=zz", "shh"));
    }

    #[test]
    fn test_schema_validation() {
        let config = WebhookConfig::from_config(&json!({
            "schema": {
                "type": "object",
                "required": ["order_id"],
                "properties": {"order_id": {"type": "integer"}}
            }
        }))
        .unwrap();

        let ok = request(
            Method::POST,
            "/webhook/x",
            Some("application/json"),
            r#"{"order_id": 7}"#,
        );
        let payload = config.accept(&ok).unwrap();
        assert_eq!(payload["data"]["order_id"], 7);

        let bad = request(Method::POST, "/webhook/x", Some("application/json"), r#"{}"#);
        match config.accept(&bad) {
            Err(WebhookRejection::SchemaValidation(message)) => {
                assert!(message.contains("order_id"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_payload_extraction_modes() {
        let config = WebhookConfig::from_config(&json!({})).unwrap();

        let form = request(
            Method::POST,
            "/webhook/x",
            Some("application/x-www-form-urlencoded"),
            "a=1&b=two",
        );
        assert_eq!(config.accept(&form).unwrap()["data"], json!({"a": "1", "b": "two"}));

        let text = request(Method::POST, "/webhook/x", Some("text/plain"), "hello");
        assert_eq!(config.accept(&text).unwrap()["data"], json!({"raw": "hello"}));

        let malformed = request(Method::POST, "/webhook/x", Some("application/json"), "{oops");
        assert!(matches!(
            config.accept(&malformed),
            Err(WebhookRejection::InvalidPayload(_))
        ));

        let get_config = WebhookConfig::from_config(&json!({"method": "GET"})).unwrap();
        let get = request(Method::GET, "/webhook/x?status=done", None, "");
        assert_eq!(get_config.accept(&get).unwrap()["data"], json!({"status": "done"}));
    }

    #[test]
    fn test_firing_payload_shape() {
        let config = WebhookConfig::from_config(&json!({})).unwrap();
        let payload = config
            .accept(&request(
                Method::POST,
                "/webhook/abc?x=1",
                Some("application/json"),
                r#"{"k": "v"}"#,
            ))
            .unwrap();

        assert_eq!(payload["method"], "POST");
        assert_eq!(payload["url"], "/webhook/abc?x=1");
        assert_eq!(payload["client"], "10.0.0.5:4242");
        assert_eq!(payload["headers"]["content-type"], "application/json");
        assert_eq!(payload["data"], json!({"k": "v"}));
    }
}

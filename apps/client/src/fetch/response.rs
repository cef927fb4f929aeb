use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::FetchError;
use crate::fetch::transport::RawResponse;

/// Decoded body of a successful response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// Deserializes a JSON body into `T`. Text bodies are tried as JSON too,
    /// for servers that forget the content-type.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        match self {
            ResponseBody::Json(value) => {
                T::deserialize(value).map_err(|e| FetchError::Decode(e.to_string()))
            }
            ResponseBody::Text(text) => {
                serde_json::from_str(text).map_err(|e| FetchError::Decode(e.to_string()))
            }
            ResponseBody::Empty => Err(FetchError::Decode("response body is empty".to_string())),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

/// Maps a raw response to the call's outcome. Pure: the 401 side effects
/// (token clearing, redirect hook) belong to the client.
pub(crate) fn classify(response: &RawResponse) -> Result<ResponseBody, FetchError> {
    if (200..300).contains(&response.status) {
        return decode_body(response);
    }

    let message = error_message(response);
    Err(match response.status {
        401 => FetchError::AuthExpired { message },
        403 => FetchError::Forbidden { message },
        404 => FetchError::NotFound { message },
        429 => FetchError::RateLimited { message },
        status if status >= 500 => FetchError::ServerError { status, message },
        status => FetchError::Http { status, message },
    })
}

fn decode_body(response: &RawResponse) -> Result<ResponseBody, FetchError> {
    if response.body.is_empty() {
        return Ok(ResponseBody::Empty);
    }
    if is_json(response) {
        return serde_json::from_slice(&response.body)
            .map(ResponseBody::Json)
            .map_err(|e| FetchError::Decode(e.to_string()));
    }
    Ok(ResponseBody::Text(
        String::from_utf8_lossy(&response.body).into_owned(),
    ))
}

fn is_json(response: &RawResponse) -> bool {
    response
        .content_type()
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
}

/// Server-provided message if the body carries one, else the status line.
fn error_message(response: &RawResponse) -> String {
    serde_json::from_slice::<Value>(&response.body)
        .ok()
        .and_then(|body| extract_message(&body))
        .unwrap_or_else(|| status_line(response.status))
}

fn extract_message(body: &Value) -> Option<String> {
    let candidates = [
        body.get("message"),
        body.get("error"),
        body.get("error").and_then(|e| e.get("message")),
    ];
    candidates
        .into_iter()
        .flatten()
        .find_map(Value::as_str)
        .filter(|msg| !msg.trim().is_empty())
        .map(str::to_string)
}

fn status_line(status: u16) -> String {
    let reason = reqwest::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason());
    match reason {
        Some(reason) => format!("HTTP {status} {reason}"),
        None => format!("HTTP {status}"),
    }
}

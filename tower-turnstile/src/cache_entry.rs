use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http::HeaderMap;
use http::HeaderName;
use http::HeaderValue;
use http::Response;
use http::StatusCode;
use serde::Deserialize;
use serde::Serialize;

use crate::store::StoreError;

/// A stored response: status, headers in order, and the complete body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, Vec<String>)>,
    #[serde(with = "body_base64")]
    pub body: Vec<u8>,
}

impl CacheEntry {
    /// Snapshot of a response, minus any header named in `skip`.
    ///
    /// Header values that are not valid UTF-8 are left out.
    pub fn from_parts(status: StatusCode, headers: &HeaderMap, body: &[u8], skip: &[HeaderName]) -> Self {
        let headers = headers
            .keys()
            .filter(|name| !skip.contains(name))
            .map(|name| {
                let values = headers
                    .get_all(name)
                    .iter()
                    .filter_map(|value| value.to_str().ok())
                    .map(str::to_owned)
                    .collect();
                (name.as_str().to_owned(), values)
            })
            .collect();
        Self {
            status: status.as_u16(),
            headers,
            body: body.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        serde_json::to_vec(self).map_err(|err| StoreError::Serialization {
            message: err.to_string(),
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes).map_err(|err| StoreError::Serialization {
            message: err.to_string(),
        })
    }

    /// Rebuilds the response. Fails if the status or any header is invalid.
    pub fn into_response(self) -> Result<Response<Bytes>, StoreError> {
        let status = StatusCode::from_u16(self.status).map_err(|err| StoreError::Serialization {
            message: err.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        for (name, values) in self.headers {
            let name = HeaderName::try_from(name).map_err(|err| StoreError::Serialization {
                message: err.to_string(),
            })?;
            for value in values {
                let value = HeaderValue::try_from(value).map_err(|err| StoreError::Serialization {
                    message: err.to_string(),
                })?;
                headers.append(name.clone(), value);
            }
        }

        let mut response = Response::new(Bytes::from(self.body));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

mod body_base64 {
    use super::*;

    pub(super) fn serialize<S: serde::Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub(super) fn deserialize<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

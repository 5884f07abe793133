use serde::Serialize;

/// Envelope for JSON endpoints that are not part of the live protocol.
///
/// `/recent` and `/sse` keep their bare payload shapes for existing overlay clients; newer
/// endpoints wrap their data here.
///
/// ```
/// use gift_relay::adapters::api::models::api_response::ApiResponse;
///
/// let response = ApiResponse::new(vec![1, 2, 3]);
/// assert_eq!(response.status, "success");
/// ```
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success".into(),
            data,
        }
    }
}

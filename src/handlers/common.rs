use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::errors::ServiceError;

/// JSON body extractor that validates the payload before the handler runs.
///
/// Malformed bodies and payloads that break a field rule both become
/// `InvalidInput` (400); the message names the offending field.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| ServiceError::InvalidInput(rejection.body_text()))?;
        validate_input(&value)?;
        Ok(Self(value))
    }
}

/// Query string extractor with rejections mapped onto the error envelope
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ServiceError::InvalidInput(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Path extractor; an unparseable id is the caller's mistake, not a routing miss
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiPath<T>(pub T);

#[async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ServiceError::InvalidInput(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, Validate)]
    struct Payload {
        #[validate(length(min = 1))]
        name: String,
    }

    #[derive(Debug, Deserialize)]
    struct Filter {
        page: Option<u64>,
    }

    fn json_request(body: &'static str) -> Request {
        Request::builder()
            .method("POST")
            .uri("/")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_valid_payload() {
        let ValidatedJson(payload) =
            ValidatedJson::<Payload>::from_request(json_request(r#"{"name":"x"}"#), &())
                .await
                .unwrap();
        assert_eq!(payload.name, "x");
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_input() {
        let err = ValidatedJson::<Payload>::from_request(json_request("{not json"), &())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidInput(_));
    }

    #[tokio::test]
    async fn rule_violation_is_invalid_input() {
        let err = ValidatedJson::<Payload>::from_request(json_request(r#"{"name":""}"#), &())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidInput(msg) if msg.contains("name"));
    }

    #[tokio::test]
    async fn bad_query_is_invalid_input() {
        let (mut parts, _) = Request::builder()
            .uri("/?page=abc")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        let err = ApiQuery::<Filter>::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_matches!(err, ServiceError::InvalidInput(_));

        let (mut parts, _) = Request::builder()
            .uri("/?page=3")
            .body(Body::empty())
            .unwrap()
            .into_parts();
        let ApiQuery(filter) = ApiQuery::<Filter>::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert_eq!(filter.page, Some(3));
    }
}

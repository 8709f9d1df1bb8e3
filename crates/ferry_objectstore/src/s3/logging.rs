//! Traces every S3 request the SDK sends, and flags responses the block client will retry.
use aws_sdk_s3::config::interceptors::{
    AfterDeserializationInterceptorContextRef, BeforeTransmitInterceptorContextRef,
};
use aws_sdk_s3::config::{ConfigBag, Interceptor, RuntimeComponents};
use aws_sdk_s3::error::BoxError;
use http::header::CONTENT_LENGTH;
use http::HeaderMap;

use crate::errors::status_is_transient;

#[derive(Debug)]
pub(crate) struct RequestTracing;

impl Interceptor for RequestTracing {
    fn name(&self) -> &'static str {
        "FerryRequestTracing"
    }

    fn read_after_serialization(
        &self,
        context: &BeforeTransmitInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let request = context.request();
        tracing::trace!(
            method = %request.method(),
            uri = %request.uri(),
            len = content_length(request.headers()),
            "s3 request",
        );
        Ok(())
    }

    fn read_after_deserialization(
        &self,
        context: &AfterDeserializationInterceptorContextRef<'_>,
        _runtime_components: &RuntimeComponents,
        _cfg: &mut ConfigBag,
    ) -> Result<(), BoxError> {
        let status = context.response().status();
        if status_is_transient(status) {
            tracing::debug!(%status, "s3 responded with a retryable status");
        } else {
            tracing::trace!(%status, "s3 response");
        }
        Ok(())
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::present(Some("5242880"), Some(5_242_880))]
    #[case::missing(None, None)]
    #[case::garbage(Some("lots"), None)]
    fn parses_content_length(#[case] header: Option<&'static str>, #[case] expected: Option<u64>) {
        let mut headers = HeaderMap::new();
        if let Some(v) = header {
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static(v));
        }
        assert_eq!(content_length(&headers), expected);
    }
}

//! Object store errors

use aws_sdk_s3::error::SdkError;
use http::StatusCode;
use thiserror;

use ferry_core::BlockError;

pub type Result<T> = std::result::Result<T, Error>;

/// General purpose [`crate::S3`] error handling.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error")]
    HTTPError(#[from] http::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("aws sdk put object error")]
    AWSSDKPutObjectError(
        #[from] SdkError<aws_sdk_s3::operation::put_object::PutObjectError>,
    ),
    #[error("aws sdk delete object error")]
    AWSSDKDeleteObjectError(
        #[from] SdkError<aws_sdk_s3::operation::delete_object::DeleteObjectError>,
    ),
    #[error("aws sdk create multipart upload error")]
    AWSSDKCreateMultiPartUploadError(
        #[from]
        SdkError<aws_sdk_s3::operation::create_multipart_upload::CreateMultipartUploadError>,
    ),
    #[error("aws sdk upload part copy error")]
    AWSSDKUploadPartCopyError(
        #[from] SdkError<aws_sdk_s3::operation::upload_part_copy::UploadPartCopyError>,
    ),
    #[error("aws sdk complete multipart upload error")]
    AWSSDKCompleteMultipartUploadError(
        #[from]
        SdkError<aws_sdk_s3::operation::complete_multipart_upload::CompleteMultipartUploadError>,
    ),
    #[error("aws sdk abort multipart upload error")]
    AWSSDKAbortMultipartUploadError(
        #[from]
        SdkError<aws_sdk_s3::operation::abort_multipart_upload::AbortMultipartUploadError>,
    ),
    #[error("aws sdk credentials error")]
    AWSSDKCredentialsError(#[from] aws_credential_types::provider::error::CredentialsError),

    #[error("failed to initiate multipart upload: {0}")]
    ObjectsFailedToInitiateMultipartUpload(&'static str),

    #[error("{blocks} blocks exceed the limit of {max} parts per object")]
    TooManyBlocks { blocks: usize, max: usize },

    #[error("key error: {0}")]
    KeyError(#[from] KeyError),
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::AWSSDKPutObjectError(e) => sdk_error_is_transient(e),
            Error::AWSSDKDeleteObjectError(e) => sdk_error_is_transient(e),
            Error::AWSSDKCreateMultiPartUploadError(e) => sdk_error_is_transient(e),
            Error::AWSSDKUploadPartCopyError(e) => sdk_error_is_transient(e),
            Error::AWSSDKCompleteMultipartUploadError(e) => sdk_error_is_transient(e),
            Error::AWSSDKAbortMultipartUploadError(e) => sdk_error_is_transient(e),
            _ => false,
        }
    }
}

impl From<Error> for BlockError {
    fn from(e: Error) -> BlockError {
        if e.is_transient() {
            BlockError::transient(e)
        } else {
            BlockError::fatal(e)
        }
    }
}

fn sdk_error_is_transient<E>(e: &SdkError<E>) -> bool {
    match e {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(e) => status_is_transient(e.raw().status()),
        _ => false,
    }
}

/// Throttling, request timeouts and server errors are worth retrying; other statuses mean the
/// request itself is wrong.
pub(crate) fn status_is_transient(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// Error type used when parsing [`super::Key`] from [`std::path::PathBuf`].
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("empty key not allowed")]
    Empty,

    #[error("prefix not allowed")]
    PrefixNotAllowed,

    #[error("root dir not allowed")]
    RootDirNotAllowed,

    #[error("current dir (`.`) not allowed")]
    CurDirNotAllowed,

    #[error("parent dir (`..`) not allowed")]
    ParentDirNotAllowed,

    #[error("path components must be valid unicode")]
    PathComponentsMustBeValidUnicode,

    #[error("path components must match regex: {0}")]
    PathComponentsMustMatchRegex(String),
}

use thiserror::Error;

/// Failure of a remote transcription, OCR, or captioning call.
///
/// A `ServiceError` is always recoverable at the tier above: the cloud
/// transcription tier falls back to local OCR, and a captioning failure is
/// skipped entirely.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service}: transport failure: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service}: remote reported an error: {message}")]
    Remote {
        service: &'static str,
        message: String,
    },

    #[error("{service}: job {job_id} did not complete before the deadline")]
    Timeout {
        service: &'static str,
        job_id: String,
    },

    #[error("missing credentials: {0} is not set")]
    MissingCredentials(&'static str),
}

/// Failure to decode or validate one line-delimited record.
///
/// Per-record errors are contained and counted by the cleaning and salvage
/// paths; they never abort a run.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record failed to decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("record field `{0}` is empty after trimming")]
    EmptyField(&'static str),

    #[error("record has no tags")]
    NoTags,
}

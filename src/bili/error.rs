use thiserror::Error;

/// Longest slice of a response body carried inside a [DownloadError::Parse].
const SNIPPET_LIMIT: usize = 200;

/// Error taxonomy for a sync run.
///
/// `Network` is the retriable class and is only surfaced once the retry budget
/// is exhausted. `Api` and `Parse` are non-retriable and fail the current task.
/// `Io` is fatal and aborts the run.
#[derive(Debug, Error)]
pub(crate) enum DownloadError {
    /// Transport-level failure (timeout, connection reset, 5xx) after all
    /// retry attempts were used up.
    #[error("request to {url} failed after {attempts} attempts: {source}")]
    Network {
        url: String,
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The platform answered with a non-zero business code.
    #[error("api error [{code}]: {message}")]
    Api { code: i64, message: String },

    /// Malformed JSON or a payload missing required keys.
    #[error("failed to parse api response ({context}): {snippet}")]
    Parse { context: String, snippet: String },

    /// Disk or permission problem while persisting results.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// Builds a [DownloadError::Parse] with the response body trimmed down to a
    /// loggable snippet.
    pub(crate) fn parse(context: impl Into<String>, body: &str) -> Self {
        DownloadError::Parse {
            context: context.into(),
            snippet: snippet(body),
        }
    }

    /// Whether this error should abort the whole run rather than just the
    /// current item or task.
    pub(crate) fn is_fatal(&self) -> bool {
        matches!(self, DownloadError::Io(_))
    }
}

/// Truncates a response body on a char boundary for inclusion in error messages.
fn snippet(body: &str) -> String {
    if body.len() <= SNIPPET_LIMIT {
        return body.to_string();
    }
    let mut end = SNIPPET_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

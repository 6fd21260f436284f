//! Classification of failed `svtplay-dl` runs.
//!
//! The tool can exit with status 0 while still describing a failure in its
//! output, a zero exit code alone does not mean the download succeeded.

use serde::Serialize;
use url::Url;

/// Failure category as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    TokenRequired,
    NoVideosFound,
    DrmProtected,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    TokenRequired,
    NoVideosFound,
    DrmProtected,
    Unknown { detail: String },
}

/// Streaming service a url belongs to, used to tailor failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    SvtPlay,
    Tv4Play,
    Other,
}

impl Service {
    pub fn from_url(url: &str) -> Self {
        let Some(host) = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        else {
            return Self::Other;
        };
        let matches = |domain: &str| host == domain || host.ends_with(&format!(".{domain}"));
        if matches("svtplay.se") || matches("svt.se") {
            Self::SvtPlay
        } else if matches("tv4play.se") || matches("tv4.se") {
            Self::Tv4Play
        } else {
            Self::Other
        }
    }
}

/// Checks the combined output for the known failure categories, in priority order.
pub fn classify(output: &str) -> Option<Failure> {
    let output = output.to_lowercase();
    if output.contains("token") && (output.contains("need") || output.contains("require")) {
        Some(Failure::TokenRequired)
    } else if output.contains("no videos found") {
        Some(Failure::NoVideosFound)
    } else if output.contains("drm") && output.contains("protected") {
        Some(Failure::DrmProtected)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(Failure),
}

impl Outcome {
    /// Combines the exit status with the captured output of a finished run.
    pub fn evaluate(exit_success: bool, stdout: &str, stderr: &str) -> Self {
        let combined = format!("{stdout}\n{stderr}");
        if let Some(failure) = classify(&combined) {
            return Self::Failed(failure);
        }
        if exit_success {
            return Self::Success;
        }
        let detail = [stderr.trim(), stdout.trim()]
            .into_iter()
            .find(|s| !s.is_empty())
            .unwrap_or("Unknown error")
            .to_string();
        Self::Failed(Failure::Unknown { detail })
    }
}

impl Failure {
    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::TokenRequired => FailureKind::TokenRequired,
            Failure::NoVideosFound => FailureKind::NoVideosFound,
            Failure::DrmProtected => FailureKind::DrmProtected,
            Failure::Unknown { .. } => FailureKind::Unknown,
        }
    }

    /// Short message, `None` for unknown failures.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            Failure::TokenRequired => Some("Token required or expired"),
            Failure::NoVideosFound => Some("No videos found"),
            Failure::DrmProtected => Some("DRM protected content"),
            Failure::Unknown { .. } => None,
        }
    }

    pub fn explanation(&self, service: Service) -> String {
        let text = match (self, service) {
            (Failure::Unknown { detail }, _) => return detail.clone(),
            (Failure::TokenRequired, Service::Tv4Play) => {
                "This content requires a TV4 Play account and a valid token. Log in to tv4play.se \
                 in your browser, copy the value of the tv4-refresh-token cookie into the Token \
                 field and try again. Tokens expire, so fetch a new one if it has stopped working."
            }
            (Failure::TokenRequired, Service::SvtPlay) => {
                "This SVT Play content requires a valid token. Most programs on SVT Play are free \
                 to download, check that the url points to a public program or that the token you \
                 entered has not expired."
            }
            (Failure::TokenRequired, Service::Other) => {
                "This content requires a valid token. Check that you have entered a token and \
                 that it has not expired."
            }
            (Failure::NoVideosFound, Service::Tv4Play) => {
                "No videos were found at this URL. Please check the URL or try logging in to TV4 \
                 Play and refreshing your token."
            }
            (Failure::NoVideosFound, Service::SvtPlay) => {
                "No videos were found at this URL. The program may have been removed from SVT \
                 Play or only be available to viewers in Sweden."
            }
            (Failure::NoVideosFound, Service::Other) => {
                "No videos were found at this URL. Check that the address points to a program or \
                 an episode."
            }
            (Failure::DrmProtected, Service::Tv4Play) => {
                "This TV4 Play content is DRM protected and cannot be downloaded."
            }
            (Failure::DrmProtected, Service::SvtPlay) => {
                "This SVT Play content is DRM protected and cannot be downloaded."
            }
            (Failure::DrmProtected, Service::Other) => {
                "This content is DRM protected and cannot be downloaded."
            }
        };
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_required_any_order() {
        assert_eq!(
            classify("ERROR: This video requires a Token"),
            Some(Failure::TokenRequired)
        );
        assert_eq!(
            classify("you NEED to log in\nmissing TOKEN"),
            Some(Failure::TokenRequired)
        );
    }

    #[test]
    fn test_priority_order() {
        let output = "No videos found. DRM protected. Token required.";
        assert_eq!(classify(output), Some(Failure::TokenRequired));
        assert_eq!(
            classify("No videos found, content is DRM protected"),
            Some(Failure::NoVideosFound)
        );
        assert_eq!(
            classify("ERROR: Can't download DRM protected content"),
            Some(Failure::DrmProtected)
        );
        assert_eq!(classify("INFO: drm"), None);
    }

    #[test]
    fn test_zero_exit_is_not_sufficient() {
        assert_eq!(
            Outcome::evaluate(true, "", "ERROR: token is required"),
            Outcome::Failed(Failure::TokenRequired)
        );
        assert_eq!(
            Outcome::evaluate(true, "", "ERROR: This is DRM protected"),
            Outcome::Failed(Failure::DrmProtected)
        );
        assert_eq!(Outcome::evaluate(true, "", ""), Outcome::Success);
    }

    #[test]
    fn test_unknown_prefers_stderr() {
        assert_eq!(
            Outcome::evaluate(false, "out", " boom \n"),
            Outcome::Failed(Failure::Unknown {
                detail: "boom".to_string()
            })
        );
        assert_eq!(
            Outcome::evaluate(false, "out", ""),
            Outcome::Failed(Failure::Unknown {
                detail: "out".to_string()
            })
        );
        assert_eq!(
            Outcome::evaluate(false, "", ""),
            Outcome::Failed(Failure::Unknown {
                detail: "Unknown error".to_string()
            })
        );
    }

    #[test]
    fn test_service_from_url() {
        assert_eq!(
            Service::from_url("https://www.svtplay.se/video/abc"),
            Service::SvtPlay
        );
        assert_eq!(
            Service::from_url("https://www.tv4play.se/program/idol"),
            Service::Tv4Play
        );
        assert_eq!(Service::from_url("https://evil-svtplay.se.example.com/"), Service::Other);
        assert_eq!(Service::from_url("not a url"), Service::Other);
    }

    #[test]
    fn test_explanation_is_service_specific() {
        let tv4 = Failure::TokenRequired.explanation(Service::Tv4Play);
        assert!(tv4.contains("TV4 Play account"));
        assert!(tv4.contains("token"));
        let generic = Failure::TokenRequired.explanation(Service::Other);
        assert!(!generic.contains("TV4"));
        let unknown = Failure::Unknown {
            detail: "raw".to_string(),
        };
        assert_eq!(unknown.explanation(Service::SvtPlay), "raw");
        assert_eq!(unknown.message(), None);
    }
}

//! Accept/reject decisions for candidate documents.
//!
//! Checks run in a fixed order: the host must be the preferred domain, the
//! file must be a PDF or EPUB, and only then is the text sample scored for
//! language. Cheap structural rejections therefore never reach the scorer.

mod scorer;

pub use scorer::{LanguageScorer, StopwordScorer};

use std::fmt;
use std::str::FromStr;

use tracing::{debug, instrument};
use url::Url;

use crate::fetch::{Candidate, DOCUMENT_EXTENSIONS, DOCUMENT_MIME_TYPES, file_stem};

/// Default minimum English confidence for acceptance.
pub const DEFAULT_MIN_ENGLISH_CONFIDENCE: f32 = 0.5;

/// What to do when the scorer has no signal for a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoubtPolicy {
    /// Keep the document.
    Accept,
    /// Drop the document.
    #[default]
    Reject,
}

impl FromStr for DoubtPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(format!("expected 'accept' or 'reject', got '{other}'")),
        }
    }
}

impl fmt::Display for DoubtPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    /// The file is hosted somewhere other than the preferred domain.
    ForeignHost,
    /// Not a PDF or EPUB.
    UnsupportedType,
    /// Scored below the English threshold.
    NotEnglish {
        /// The scorer's English confidence.
        confidence: f32,
    },
    /// No language signal and the doubt policy rejects.
    Ambiguous,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignHost => write!(f, "host is not the preferred domain"),
            Self::UnsupportedType => write!(f, "not a PDF or EPUB"),
            Self::NotEnglish { confidence } => {
                write!(f, "not English (confidence {confidence:.2})")
            }
            Self::Ambiguous => write!(f, "language could not be determined"),
        }
    }
}

/// Classification outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Download the candidate.
    Accept,
    /// Skip the candidate.
    Reject(RejectReason),
}

impl Verdict {
    /// Returns true for [`Verdict::Accept`].
    #[must_use]
    pub fn is_accept(&self) -> bool {
        matches!(self, Self::Accept)
    }
}

/// Domain, type and language classifier.
pub struct Classifier {
    preferred_domain: String,
    scorer: Box<dyn LanguageScorer>,
    doubt_policy: DoubtPolicy,
    min_confidence: f32,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Classifier")
            .field("preferred_domain", &self.preferred_domain)
            .field("doubt_policy", &self.doubt_policy)
            .field("min_confidence", &self.min_confidence)
            .finish_non_exhaustive()
    }
}

impl Classifier {
    /// Creates a classifier with the default [`StopwordScorer`].
    #[must_use]
    pub fn new(preferred_domain: impl Into<String>) -> Self {
        Self::with_scorer(preferred_domain, Box::new(StopwordScorer::new()))
    }

    /// Creates a classifier with a custom scorer.
    #[must_use]
    pub fn with_scorer(preferred_domain: impl Into<String>, scorer: Box<dyn LanguageScorer>) -> Self {
        Self {
            preferred_domain: canonical_host(&preferred_domain.into()),
            scorer,
            doubt_policy: DoubtPolicy::default(),
            min_confidence: DEFAULT_MIN_ENGLISH_CONFIDENCE,
        }
    }

    /// Sets the policy for samples without language signal.
    #[must_use]
    pub fn doubt_policy(mut self, policy: DoubtPolicy) -> Self {
        self.doubt_policy = policy;
        self
    }

    /// Sets the minimum English confidence for acceptance.
    #[must_use]
    pub fn min_confidence(mut self, min_confidence: f32) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    /// Returns the normalized preferred domain.
    #[must_use]
    pub fn preferred_domain(&self) -> &str {
        &self.preferred_domain
    }

    /// Returns true if `url` is served by the preferred domain.
    #[must_use]
    pub fn is_preferred_host(&self, url: &Url) -> bool {
        url.host_str()
            .is_some_and(|host| canonical_host(host) == self.preferred_domain)
    }

    /// Classifies one candidate.
    #[instrument(skip(self, candidate), fields(index = candidate.index, url = %candidate.url))]
    pub fn classify(&self, candidate: &Candidate) -> Verdict {
        if !self.is_preferred_host(&candidate.url) {
            debug!(host = ?candidate.url.host_str(), "rejecting foreign host");
            return Verdict::Reject(RejectReason::ForeignHost);
        }

        if !is_document(candidate) {
            debug!(file_name = %candidate.file_name, "rejecting unsupported type");
            return Verdict::Reject(RejectReason::UnsupportedType);
        }

        let sample = text_sample(candidate);
        match self.scorer.score(&sample) {
            Some(confidence) if confidence >= self.min_confidence => Verdict::Accept,
            Some(confidence) => Verdict::Reject(RejectReason::NotEnglish { confidence }),
            None => match self.doubt_policy {
                DoubtPolicy::Accept => {
                    debug!(sample, "no language signal, accepting on doubt");
                    Verdict::Accept
                }
                DoubtPolicy::Reject => Verdict::Reject(RejectReason::Ambiguous),
            },
        }
    }
}

/// Normalizes a host: trim, strip leading `www.` and trailing `.`, lowercase.
#[must_use]
pub fn canonical_host(host: &str) -> String {
    host.trim()
        .trim_start_matches("www.")
        .trim_end_matches('.')
        .to_ascii_lowercase()
}

fn is_document(candidate: &Candidate) -> bool {
    if candidate
        .extension()
        .is_some_and(|ext| DOCUMENT_EXTENSIONS.contains(&ext.as_str()))
    {
        return true;
    }
    candidate
        .content_type
        .as_deref()
        .is_some_and(|mime| DOCUMENT_MIME_TYPES.contains(&mime))
}

/// File name stem plus anchor text, when the anchor adds anything.
fn text_sample(candidate: &Candidate) -> String {
    let stem = file_stem(&candidate.file_name);
    match candidate.link_text.as_deref() {
        Some(text) if !text.is_empty() && text != candidate.file_name && text != stem => {
            format!("{stem} {text}")
        }
        _ => stem.to_string(),
    }
}

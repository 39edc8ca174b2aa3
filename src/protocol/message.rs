//! Protocol message definitions
//!
//! Requests travel from the UI client to the backend, responses travel
//! back. The two families have disjoint tag spaces.

use bytes::BytesMut;
use serde::Serialize;
use std::fmt;

use super::registry::{Message, Registry, VariantEntry, WireVariant};
use super::wire::{put_i32, put_string, BodyReader};
use super::CodecError;

// ---------------------------------------------------------------------------
// Request variants
// ---------------------------------------------------------------------------

/// Delete the elements currently selected in the host application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteElements;

impl WireVariant for DeleteElements {
    const TAG: i32 = 0;
    const NAME: &'static str = "DeleteElements";

    fn encode_body(&self, _buf: &mut BytesMut) {}

    fn decode_body(_body: &mut BodyReader<'_>) -> Result<Self, CodecError> {
        Ok(DeleteElements)
    }
}

/// All requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Request {
    DeleteElements(DeleteElements),
}

impl From<DeleteElements> for Request {
    fn from(v: DeleteElements) -> Self {
        Request::DeleteElements(v)
    }
}

static REQUEST_VARIANTS: [VariantEntry<Request>; 1] = [VariantEntry::of::<DeleteElements>()];

/// Request tag table
pub static REQUESTS: Registry<Request> = Registry::new("request", &REQUEST_VARIANTS);

impl Message for Request {
    fn registry() -> &'static Registry<Self> {
        &REQUESTS
    }

    fn tag(&self) -> i32 {
        match self {
            Request::DeleteElements(_) => DeleteElements::TAG,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Request::DeleteElements(_) => DeleteElements::NAME,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Request::DeleteElements(v) => v.encode_body(buf),
        }
    }
}

// ---------------------------------------------------------------------------
// Response variants
// ---------------------------------------------------------------------------

/// The request succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeletionCompleted {
    /// Number of changes the backend applied
    pub changes: i32,
}

impl WireVariant for DeletionCompleted {
    const TAG: i32 = 0;
    const NAME: &'static str = "Success";

    fn encode_body(&self, buf: &mut BytesMut) {
        put_i32(buf, self.changes);
    }

    fn decode_body(body: &mut BodyReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            changes: body.read_i32()?,
        })
    }
}

/// The backend refused or failed to carry out the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejected {
    /// `None` when the peer sent a null string
    pub reason: Option<String>,
}

impl WireVariant for Rejected {
    const TAG: i32 = 1;
    const NAME: &'static str = "Rejected";

    fn encode_body(&self, buf: &mut BytesMut) {
        put_string(buf, self.reason.as_deref());
    }

    fn decode_body(body: &mut BodyReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            reason: body.read_string()?,
        })
    }
}

/// All responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Response {
    DeletionCompleted(DeletionCompleted),
    Rejected(Rejected),
}

impl Response {
    pub fn success(changes: i32) -> Self {
        Response::DeletionCompleted(DeletionCompleted { changes })
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Response::Rejected(Rejected {
            reason: Some(reason.into()),
        })
    }
}

impl From<DeletionCompleted> for Response {
    fn from(v: DeletionCompleted) -> Self {
        Response::DeletionCompleted(v)
    }
}

impl From<Rejected> for Response {
    fn from(v: Rejected) -> Self {
        Response::Rejected(v)
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::DeletionCompleted(v) => write!(f, "success ({} changes)", v.changes),
            Response::Rejected(Rejected { reason: Some(r) }) => write!(f, "rejected: {}", r),
            Response::Rejected(Rejected { reason: None }) => write!(f, "rejected"),
        }
    }
}

static RESPONSE_VARIANTS: [VariantEntry<Response>; 2] = [
    VariantEntry::of::<DeletionCompleted>(),
    VariantEntry::of::<Rejected>(),
];

/// Response tag table
pub static RESPONSES: Registry<Response> = Registry::new("response", &RESPONSE_VARIANTS);

impl Message for Response {
    fn registry() -> &'static Registry<Self> {
        &RESPONSES
    }

    fn tag(&self) -> i32 {
        match self {
            Response::DeletionCompleted(_) => DeletionCompleted::TAG,
            Response::Rejected(_) => Rejected::TAG,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Response::DeletionCompleted(_) => DeletionCompleted::NAME,
            Response::Rejected(_) => Rejected::NAME,
        }
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Response::DeletionCompleted(v) => v.encode_body(buf),
            Response::Rejected(v) => v.encode_body(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tags_contiguous<M>(registry: &Registry<M>) {
        let tags: Vec<i32> = registry.entries().iter().map(|e| e.tag).collect();
        let expected: Vec<i32> = (0..tags.len() as i32).collect();
        assert_eq!(tags, expected, "{} tags", registry.family());
    }

    #[test]
    fn test_registries_are_contiguous() {
        assert_tags_contiguous(&REQUESTS);
        assert_tags_contiguous(&RESPONSES);
    }

    #[test]
    fn test_request_roundtrip() {
        let request = Request::DeleteElements(DeleteElements);
        let bytes = request.encode();
        assert_eq!(&bytes[..], &[0, 0, 0, 0]);
        assert_eq!(Request::decode(&bytes).unwrap(), request);
    }

    #[test]
    fn test_response_roundtrip() {
        let cases = [
            Response::success(0),
            Response::success(3),
            Response::success(i32::MAX),
            Response::success(i32::MIN),
            Response::rejected(""),
            Response::rejected("no selection"),
            Response::rejected("sélection vide \u{1F5D1}"),
            Response::Rejected(Rejected { reason: None }),
        ];

        for response in cases {
            let bytes = response.encode();
            assert_eq!(Response::decode(&bytes).unwrap(), response);
        }
    }

    #[test]
    fn test_success_layout() {
        let bytes = Response::success(3).encode();
        assert_eq!(&bytes[..], &[0, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_rejected_layout() {
        let bytes = Response::rejected("x").encode();
        assert_eq!(&bytes[..], &[1, 0, 0, 0, 1, 0, 0, 0, b'x', 0]);
    }

    #[test]
    fn test_unknown_tag() {
        let payload = 999i32.to_le_bytes();

        match Response::decode(&payload) {
            Err(CodecError::UnknownVariant { family, tag }) => {
                assert_eq!(family, "response");
                assert_eq!(tag, 999);
            }
            other => panic!("expected UnknownVariant, got {:?}", other),
        }
        assert!(matches!(
            Request::decode(&payload),
            Err(CodecError::UnknownVariant { tag: 999, .. })
        ));
    }

    #[test]
    fn test_negative_tag_is_unknown() {
        let payload = (-1i32).to_le_bytes();
        assert!(matches!(
            Request::decode(&payload),
            Err(CodecError::UnknownVariant { tag: -1, .. })
        ));
    }

    #[test]
    fn test_truncated_body() {
        // Success tag followed by half a count
        let payload = [0, 0, 0, 0, 3, 0];
        assert!(matches!(
            Response::decode(&payload),
            Err(CodecError::TruncatedPayload { needed: 4, remaining: 2 })
        ));
    }

    #[test]
    fn test_missing_tag() {
        assert!(matches!(
            Request::decode(&[]),
            Err(CodecError::TruncatedPayload { needed: 4, remaining: 0 })
        ));
    }

    #[test]
    fn test_tag_spaces_are_separate() {
        // Tag 1 is a response but not a request
        let payload = Response::rejected("x").encode();
        assert!(Response::decode(&payload).is_ok());
        assert!(matches!(
            Request::decode(&payload),
            Err(CodecError::UnknownVariant { family: "request", tag: 1 })
        ));
    }

    #[test]
    fn test_display() {
        assert_eq!(Response::success(3).to_string(), "success (3 changes)");
        assert_eq!(
            Response::rejected("no selection").to_string(),
            "rejected: no selection"
        );
    }
}

//! Tag registry for message families
//!
//! Each message family (requests, responses) owns one static [`Registry`]
//! that maps a tag to the decoder of the variant carrying it. Adding a
//! variant means adding a [`WireVariant`] impl and one registry entry;
//! framing and dispatch never change.

use bytes::BytesMut;

use super::wire::{put_i32, BodyReader};
use super::CodecError;

/// One concrete message shape with its own tag and body layout
pub trait WireVariant: Sized {
    /// Wire tag, unique within the variant's family
    const TAG: i32;
    /// Human-readable name used in logs
    const NAME: &'static str;

    /// Append the body fields in declared order
    fn encode_body(&self, buf: &mut BytesMut);

    /// Read the body fields in declared order
    fn decode_body(body: &mut BodyReader<'_>) -> Result<Self, CodecError>;
}

/// Body decoder producing a family value
pub type DecodeFn<M> = fn(&mut BodyReader<'_>) -> Result<M, CodecError>;

/// Registry entry binding a tag to its decoder
pub struct VariantEntry<M: 'static> {
    pub tag: i32,
    pub name: &'static str,
    pub decode: DecodeFn<M>,
}

impl<M: 'static> VariantEntry<M> {
    /// Build the entry for variant `V`
    pub const fn of<V>() -> Self
    where
        V: WireVariant + Into<M>,
    {
        Self {
            tag: V::TAG,
            name: V::NAME,
            decode: decode_variant::<V, M>,
        }
    }
}

fn decode_variant<V, M>(body: &mut BodyReader<'_>) -> Result<M, CodecError>
where
    V: WireVariant + Into<M>,
{
    V::decode_body(body).map(Into::into)
}

/// Read-only tag table for one message family
pub struct Registry<M: 'static> {
    family: &'static str,
    entries: &'static [VariantEntry<M>],
}

impl<M: 'static> Registry<M> {
    pub const fn new(family: &'static str, entries: &'static [VariantEntry<M>]) -> Self {
        Self { family, entries }
    }

    pub fn family(&self) -> &'static str {
        self.family
    }

    pub fn entries(&self) -> &'static [VariantEntry<M>] {
        self.entries
    }

    pub fn lookup(&self, tag: i32) -> Option<&'static VariantEntry<M>> {
        self.entries.iter().find(|entry| entry.tag == tag)
    }

    /// Decode a full payload: tag first, then the variant body
    pub fn decode(&self, payload: &[u8]) -> Result<M, CodecError> {
        let mut body = BodyReader::new(payload);
        let tag = body.read_i32()?;

        let entry = self.lookup(tag).ok_or(CodecError::UnknownVariant {
            family: self.family,
            tag,
        })?;
        let message = (entry.decode)(&mut body)?;

        if body.remaining() > 0 {
            tracing::debug!(
                "Ignoring {} trailing bytes after {} {}",
                body.remaining(),
                self.family,
                entry.name
            );
        }

        Ok(message)
    }
}

/// A family of tagged messages sharing one tag space
pub trait Message: Sized + Send + 'static {
    fn registry() -> &'static Registry<Self>;

    /// Tag of this value's variant
    fn tag(&self) -> i32;

    /// Variant name of this value
    fn name(&self) -> &'static str;

    /// Append this value's body (without the tag)
    fn encode_body(&self, buf: &mut BytesMut);

    /// Append tag and body
    fn encode_into(&self, buf: &mut BytesMut) {
        put_i32(buf, self.tag());
        self.encode_body(buf);
    }

    fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(64);
        self.encode_into(&mut buf);
        buf
    }

    fn decode(payload: &[u8]) -> Result<Self, CodecError> {
        Self::registry().decode(payload)
    }
}

//! ---
//! bmq_section: "02-host-bridge-core"
//! bmq_subsection: "module"
//! bmq_type: "source"
//! bmq_scope: "code"
//! bmq_description: "Typed message property codec between host values and wire properties."
//! bmq_version: "v0.0.0-prealpha"
//! bmq_owner: "tbd"
//! ---
//! Conversion between the host's dynamic property values and the client's
//! typed property container.
//!
//! Encoding is strict: the declared tag and the value shape must agree and
//! integers must fit the declared width. Decoding is lenient: properties the
//! host cannot represent are skipped and reported as [`DecodeError`]s while the
//! remaining properties are still returned.

use std::fmt;

use indexmap::IndexMap;
use thiserror::Error;

use crate::codes::{self, GenericResult, PropertyType, ResultCode};

/// Dynamic value as seen by host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostValue {
    Bool(bool),
    /// Host integers are unbounded; width checks happen during encode.
    Int(i128),
    Bytes(Vec<u8>),
    Str(String),
}

impl HostValue {
    /// Short name of the host shape, used in type mismatch messages.
    pub fn kind(&self) -> &'static str {
        match self {
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Bytes(_) => "bytes",
            HostValue::Str(_) => "str",
        }
    }

    /// Tag assigned when the host does not declare one.
    pub fn default_tag(&self) -> PropertyTag {
        let ty = match self {
            HostValue::Bool(_) => PropertyType::Bool,
            HostValue::Int(_) => PropertyType::Int64,
            HostValue::Bytes(_) => PropertyType::Binary,
            HostValue::Str(_) => PropertyType::String,
        };
        PropertyTag::from(ty)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Bool(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        HostValue::Int(value.into())
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::Str(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::Str(value)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(value: Vec<u8>) -> Self {
        HostValue::Bytes(value)
    }
}

impl From<&[u8]> for HostValue {
    fn from(value: &[u8]) -> Self {
        HostValue::Bytes(value.to_vec())
    }
}

/// Type tag as supplied by the host. May hold codes outside the supported set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyTag(pub i64);

impl PropertyTag {
    /// Resolve the tag against the native type table.
    pub fn property_type(self) -> Option<PropertyType> {
        i32::try_from(self.0).ok().and_then(PropertyType::from_code)
    }
}

impl From<PropertyType> for PropertyTag {
    fn from(ty: PropertyType) -> Self {
        PropertyTag(ty.code().into())
    }
}

impl fmt::Display for PropertyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = i32::try_from(self.0)
            .map(codes::name::<PropertyType>)
            .unwrap_or(codes::UNKNOWN_NAME);
        write!(f, "{} ({})", self.0, name)
    }
}

/// Ordered mapping from property name to value and declared tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    entries: IndexMap<Vec<u8>, (HostValue, PropertyTag)>,
}

impl PropertySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a property, replacing any previous entry with the same key.
    pub fn insert(
        &mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<HostValue>,
        tag: impl Into<PropertyTag>,
    ) -> Option<(HostValue, PropertyTag)> {
        self.entries.insert(key.into(), (value.into(), tag.into()))
    }

    /// Builder form of [`PropertySet::insert`].
    pub fn with(
        mut self,
        key: impl Into<Vec<u8>>,
        value: impl Into<HostValue>,
        tag: impl Into<PropertyTag>,
    ) -> Self {
        self.insert(key, value, tag);
        self
    }

    pub fn get(&self, key: &[u8]) -> Option<&(HostValue, PropertyTag)> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &HostValue, PropertyTag)> {
        self.entries
            .iter()
            .map(|(key, (value, tag))| (key.as_slice(), value, *tag))
    }

    /// Build a set from untagged values, then apply explicit tag overrides.
    ///
    /// Values receive the tag of their host shape. An override naming a key
    /// that has no value is rejected.
    pub fn infer<K, V, O>(values: V, overrides: O) -> Result<Self, PropertyError>
    where
        K: Into<Vec<u8>>,
        V: IntoIterator<Item = (K, HostValue)>,
        O: IntoIterator<Item = (K, PropertyTag)>,
    {
        let mut set = PropertySet::new();
        for (key, value) in values {
            let tag = value.default_tag();
            set.insert(key, value, tag);
        }
        for (key, tag) in overrides {
            let key = key.into();
            match set.entries.get_mut(&key) {
                Some(entry) => entry.1 = tag,
                None => {
                    return Err(PropertyError::UnknownOverride {
                        key: display_key(&key),
                    })
                }
            }
        }
        Ok(set)
    }
}

/// Value stored in the native property container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Bool(bool),
    Char(u8),
    Short(i16),
    Int32(i32),
    Int64(i64),
    /// Strings travel as raw bytes; UTF-8 is checked when decoding.
    String(Vec<u8>),
    Binary(Vec<u8>),
    /// A tag introduced by a newer client that this codec does not model.
    Unrecognized { type_code: i32 },
}

impl WireValue {
    pub fn type_code(&self) -> i32 {
        match self {
            WireValue::Bool(_) => PropertyType::Bool.code(),
            WireValue::Char(_) => PropertyType::Char.code(),
            WireValue::Short(_) => PropertyType::Short.code(),
            WireValue::Int32(_) => PropertyType::Int32.code(),
            WireValue::Int64(_) => PropertyType::Int64.code(),
            WireValue::String(_) => PropertyType::String.code(),
            WireValue::Binary(_) => PropertyType::Binary.code(),
            WireValue::Unrecognized { type_code } => *type_code,
        }
    }
}

/// Ordered typed property container with the native client's setter contract.
///
/// Setters return a native result code; an empty key is refused with
/// `INVALID_ARGUMENT`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    entries: Vec<(Vec<u8>, WireValue)>,
}

impl MessageProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_as_bool(&mut self, key: &[u8], value: bool) -> i32 {
        self.set_raw(key, WireValue::Bool(value))
    }

    pub fn set_as_char(&mut self, key: &[u8], value: u8) -> i32 {
        self.set_raw(key, WireValue::Char(value))
    }

    pub fn set_as_short(&mut self, key: &[u8], value: i16) -> i32 {
        self.set_raw(key, WireValue::Short(value))
    }

    pub fn set_as_int32(&mut self, key: &[u8], value: i32) -> i32 {
        self.set_raw(key, WireValue::Int32(value))
    }

    pub fn set_as_int64(&mut self, key: &[u8], value: i64) -> i32 {
        self.set_raw(key, WireValue::Int64(value))
    }

    pub fn set_as_string(&mut self, key: &[u8], value: &[u8]) -> i32 {
        self.set_raw(key, WireValue::String(value.to_vec()))
    }

    pub fn set_as_binary(&mut self, key: &[u8], value: &[u8]) -> i32 {
        self.set_raw(key, WireValue::Binary(value.to_vec()))
    }

    /// Store any wire value, including unrecognized tags produced by a newer peer.
    pub fn set_raw(&mut self, key: &[u8], value: WireValue) -> i32 {
        if key.is_empty() {
            return GenericResult::InvalidArgument.code();
        }
        match self.entries.iter_mut().find(|(existing, _)| existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_vec(), value)),
        }
        GenericResult::Success.code()
    }

    pub fn get(&self, key: &[u8]) -> Option<&WireValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &WireValue)> {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_slice(), value))
    }
}

/// Failures raised while encoding host properties.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("'{key}' value is of the incorrect type, '{found}' provided, '{expected}' expected.")]
    TypeMismatch {
        key: String,
        found: String,
        expected: &'static str,
    },
    #[error("'{key}' value does not have exactly 1 byte, {len} bytes provided.")]
    CharWidth { key: String, len: usize },
    #[error("Property {key} value must be between [{min}, {max}], inclusive")]
    RangeError { key: String, min: i128, max: i128 },
    #[error("Unsupported property type {tag}")]
    UnsupportedType { key: String, tag: PropertyTag },
    #[error("Failed to set key '{key}' with rc: {rc}")]
    Rejected { key: String, rc: i32 },
    #[error("'{key}' has a type override but no value")]
    UnknownOverride { key: String },
}

/// A property skipped while decoding. Never aborts delivery of the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("STRING property '{key}' has non-UTF-8 data")]
    NonUtf8String { key: String },
    #[error("'{key}' property type is unrecognized, type {type_code} received.")]
    UnrecognizedType { key: String, type_code: i32 },
}

/// Tags handled by the encode and decode arms below, lowest to highest.
const CODEC_TYPES: [PropertyType; 7] = [
    PropertyType::Bool,
    PropertyType::Char,
    PropertyType::Short,
    PropertyType::Int32,
    PropertyType::Int64,
    PropertyType::String,
    PropertyType::Binary,
];

const _: () = {
    assert!(CODEC_TYPES[0] as i32 == PropertyType::LOWEST_SUPPORTED);
    assert!(CODEC_TYPES[CODEC_TYPES.len() - 1] as i32 == PropertyType::HIGHEST_SUPPORTED);
    assert!(
        CODEC_TYPES.len() as i32 == PropertyType::HIGHEST_SUPPORTED - PropertyType::LOWEST_SUPPORTED + 1
    );
};

fn display_key(key: &[u8]) -> String {
    String::from_utf8_lossy(key).into_owned()
}

trait IntegerWidth: TryFrom<i128> {
    const MIN: i128;
    const MAX: i128;
}

impl IntegerWidth for i16 {
    const MIN: i128 = i16::MIN as i128;
    const MAX: i128 = i16::MAX as i128;
}

impl IntegerWidth for i32 {
    const MIN: i128 = i32::MIN as i128;
    const MAX: i128 = i32::MAX as i128;
}

impl IntegerWidth for i64 {
    const MIN: i128 = i64::MIN as i128;
    const MAX: i128 = i64::MAX as i128;
}

fn narrow<T: IntegerWidth>(key: &[u8], value: &HostValue) -> Result<T, PropertyError> {
    match value {
        HostValue::Int(int) => T::try_from(*int).map_err(|_| PropertyError::RangeError {
            key: display_key(key),
            min: T::MIN,
            max: T::MAX,
        }),
        other => Err(mismatch(key, other, "int")),
    }
}

fn mismatch(key: &[u8], value: &HostValue, expected: &'static str) -> PropertyError {
    PropertyError::TypeMismatch {
        key: display_key(key),
        found: value.kind().to_owned(),
        expected,
    }
}

/// Encode host properties into the native container.
///
/// Fails before any property reaches the native side if a value disagrees with
/// its declared tag or does not fit the declared integer width.
pub fn encode(properties: &PropertySet) -> Result<MessageProperties, PropertyError> {
    let mut wire = MessageProperties::new();
    for (key, value, tag) in properties.iter() {
        let unsupported = || PropertyError::UnsupportedType {
            key: display_key(key),
            tag,
        };
        let ty = tag.property_type().ok_or_else(unsupported)?;
        let rc = match ty {
            PropertyType::Undefined => return Err(unsupported()),
            PropertyType::Bool => match value {
                HostValue::Bool(flag) => wire.set_as_bool(key, *flag),
                other => return Err(mismatch(key, other, "bool")),
            },
            PropertyType::Char => match value {
                HostValue::Bytes(bytes) if bytes.len() == 1 => wire.set_as_char(key, bytes[0]),
                HostValue::Bytes(bytes) => {
                    return Err(PropertyError::CharWidth {
                        key: display_key(key),
                        len: bytes.len(),
                    })
                }
                other => return Err(mismatch(key, other, "bytes")),
            },
            PropertyType::Short => wire.set_as_short(key, narrow::<i16>(key, value)?),
            PropertyType::Int32 => wire.set_as_int32(key, narrow::<i32>(key, value)?),
            PropertyType::Int64 => wire.set_as_int64(key, narrow::<i64>(key, value)?),
            PropertyType::String => match value {
                HostValue::Str(text) => wire.set_as_string(key, text.as_bytes()),
                HostValue::Bytes(bytes) => wire.set_as_string(key, bytes),
                other => return Err(mismatch(key, other, "str")),
            },
            PropertyType::Binary => match value {
                HostValue::Bytes(bytes) => wire.set_as_binary(key, bytes),
                other => return Err(mismatch(key, other, "bytes")),
            },
        };
        if rc != GenericResult::Success.code() {
            return Err(PropertyError::Rejected {
                key: display_key(key),
                rc,
            });
        }
    }
    Ok(wire)
}

/// Decode a native container into host properties.
///
/// Returns every property the host can represent together with one error per
/// skipped property.
pub fn decode(wire: &MessageProperties) -> (PropertySet, Vec<DecodeError>) {
    let mut properties = PropertySet::new();
    let mut errors = Vec::new();
    for (key, value) in wire.iter() {
        let decoded = match value {
            WireValue::Bool(flag) => (HostValue::Bool(*flag), PropertyType::Bool),
            WireValue::Char(byte) => (HostValue::Bytes(vec![*byte]), PropertyType::Char),
            WireValue::Short(int) => (HostValue::Int((*int).into()), PropertyType::Short),
            WireValue::Int32(int) => (HostValue::Int((*int).into()), PropertyType::Int32),
            WireValue::Int64(int) => (HostValue::Int((*int).into()), PropertyType::Int64),
            WireValue::String(bytes) => match String::from_utf8(bytes.clone()) {
                Ok(text) => (HostValue::Str(text), PropertyType::String),
                Err(_) => {
                    errors.push(DecodeError::NonUtf8String {
                        key: display_key(key),
                    });
                    continue;
                }
            },
            WireValue::Binary(bytes) => (HostValue::Bytes(bytes.clone()), PropertyType::Binary),
            WireValue::Unrecognized { type_code } => {
                errors.push(DecodeError::UnrecognizedType {
                    key: display_key(key),
                    type_code: *type_code,
                });
                continue;
            }
        };
        properties.insert(key, decoded.0, decoded.1);
    }
    (properties, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: HostValue, ty: PropertyType) {
        let set = PropertySet::new().with("k", value, ty);
        let wire = encode(&set).expect("encode");
        let (decoded, errors) = decode(&wire);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
        assert_eq!(decoded, set);
    }

    #[test]
    fn every_supported_tag_roundtrips() {
        roundtrip(HostValue::Bool(true), PropertyType::Bool);
        roundtrip(HostValue::Bytes(vec![b'x']), PropertyType::Char);
        roundtrip(HostValue::Int(-12), PropertyType::Short);
        roundtrip(HostValue::Int(70_000), PropertyType::Int32);
        roundtrip(HostValue::Int(1 << 40), PropertyType::Int64);
        roundtrip(HostValue::Str("héllo".into()), PropertyType::String);
        roundtrip(HostValue::Bytes(vec![0, 159, 146, 150]), PropertyType::Binary);
    }

    #[test]
    fn reencoding_decoded_values_is_bit_identical() {
        let set = PropertySet::new()
            .with("a", HostValue::Int(i16::MIN.into()), PropertyType::Short)
            .with("b", HostValue::Bytes(vec![0xff]), PropertyType::Char)
            .with("c", "text", PropertyType::String);
        let wire = encode(&set).expect("encode");
        let (decoded, _) = decode(&wire);
        assert_eq!(encode(&decoded).expect("re-encode"), wire);
    }

    #[test]
    fn integer_bounds_are_inclusive() {
        let cases: [(PropertyType, i128, i128); 3] = [
            (PropertyType::Short, i16::MIN.into(), i16::MAX.into()),
            (PropertyType::Int32, i32::MIN.into(), i32::MAX.into()),
            (PropertyType::Int64, i64::MIN.into(), i64::MAX.into()),
        ];
        for (ty, min, max) in cases {
            for ok in [min, max] {
                let set = PropertySet::new().with("n", HostValue::Int(ok), ty);
                assert!(encode(&set).is_ok(), "{ty:?} {ok}");
            }
            for bad in [min - 1, max + 1] {
                let set = PropertySet::new().with("n", HostValue::Int(bad), ty);
                assert_eq!(
                    encode(&set),
                    Err(PropertyError::RangeError {
                        key: "n".into(),
                        min,
                        max
                    })
                );
            }
        }
    }

    #[test]
    fn range_error_names_key_and_bounds() {
        let set = PropertySet::new().with("count", HostValue::Int(40_000), PropertyType::Short);
        let err = encode(&set).expect_err("out of range");
        assert_eq!(
            err.to_string(),
            "Property count value must be between [-32768, 32767], inclusive"
        );
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let set = PropertySet::new().with("flag", HostValue::Int(1), PropertyType::Bool);
        assert!(matches!(
            encode(&set),
            Err(PropertyError::TypeMismatch { expected: "bool", .. })
        ));

        let set = PropertySet::new().with("c", HostValue::Bytes(b"ab".to_vec()), PropertyType::Char);
        let err = encode(&set).expect_err("two bytes");
        assert_eq!(
            err.to_string(),
            "'c' value does not have exactly 1 byte, 2 bytes provided."
        );

        let set = PropertySet::new().with("c", HostValue::Bytes(Vec::new()), PropertyType::Char);
        assert_eq!(
            encode(&set),
            Err(PropertyError::CharWidth {
                key: "c".into(),
                len: 0
            })
        );
    }

    #[test]
    fn unknown_and_undefined_tags_are_unsupported() {
        for tag in [PropertyTag(0), PropertyTag(8), PropertyTag(i64::MAX)] {
            let set = PropertySet::new().with("x", true, tag);
            assert!(matches!(
                encode(&set),
                Err(PropertyError::UnsupportedType { .. })
            ));
        }
    }

    #[test]
    fn empty_key_is_refused_by_container() {
        let set = PropertySet::new().with("", true, PropertyType::Bool);
        assert_eq!(
            encode(&set),
            Err(PropertyError::Rejected {
                key: String::new(),
                rc: GenericResult::InvalidArgument.code()
            })
        );
    }

    #[test]
    fn decode_skips_unrecognized_and_invalid_strings() {
        let mut wire = MessageProperties::new();
        wire.set_as_int32(b"ok", 5);
        wire.set_raw(b"future", WireValue::Unrecognized { type_code: 9 });
        wire.set_as_string(b"bad", &[0xc3, 0x28]);
        wire.set_as_bool(b"last", false);

        let (decoded, errors) = decode(&wire);
        assert_eq!(decoded.len(), 2);
        assert!(decoded.get(b"future").is_none());
        assert_eq!(
            decoded.get(b"last"),
            Some(&(HostValue::Bool(false), PropertyTag::from(PropertyType::Bool)))
        );
        assert_eq!(
            errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
            vec![
                "'future' property type is unrecognized, type 9 received.".to_owned(),
                "STRING property 'bad' has non-UTF-8 data".to_owned(),
            ]
        );
    }

    #[test]
    fn infer_assigns_defaults_then_overrides() {
        let set = PropertySet::infer(
            vec![
                ("a", HostValue::Int(3)),
                ("b", HostValue::from("s")),
                ("c", HostValue::from(vec![1u8])),
                ("d", HostValue::Bool(true)),
            ],
            vec![("a", PropertyTag::from(PropertyType::Short))],
        )
        .expect("infer");
        let tags: Vec<_> = set.iter().map(|(_, _, tag)| tag.property_type()).collect();
        assert_eq!(
            tags,
            vec![
                Some(PropertyType::Short),
                Some(PropertyType::String),
                Some(PropertyType::Binary),
                Some(PropertyType::Bool)
            ]
        );

        let err = PropertySet::infer(
            Vec::<(&str, HostValue)>::new(),
            vec![("missing", PropertyTag::from(PropertyType::Int32))],
        )
        .expect_err("override without value");
        assert_eq!(err, PropertyError::UnknownOverride { key: "missing".into() });
    }
}

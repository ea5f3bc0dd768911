//! Cache key construction.
//!
//! Keys are colon-separated segments. Structured segments are replaced by a
//! short content digest, so a colon inside a raw text segment is the only
//! way to produce an ambiguous key.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Separator between key segments.
pub const SEPARATOR: &str = ":";

/// Number of hex characters kept from the SHA-256 digest.
const DIGEST_LEN: usize = 8;

/// One segment of a cache key before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyPart {
    /// Used verbatim.
    Text(String),
    /// Replaced by [`KeyBuilder::hash`] unless it is a JSON scalar.
    Structured(Value),
    /// Skipped.
    Empty,
}

impl KeyPart {
    fn normalize(self) -> Option<String> {
        let text = match self {
            Self::Text(text) => text,
            Self::Structured(value) => match value {
                Value::Null => return None,
                Value::String(s) => s,
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                other @ (Value::Array(_) | Value::Object(_)) => KeyBuilder::hash(&other),
            },
            Self::Empty => return None,
        };

        (!text.is_empty()).then_some(text)
    }
}

impl From<&str> for KeyPart {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&String> for KeyPart {
    fn from(value: &String) -> Self {
        Self::Text(value.clone())
    }
}

impl From<Value> for KeyPart {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<&Value> for KeyPart {
    fn from(value: &Value) -> Self {
        Self::Structured(value.clone())
    }
}

impl<T: Into<KeyPart>> From<Option<T>> for KeyPart {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Empty, Into::into)
    }
}

macro_rules! impl_key_part_for_numbers {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for KeyPart {
                fn from(value: $ty) -> Self {
                    Self::Text(value.to_string())
                }
            }
        )+
    };
}

impl_key_part_for_numbers!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize, bool);

/// Sort clause for list-query keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub order: String,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, order: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: order.into(),
        }
    }
}

/// Deterministic cache key construction and stable hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyBuilder;

impl KeyBuilder {
    /// Joins the normalized parts with `:`, skipping empty segments.
    pub fn build<I, P>(parts: I) -> String
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        parts
            .into_iter()
            .filter_map(|part| part.into().normalize())
            .collect::<Vec<_>>()
            .join(SEPARATOR)
    }

    /// Builds a key under a namespace.
    pub fn build_with_namespace<I, P>(namespace: &str, parts: I) -> String
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        Self::build(std::iter::once(KeyPart::from(namespace)).chain(parts.into_iter().map(Into::into)))
    }

    /// Short digest of a value.
    ///
    /// Strings are hashed as-is. Anything else is serialized with object keys
    /// sorted at every depth, so the same content always yields the same
    /// digest regardless of the order it was assembled in.
    pub fn hash(value: &Value) -> String {
        match value {
            Value::String(s) => digest(s),
            other => {
                let mut canonical = String::new();
                write_canonical(other, &mut canonical);
                digest(&canonical)
            }
        }
    }

    /// Digest of any serializable value.
    pub fn hash_of<T: Serialize + ?Sized>(value: &T) -> String {
        Self::hash(&serde_json::to_value(value).unwrap_or(Value::Null))
    }

    /// Key for a paginated list query.
    ///
    /// `resource:list:page:limit[:filters:<hash>][:sort:field:order]`
    pub fn pagination_key(
        resource: &str,
        page: u64,
        limit: u64,
        filters: Option<&Value>,
        sort: Option<&SortSpec>,
    ) -> String {
        let mut parts: Vec<KeyPart> = vec![
            resource.into(),
            "list".into(),
            page.into(),
            limit.into(),
        ];

        if let Some(filters) = filters.filter(|f| !is_empty_structure(f)) {
            parts.push("filters".into());
            parts.push(Self::hash(filters).into());
        }

        if let Some(sort) = sort {
            parts.push("sort".into());
            parts.push(sort.field.as_str().into());
            parts.push(sort.order.as_str().into());
        }

        Self::build(parts)
    }
}

/// Builds a cache key from heterogeneous parts.
///
/// ```
/// use strata_cache::cache_key;
/// let key = cache_key!("users", 42_u64, "profile");
/// assert_eq!(key, "users:42:profile");
/// ```
#[macro_export]
macro_rules! cache_key {
    ($($part:expr),+ $(,)?) => {
        $crate::KeyBuilder::build([$($crate::KeyPart::from($part)),+])
    };
}

fn is_empty_structure(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

fn digest(input: &str) -> String {
    let hash = Sha256::digest(input.as_bytes());
    let mut hex = hex::encode(hash);
    hex.truncate(DIGEST_LEN);
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

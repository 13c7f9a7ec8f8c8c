//! JSON encoding of request bodies and decoding of response bodies

use serde::{
    de::{self, DeserializeOwned, Visitor},
    Serialize,
};

use crate::CallError;

/// The result type of calls that expect no meaningful body
///
/// Any body is accepted and discarded.
pub type Discard = serde::de::IgnoredAny;

pub(crate) fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Vec<u8>, CallError> {
    serde_json::to_vec(body).map_err(CallError::RequestSerialization)
}

/// A body that is not JSON, readable only as a string or discarded
struct PlainText(String);

impl<'de> de::Deserializer<'de> for PlainText {
    type Error = de::value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, _: V) -> Result<V::Value, Self::Error> {
        Err(de::Error::custom("plain text can only be read as a string"))
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_string(self.0)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_unit()
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char bytes byte_buf
        option unit unit_struct newtype_struct seq tuple tuple_struct map struct
        enum identifier
    }
}

/// Decodes a response body
///
/// An empty body decodes to `None`. A body that is not valid JSON is only
/// accepted by string results, which receive the raw text, and by
/// [`Discard`].
pub(crate) fn decode<T: DeserializeOwned>(raw: String) -> Result<Option<T>, CallError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let source = match serde_json::from_str(&raw) {
        Ok(value) => return Ok(Some(value)),
        Err(source) => source,
    };

    match T::deserialize(PlainText(raw.clone())) {
        Ok(value) => {
            tracing::trace!("response body was not JSON, decoded as plain text");
            Ok(Some(value))
        }
        Err(_) => Err(CallError::Deserialization {
            source,
            raw_body: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Stream {
        id: String,
        #[serde(rename = "crossPod")]
        cross_pod: bool,
    }

    #[test]
    fn json_body_decodes_into_the_requested_type() {
        let stream: Option<Stream> =
            decode(r#"{"id":"xyz","crossPod":true,"unknown":1}"#.to_owned()).unwrap();

        assert_eq!(
            stream,
            Some(Stream {
                id: "xyz".to_owned(),
                cross_pod: true,
            })
        );
    }

    #[test]
    fn empty_body_decodes_to_none() {
        let value: Option<Stream> = decode("  ".to_owned()).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn plain_text_falls_back_to_a_string() {
        let value: Option<String> = decode("Message sent".to_owned()).unwrap();
        assert_eq!(value.as_deref(), Some("Message sent"));
    }

    #[test]
    fn any_body_can_be_discarded() {
        let value: Option<Discard> = decode("<html>ok</html>".to_owned()).unwrap();
        assert!(value.is_some());
    }

    #[test]
    fn html_is_not_a_json_value() {
        let err = decode::<serde_json::Value>("<html>oops</html>".to_owned()).unwrap_err();

        assert!(matches!(
            err,
            CallError::Deserialization { ref raw_body, .. } if raw_body == "<html>oops</html>"
        ));
    }

    #[test]
    fn bare_word_does_not_select_an_enum_variant() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        enum Presence {
            Available,
        }

        let err = decode::<Presence>("Available".to_owned()).unwrap_err();
        assert!(matches!(err, CallError::Deserialization { .. }));
    }

    #[test]
    fn json_string_body_is_unquoted() {
        let value: Option<String> = decode("\"ok\"".to_owned()).unwrap();
        assert_eq!(value.as_deref(), Some("ok"));
    }

    #[test]
    fn mismatched_body_keeps_the_raw_text() {
        let err = decode::<Stream>("not a stream".to_owned()).unwrap_err();

        assert!(matches!(
            err,
            CallError::Deserialization { ref raw_body, .. } if raw_body == "not a stream"
        ));
    }
}

use std::{borrow::Cow, collections::BTreeMap};

/// Query parameters or headers of a call
///
/// Values are optional; a parameter without a value is left off the wire
/// rather than sent empty.
///
/// ```
/// use tether_reqwest::Params;
///
/// let query = Params::new()
///     .with("limit", "50")
///     .with_optional("since", None::<String>);
///
/// assert_eq!(query.present().collect::<Vec<_>>(), vec![("limit", "50")]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<String, Option<String>>);

impl Params {
    /// An empty set of parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter with a value
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, Some(value.into()));
        self
    }

    /// Adds a parameter that may not have a value
    #[must_use]
    pub fn with_optional(mut self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        self.insert(key, value.map(Into::into));
        self
    }

    /// Sets a parameter, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: Option<String>) -> Option<String> {
        self.0.insert(key.into(), value).flatten()
    }

    /// Gets the value of a parameter
    ///
    /// Keys are matched exactly, except that header names are matched
    /// without regard to case.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .or_else(|| {
                self.0
                    .iter()
                    .find(|(k, _)| k.eq_ignore_ascii_case(key))
                    .map(|(_, v)| v)
            })
            .and_then(Option::as_deref)
    }

    /// The parameters that have a value
    pub fn present(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
    }

    /// Whether no parameter has a value
    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

impl<K, V> FromIterator<(K, Option<V>)> for Params
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        )
    }
}

/// Escapes a value for substitution into a path template
///
/// Every byte outside the unreserved set is percent-encoded, so spaces
/// become `%20` and slashes cannot introduce new segments.
///
/// ```
/// use tether_reqwest::escape_path_segment;
///
/// let path = format!("/v1/stream/{}/info", escape_path_segment("a b/c+d"));
/// assert_eq!(path, "/v1/stream/a%20b%2Fc%2Bd/info");
/// ```
pub fn escape_path_segment(segment: &str) -> Cow<'_, str> {
    urlencoding::encode(segment)
}

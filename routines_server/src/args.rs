//! Request parameter decoding.
//!
//! Parameters come from an `application/x-www-form-urlencoded` POST body or
//! from the query string. For each key the form body wins.

use serde_json::Value;
use url::form_urlencoded;

pub const ACTION_KEY: &str = "action";
pub const ARGS_KEY: &str = "args";

/// Decoded form body and query string of one request.
#[derive(Debug, Clone, Default)]
pub struct RequestParams {
    form: Vec<(String, String)>,
    query: Vec<(String, String)>,
}

impl RequestParams {
    pub fn parse(query: Option<&str>, form: &[u8]) -> Self {
        Self {
            form: form_urlencoded::parse(form).into_owned().collect(),
            query: query
                .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
                .unwrap_or_default(),
        }
    }

    /// Every value under `key` (or its `key[]` form) from the first source that
    /// has one.
    pub fn values(&self, key: &str) -> Vec<&str> {
        let from_form = pick(&self.form, key);
        if from_form.is_empty() {
            pick(&self.query, key)
        } else {
            from_form
        }
    }

    /// The routine the request asks for. Blank values count as missing.
    pub fn action(&self) -> Option<&str> {
        self.values(ACTION_KEY)
            .into_iter()
            .map(str::trim)
            .find(|action| !action.is_empty())
    }

    /// The positional arguments for the task callback.
    pub fn args(&self) -> Vec<Value> {
        parse_args(&self.values(ARGS_KEY))
    }
}

fn pick<'a>(pairs: &'a [(String, String)], key: &str) -> Vec<&'a str> {
    pairs
        .iter()
        .filter(|(k, _)| k.strip_suffix("[]").unwrap_or(k) == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

/// Turns the raw `args` values into a positional argument list.
///
/// A single value is decoded as JSON first: an array spreads into its
/// elements, anything else becomes one argument. When the value is not valid
/// JSON, or the key was repeated, the raw strings are the arguments. This
/// never fails.
pub fn parse_args(raw: &[&str]) -> Vec<Value> {
    match raw {
        [] => Vec::new(),
        [single] if single.trim().is_empty() => Vec::new(),
        [single] => match serde_json::from_str::<Value>(single) {
            Ok(Value::Array(items)) => items,
            Ok(value) => vec![value],
            Err(err) => {
                tracing::debug!("args is not JSON ({err}), passing it through as text");
                vec![Value::String((*single).to_string())]
            }
        },
        many => many.iter().map(|v| Value::String((*v).to_string())).collect(),
    }
}

/// Encodes an argument list the way [`parse_args`] reads it back.
pub fn encode_args(args: &[Value]) -> String {
    Value::Array(args.to_vec()).to_string()
}

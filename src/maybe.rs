// src/maybe.rs
// Loose-emptiness result propagation.
// A Maybe<T> collapses to empty instead of failing, and keeps a trail of
// diagnostics describing where a chain went empty. "Empty" is decided per
// value domain by the Loose trait: zero, "", empty collections, false and
// absence all count as empty.

use std::collections::HashMap;
use std::fmt::Debug;

/// Per-domain emptiness predicate plus a short repr for diagnostics.
pub trait Loose {
    fn is_loose_empty(&self) -> bool;
    fn repr(&self) -> String;
    /// Element count: collections report their length, scalars 0 or 1.
    fn loose_len(&self) -> usize {
        if self.is_loose_empty() {
            0
        } else {
            1
        }
    }
}

impl Loose for bool {
    fn is_loose_empty(&self) -> bool {
        !*self
    }
    fn repr(&self) -> String {
        self.to_string()
    }
}

impl Loose for String {
    fn is_loose_empty(&self) -> bool {
        self.is_empty()
    }
    fn repr(&self) -> String {
        format!("{:?}", self)
    }
}

impl Loose for &str {
    fn is_loose_empty(&self) -> bool {
        self.is_empty()
    }
    fn repr(&self) -> String {
        format!("{:?}", self)
    }
}

macro_rules! loose_numeric {
    ($($t:ty),*) => {$(
        impl Loose for $t {
            fn is_loose_empty(&self) -> bool { *self == 0 as $t }
            fn repr(&self) -> String { self.to_string() }
        }
    )*};
}
loose_numeric!(i32, i64, u16, u32, u64, usize, f64);

impl<T: Debug> Loose for Vec<T> {
    fn is_loose_empty(&self) -> bool {
        self.is_empty()
    }
    fn repr(&self) -> String {
        format!("{:?}", self)
    }
    fn loose_len(&self) -> usize {
        self.len()
    }
}

impl<V: Debug> Loose for HashMap<String, V> {
    fn is_loose_empty(&self) -> bool {
        self.is_empty()
    }
    fn repr(&self) -> String {
        format!("{:?}", self)
    }
    fn loose_len(&self) -> usize {
        self.len()
    }
}

impl Loose for serde_json::Value {
    fn is_loose_empty(&self) -> bool {
        match self {
            serde_json::Value::Null => true,
            serde_json::Value::Bool(b) => !b,
            serde_json::Value::Number(n) => n.as_f64() == Some(0.0),
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
        }
    }
    fn repr(&self) -> String {
        self.to_string()
    }
    fn loose_len(&self) -> usize {
        match self {
            serde_json::Value::Array(a) => a.len(),
            serde_json::Value::Object(o) => o.len(),
            v if v.is_loose_empty() => 0,
            _ => 1,
        }
    }
}

// Pairs propagate through multi-part chain steps (split cipher + nonce and
// the like). A pair with an empty half is empty as a whole.
impl<A: Loose, B: Loose> Loose for (A, B) {
    fn is_loose_empty(&self) -> bool {
        self.0.is_loose_empty() || self.1.is_loose_empty()
    }
    fn repr(&self) -> String {
        format!("({}, {})", self.0.repr(), self.1.repr())
    }
}

/// Optional value with loose-emptiness semantics and an error trail.
/// Every transform is total: failures collapse the value to empty and
/// record a diagnostic, they never panic.
#[derive(Debug, Clone)]
pub struct Maybe<T> {
    value: Option<T>,
    trail: Vec<String>,
    /// Repr of the value that emptied the chain, kept for diagnostics
    /// after the value itself is discarded.
    empty_repr: String,
}

impl<T: Loose> Maybe<T> {
    pub fn of(value: T) -> Self {
        if value.is_loose_empty() {
            let empty_repr = value.repr();
            Maybe { value: None, trail: Vec::new(), empty_repr }
        } else {
            Maybe { value: Some(value), trail: Vec::new(), empty_repr: String::new() }
        }
    }

    pub fn none() -> Self {
        Maybe { value: None, trail: Vec::new(), empty_repr: "none".to_string() }
    }

    /// Replace the value with `f(value)`. If the input is already empty,
    /// `f` is never called and a diagnostic is recorded; if the replacement
    /// is empty, the chain collapses with a "produced empty" diagnostic.
    pub fn then<U: Loose>(mut self, name: &str, f: impl FnOnce(T) -> U) -> Maybe<U> {
        match self.value.take() {
            Some(v) => {
                let next = f(v);
                if next.is_loose_empty() {
                    self.trail.push(format!("{}, produced empty [{}]", name, next.repr()));
                    Maybe { value: None, trail: self.trail, empty_repr: next.repr() }
                } else {
                    Maybe { value: Some(next), trail: self.trail, empty_repr: String::new() }
                }
            }
            None => {
                let diag = format!("{}, [{}]", name, self.empty_repr);
                self.trail.push(diag);
                Maybe { value: None, trail: self.trail, empty_repr: self.empty_repr }
            }
        }
    }

    /// Clear to empty when the predicate rejects the value.
    pub fn keep_if(mut self, name: &str, pred: impl FnOnce(&T) -> bool) -> Self {
        if let Some(v) = self.value.take() {
            if pred(&v) {
                self.value = Some(v);
            } else {
                self.trail.push(format!("{}, rejected [{}]", name, v.repr()));
                self.empty_repr = v.repr();
            }
        }
        self
    }

    /// Adopt the fallback only when currently empty.
    pub fn or_else(mut self, f: impl FnOnce() -> T) -> Self {
        if self.value.is_none() {
            let v = f();
            if !v.is_loose_empty() {
                self.value = Some(v);
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    pub fn errors(&self) -> &[String] {
        &self.trail
    }

    pub fn size(&self) -> usize {
        self.value.as_ref().map(Loose::loose_len).unwrap_or(0)
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }

    pub fn value_or(self, default: T) -> T {
        self.value.unwrap_or(default)
    }

    pub fn as_ref(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl<T: Debug> Maybe<Vec<T>> {
    /// Elementwise transform over a non-empty sequence. The scalar case of
    /// the loose original is covered by `then`; the types split the two.
    pub fn map<U: Debug>(self, name: &str, f: impl FnMut(T) -> U) -> Maybe<Vec<U>> {
        self.then(name, |v| v.into_iter().map(f).collect::<Vec<U>>())
    }
}

impl Maybe<serde_json::Value> {
    /// Project a mapping field (or the default) into a fresh Maybe.
    pub fn extract(&self, key: &str, default: serde_json::Value) -> Maybe<serde_json::Value> {
        match &self.value {
            Some(serde_json::Value::Object(map)) => {
                Maybe::of(map.get(key).cloned().unwrap_or(default))
            }
            _ => Maybe::of(default),
        }
    }

    /// Coerce to a string, "" when empty.
    pub fn value_str(&self) -> String {
        match &self.value {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(v) => v.to_string(),
            None => String::new(),
        }
    }

    /// Coerce to an integer, 0 when empty or non-numeric.
    pub fn value_int(&self) -> i64 {
        match &self.value {
            Some(serde_json::Value::Number(n)) => n.as_i64().unwrap_or(0),
            Some(serde_json::Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    /// Coerce to a sequence: arrays yield their elements, a scalar wraps
    /// into a one-element sequence, empty yields an empty one.
    pub fn value_seq(&self) -> Vec<serde_json::Value> {
        match &self.value {
            Some(serde_json::Value::Array(items)) => items.clone(),
            Some(v) => vec![v.clone()],
            None => Vec::new(),
        }
    }
}

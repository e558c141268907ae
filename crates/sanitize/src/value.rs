//! Model for values handed over from the observed page.
//!
//! A hostile page can produce reference cycles, throwing property getters and
//! values that are not plain data. `PageValue` is a JSON superset that keeps
//! those possibilities representable: arrays and objects are shared handles,
//! so cycles are constructible, and identity (the handle address, not
//! structural equality) is what the serializer's cycle detection keys on.

use std::sync::Arc;

use parking_lot::Mutex;

pub type SharedItems = Arc<Mutex<Vec<PageValue>>>;
pub type SharedEntries = Arc<Mutex<Vec<(String, PageValue)>>>;

#[derive(Clone, Debug)]
pub enum PageValue {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
    /// Shared handle; cloning shares the same underlying storage.
    Array(SharedItems),
    /// Insertion-ordered entries behind a shared handle.
    Object(SharedEntries),
    Function {
        name: String,
    },
    Error {
        name: String,
        message: String,
        stack: Option<String>,
    },
}

impl PageValue {
    pub fn text(value: impl Into<String>) -> Self {
        PageValue::Str(value.into())
    }

    pub fn array(items: Vec<PageValue>) -> Self {
        PageValue::Array(Arc::new(Mutex::new(items)))
    }

    pub fn object(entries: Vec<(String, PageValue)>) -> Self {
        PageValue::Object(Arc::new(Mutex::new(entries)))
    }

    pub fn function(name: impl Into<String>) -> Self {
        PageValue::Function { name: name.into() }
    }

    pub fn error(
        name: impl Into<String>,
        message: impl Into<String>,
        stack: Option<String>,
    ) -> Self {
        PageValue::Error {
            name: name.into(),
            message: message.into(),
            stack,
        }
    }

    /// Pointer identity of a container handle; scalars have none.
    pub fn handle_id(&self) -> Option<usize> {
        match self {
            PageValue::Array(items) => Some(Arc::as_ptr(items) as usize),
            PageValue::Object(entries) => Some(Arc::as_ptr(entries) as usize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PageValue::Str(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Non-blocking object field lookup. `None` for non-objects, missing
    /// keys, or an object whose lock is held elsewhere.
    pub fn entry(&self, key: &str) -> Option<PageValue> {
        let PageValue::Object(entries) = self else {
            return None;
        };
        let guard = entries.try_lock()?;
        guard
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
    }

    /// Non-blocking snapshot of an object's key list, in insertion order.
    pub fn entry_keys(&self) -> Option<Vec<String>> {
        let PageValue::Object(entries) = self else {
            return None;
        };
        let guard = entries.try_lock()?;
        Some(guard.iter().map(|(name, _)| name.clone()).collect())
    }
}

impl From<&str> for PageValue {
    fn from(value: &str) -> Self {
        PageValue::Str(value.to_string())
    }
}

impl From<String> for PageValue {
    fn from(value: String) -> Self {
        PageValue::Str(value)
    }
}

impl From<f64> for PageValue {
    fn from(value: f64) -> Self {
        PageValue::Num(value)
    }
}

impl From<i64> for PageValue {
    fn from(value: i64) -> Self {
        PageValue::Num(value as f64)
    }
}

impl From<bool> for PageValue {
    fn from(value: bool) -> Self {
        PageValue::Bool(value)
    }
}

impl From<serde_json::Value> for PageValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => PageValue::Null,
            serde_json::Value::Bool(flag) => PageValue::Bool(flag),
            serde_json::Value::Number(num) => PageValue::Num(num.as_f64().unwrap_or(0.0)),
            serde_json::Value::String(text) => PageValue::Str(text),
            serde_json::Value::Array(items) => {
                PageValue::array(items.into_iter().map(PageValue::from).collect())
            }
            serde_json::Value::Object(map) => PageValue::object(
                map.into_iter()
                    .map(|(key, val)| (key, PageValue::from(val)))
                    .collect(),
            ),
        }
    }
}

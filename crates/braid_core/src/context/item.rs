//! Items carried by the context containers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A piece of context.
///
/// Items without an `id` belong in a [`ContextQueue`](super::ContextQueue).
/// Items with an `id` (and a `description`) belong in a
/// [`ContextPool`](super::ContextPool); this is how an agent routes items a
/// tool produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextItem {
    /// The payload.
    pub content: Value,
    /// Short natural-language summary, required by pools.
    #[serde(default)]
    pub description: Option<String>,
    /// Pool key.
    #[serde(default)]
    pub id: Option<String>,
}

impl ContextItem {
    /// An unkeyed item, destined for a context queue.
    pub fn new(content: impl Into<Value>) -> Self {
        Self {
            content: content.into(),
            description: None,
            id: None,
        }
    }

    /// A keyed item, destined for a context pool.
    pub fn keyed(
        id: impl Into<String>,
        description: impl Into<String>,
        content: impl Into<Value>,
    ) -> Self {
        Self {
            content: content.into(),
            description: Some(description.into()),
            id: Some(id.into()),
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Returns `true` if the item has a pool key.
    #[must_use]
    pub fn is_keyed(&self) -> bool {
        self.id.is_some()
    }

    /// Deserializes the content.
    ///
    /// # Errors
    ///
    /// Fails if the content does not have the shape of `T`.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.content.clone())
    }

    /// The content rendered for prompts: strings verbatim, everything else as JSON.
    #[must_use]
    pub fn render(&self) -> String {
        match &self.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn render_keeps_strings_verbatim() {
        assert_eq!(ContextItem::new("plain").render(), "plain");
        assert_eq!(ContextItem::new(json!({"a": 1})).render(), r#"{"a":1}"#);
    }

    #[test]
    fn missing_optional_fields_deserialize_as_none() {
        let item: ContextItem =
            serde_json::from_value(json!({"content": 3})).expect("item should parse");
        assert_eq!(item, ContextItem::new(3));
        assert!(!item.is_keyed());
    }

    #[test]
    fn keyed_sets_id_and_description() {
        let item = ContextItem::keyed("doc", "a document", "body");
        assert_eq!(item.id.as_deref(), Some("doc"));
        assert_eq!(item.description.as_deref(), Some("a document"));
        assert_eq!(item.content_as::<String>().expect("string content"), "body");
    }
}

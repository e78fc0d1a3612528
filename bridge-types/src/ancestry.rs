//! Ancestor lookup

use async_trait::async_trait;
use bridge_plugin_api::{commands, Item};
use bridge_plugin_host::HostApi;
use serde_json::Value;
use std::collections::HashSet;

/// Answers whether one item is an ancestor of another
#[async_trait]
pub trait AncestorLookup: Send + Sync {
    /// Whether `ancestor_id` is a strict (transitive) ancestor of `item_id`
    async fn is_ancestor(&self, ancestor_id: &str, item_id: &str) -> anyhow::Result<bool>;
}

/// Walks `parent` links, fetching items through `items.getItem`.
///
/// A broken parent chain (an id seen twice) ends the walk instead of
/// spinning forever. A chain longer than the depth limit is an error, since
/// the answer is unknown.
pub struct ParentWalkLookup {
    api: HostApi,
    max_depth: usize,
}

impl ParentWalkLookup {
    pub const DEFAULT_MAX_DEPTH: usize = 256;

    pub fn new(api: HostApi) -> Self {
        Self {
            api,
            max_depth: Self::DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    async fn parent_of(&self, id: &str) -> anyhow::Result<Option<String>> {
        let value = self
            .api
            .execute_command(commands::GET_ITEM, vec![Value::from(id)])
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Item::from_value(&value)?.parent.filter(|p| !p.is_empty()))
    }
}

#[async_trait]
impl AncestorLookup for ParentWalkLookup {
    async fn is_ancestor(&self, ancestor_id: &str, item_id: &str) -> anyhow::Result<bool> {
        let mut visited = HashSet::from([item_id.to_string()]);
        let mut current = self.parent_of(item_id).await?;

        while let Some(id) = current {
            if id == ancestor_id {
                return Ok(true);
            }
            if !visited.insert(id.clone()) {
                // Every ancestor has been seen once and none matched
                tracing::warn!(item = item_id, at = %id, "Parent chain is cyclic");
                return Ok(false);
            }
            if visited.len() > self.max_depth {
                anyhow::bail!(
                    "parent chain of '{}' exceeds {} levels, ancestry unknown",
                    item_id,
                    self.max_depth
                );
            }
            current = self.parent_of(&id).await?;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    /// Host whose `items.getItem` serves a fixed parent map
    fn host_with_parents(parents: &[(&str, Option<&str>)]) -> HostApi {
        let api = HostApi::new();
        let parents: HashMap<String, Option<String>> = parents
            .iter()
            .map(|(id, p)| (id.to_string(), p.map(str::to_string)))
            .collect();
        api.register_async_command(commands::GET_ITEM, move |args| {
            let item = args
                .first()
                .and_then(Value::as_str)
                .and_then(|id| parents.get(id).map(|p| (id.to_string(), p.clone())));
            async move {
                Ok(match item {
                    Some((id, parent)) => json!({ "id": id, "type": "x", "parent": parent }),
                    None => Value::Null,
                })
            }
        });
        api
    }

    #[tokio::test]
    async fn test_finds_transitive_ancestor() {
        let api = host_with_parents(&[("root", None), ("group", Some("root")), ("ref", Some("group"))]);
        let lookup = ParentWalkLookup::new(api);

        assert!(lookup.is_ancestor("group", "ref").await.unwrap());
        assert!(lookup.is_ancestor("root", "ref").await.unwrap());
        assert!(!lookup.is_ancestor("ref", "group").await.unwrap());
        assert!(!lookup.is_ancestor("ref", "ref").await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_item_has_no_ancestors() {
        let api = host_with_parents(&[]);
        let lookup = ParentWalkLookup::new(api);
        assert!(!lookup.is_ancestor("a", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_cyclic_parent_chain_terminates() {
        let api = host_with_parents(&[("a", Some("b")), ("b", Some("c")), ("c", Some("b"))]);
        let lookup = ParentWalkLookup::new(api);
        assert!(!lookup.is_ancestor("z", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_depth_limit_is_an_error() {
        let api = host_with_parents(&[("a", Some("b")), ("b", Some("c")), ("c", Some("d")), ("d", None)]);
        let lookup = ParentWalkLookup::new(api).with_max_depth(2);
        let err = lookup.is_ancestor("z", "a").await.unwrap_err();
        assert!(err.to_string().contains("exceeds 2 levels"));

        // A match found within the limit still counts
        assert!(lookup.is_ancestor("b", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_get_item_is_an_error() {
        let lookup = ParentWalkLookup::new(HostApi::new());
        assert!(lookup.is_ancestor("a", "b").await.is_err());
    }
}

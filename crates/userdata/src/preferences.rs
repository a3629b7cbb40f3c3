//! Preferences stored as JSON leaves at dotted key paths.
//!
//! Each leaf is its own entity, so edits to different keys on different
//! devices never conflict. Setting an object stores one leaf per nested
//! value; [`Preferences::dictionary`] rebuilds the nested object.
//!
//! ```rust,ignore
//! prefs.set("player", "subtitles.language", json!("fr"))?;
//! prefs.set("player", "subtitles.size", json!(14))?;
//! assert_eq!(
//!     prefs.dictionary("player"),
//!     json!({"subtitles": {"language": "fr", "size": 14}})
//! );
//! prefs.remove("player", "subtitles")?;
//! ```

use crate::context::{ServiceContext, UserRecord};
use crate::error::{UserDataError, UserDataResult};
use serde_json::{Map, Value};
use userdata_core::ListFilter;
use userdata_model::payloads::Preference;
use userdata_model::{Entity, EntityId};

const PREFIX: &str = "pref:";

/// Preference domains and their values.
#[derive(Clone)]
pub struct Preferences {
    ctx: ServiceContext,
}

impl Preferences {
    pub(crate) fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    fn domain_prefix(domain: &str) -> String {
        format!("{PREFIX}{domain}:")
    }

    fn id(domain: &str, key_path: &str) -> EntityId {
        EntityId::new(format!("{}{key_path}", Self::domain_prefix(domain)))
    }

    fn leaves(&self, domain: &str) -> Vec<UserRecord<Preference>> {
        self.ctx
            .list(&Self::domain_prefix(domain), &ListFilter::new())
    }

    /// Stores `value` at `key_path`, replacing whatever was there,
    /// including a subtree or a leaf on the way to it.
    pub fn set(&self, domain: &str, key_path: &str, value: Value) -> UserDataResult<()> {
        validate_domain(domain)?;
        validate_key_path(key_path)?;

        let mut leaves = Vec::new();
        flatten(key_path, value, &mut leaves);

        let replaced: Vec<EntityId> = self
            .leaves(domain)
            .into_iter()
            .filter(|leaf| {
                let path = leaf.value.key_path.as_str();
                let overwritten = leaves.iter().any(|(p, _)| p == path);
                !overwritten && (is_within(path, key_path) || is_within(key_path, path))
            })
            .map(|leaf| leaf.id)
            .collect();

        let puts = leaves
            .into_iter()
            .map(|(path, value)| {
                Entity::typed(
                    Self::id(domain, &path),
                    &Preference {
                        domain: domain.to_string(),
                        key_path: path,
                        value,
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.ctx.write_batch(puts, &replaced)?;
        Ok(())
    }

    /// Removes the value at `key_path` and everything below it.
    ///
    /// Returns the number of leaves removed.
    pub fn remove(&self, domain: &str, key_path: &str) -> UserDataResult<usize> {
        validate_domain(domain)?;
        validate_key_path(key_path)?;
        let ids: Vec<EntityId> = self
            .leaves(domain)
            .into_iter()
            .filter(|leaf| is_within(&leaf.value.key_path, key_path))
            .map(|leaf| leaf.id)
            .collect();
        self.ctx.write_batch(Vec::new(), &ids)
    }

    /// The value at `key_path`: a leaf or a rebuilt subtree.
    pub fn value(&self, domain: &str, key_path: &str) -> Option<Value> {
        let tree = self.dictionary(domain);
        key_path
            .split('.')
            .try_fold(&tree, |node, segment| node.get(segment))
            .cloned()
    }

    /// Every value of `domain` as one nested object.
    ///
    /// Leaves are applied oldest first, so when devices wrote a leaf and a
    /// subtree at overlapping paths the most recent write shapes the tree.
    pub fn dictionary(&self, domain: &str) -> Value {
        let mut leaves = self.leaves(domain);
        leaves.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.value.key_path.cmp(&b.value.key_path))
        });

        let mut root = Value::Object(Map::new());
        for leaf in leaves {
            insert(&mut root, &leaf.value.key_path, leaf.value.value);
        }
        root
    }

    /// Domains with at least one value, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .ctx
            .list::<Preference>(PREFIX, &ListFilter::new())
            .into_iter()
            .map(|leaf| leaf.value.domain)
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }
}

fn validate_domain(domain: &str) -> UserDataResult<()> {
    if domain.is_empty() || domain.contains(':') {
        return Err(UserDataError::InvalidArgument(format!(
            "preference domain {domain:?} must be non-empty and free of ':'"
        )));
    }
    Ok(())
}

fn validate_key_path(key_path: &str) -> UserDataResult<()> {
    if key_path.split('.').any(str::is_empty) {
        return Err(UserDataError::InvalidArgument(format!(
            "key path {key_path:?} has an empty segment"
        )));
    }
    Ok(())
}

/// True if `path` is `root` or lies below it.
fn is_within(path: &str, root: &str) -> bool {
    match path.strip_prefix(root) {
        Some(rest) => rest.is_empty() || rest.starts_with('.'),
        None => false,
    }
}

fn flatten(path: &str, value: Value, out: &mut Vec<(String, Value)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten(&format!("{path}.{key}"), child, out);
            }
        }
        leaf => out.push((path.to_string(), leaf)),
    }
}

fn insert(root: &mut Value, key_path: &str, value: Value) {
    let mut node = root;
    let mut segments = key_path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        let Value::Object(map) = node else { return };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use userdata_core::LocalStore;

    fn preferences() -> Preferences {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        Preferences::new(ServiceContext::new(store, None))
    }

    #[test]
    fn nested_values_round_trip_through_leaves() {
        let prefs = preferences();
        prefs.set("player", "subtitles.language", json!("fr")).unwrap();
        prefs.set("player", "subtitles.size", json!(14)).unwrap();
        prefs.set("player", "autoplay", json!(true)).unwrap();

        assert_eq!(
            prefs.dictionary("player"),
            json!({"autoplay": true, "subtitles": {"language": "fr", "size": 14}})
        );
        assert_eq!(prefs.value("player", "subtitles.size"), Some(json!(14)));
        assert_eq!(prefs.domains(), vec!["player"]);
    }

    #[test]
    fn setting_an_object_replaces_the_subtree() {
        let prefs = preferences();
        prefs.set("app", "a.b", json!(1)).unwrap();
        prefs.set("app", "a.c", json!(2)).unwrap();
        prefs.set("app", "a", json!({"d": {"e": 3}})).unwrap();

        assert_eq!(prefs.dictionary("app"), json!({"a": {"d": {"e": 3}}}));
        assert_eq!(prefs.leaves("app").len(), 1);
    }

    #[test]
    fn setting_below_a_leaf_replaces_the_leaf() {
        let prefs = preferences();
        prefs.set("app", "a", json!("flat")).unwrap();
        prefs.set("app", "a.b", json!(1)).unwrap();
        assert_eq!(prefs.dictionary("app"), json!({"a": {"b": 1}}));
    }

    #[test]
    fn remove_drops_the_subtree_only() {
        let prefs = preferences();
        prefs.set("app", "a.b", json!(1)).unwrap();
        prefs.set("app", "a.c", json!(2)).unwrap();
        prefs.set("app", "ab", json!(3)).unwrap();

        assert_eq!(prefs.remove("app", "a").unwrap(), 2);
        assert_eq!(prefs.dictionary("app"), json!({"ab": 3}));
        assert_eq!(prefs.remove("app", "missing").unwrap(), 0);
    }

    #[test]
    fn domains_are_isolated() {
        let prefs = preferences();
        prefs.set("one", "k", json!(1)).unwrap();
        prefs.set("two", "k", json!(2)).unwrap();
        assert_eq!(prefs.dictionary("one"), json!({"k": 1}));
        assert_eq!(prefs.value("two", "k"), Some(json!(2)));
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let prefs = preferences();
        assert!(matches!(
            prefs.set("app", "a..b", json!(1)),
            Err(UserDataError::InvalidArgument(_))
        ));
        assert!(matches!(
            prefs.set("a:b", "k", json!(1)),
            Err(UserDataError::InvalidArgument(_))
        ));
    }

    #[test]
    fn newest_write_shapes_overlapping_paths() {
        let mut root = json!({});
        insert(&mut root, "a.b", json!(1));
        insert(&mut root, "a", json!("later"));
        assert_eq!(root, json!({"a": "later"}));

        insert(&mut root, "a.c", json!(2));
        assert_eq!(root, json!({"a": {"c": 2}}));
    }
}

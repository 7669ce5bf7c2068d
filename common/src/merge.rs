use serde_json::Map;
use serde_json::Value;

/// Recursively merges `from_this` into `into_this`.
///
/// Keys missing from `into_this` are inserted. When both sides hold an
/// object the two are merged key by key; any other value from `from_this`
/// replaces the existing one.
pub fn merge_maps(from_this: &Map<String, Value>, into_this: &mut Map<String, Value>) {
    for (key, value) in from_this {
        if let (Some(Value::Object(into_child)), Value::Object(from_child)) =
            (into_this.get_mut(key), value)
        {
            merge_maps(from_child, into_child);
            continue;
        }
        into_this.insert(key.clone(), value.clone());
    }
}

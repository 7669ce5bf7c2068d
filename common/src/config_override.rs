//! `-c key=value` overrides for the devkit binaries.
//!
//! [`CliConfigOverrides`] is meant to be `#[clap(flatten)]`-ed into a CLI
//! struct. Each override becomes a one-key nested object (`a.b=1` turns into
//! `{"a": {"b": 1}}`) that is folded into the loaded configuration with
//! [`merge_maps`](crate::merge_maps), so sibling keys survive.

use clap::ArgAction;
use clap::Parser;
use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::merge_maps;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OverrideError {
    #[error("invalid override (missing '='): {0}")]
    MissingEquals(String),

    #[error("empty key in override: {0}")]
    EmptyKey(String),

    #[error("cannot apply overrides onto a non-object configuration")]
    NotAnObject,
}

#[derive(Parser, Debug, Default, Clone)]
pub struct CliConfigOverrides {
    /// Override a configuration value that would otherwise be loaded from
    /// `devkit.toml`. Use a dotted path (`foo.bar`) for nested values. The
    /// value is parsed as JSON and used as a plain string if that fails.
    ///
    /// Examples:
    ///   - `-c first_commit=HEAD~3`
    ///   - `-c 'skip=["cargo-deny"]'`
    #[arg(
        short = 'c',
        long = "config",
        value_name = "key=value",
        action = ArgAction::Append,
    )]
    pub raw_overrides: Vec<String>,
}

impl CliConfigOverrides {
    pub fn new<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            raw_overrides: raw.into_iter().map(Into::into).collect(),
        }
    }

    /// Splits every raw override on its first `=` into `(dotted path, value)`.
    pub fn parse_overrides(&self) -> Result<Vec<(String, Value)>, OverrideError> {
        self.raw_overrides
            .iter()
            .map(|raw| {
                let (key, value) = raw
                    .split_once('=')
                    .ok_or_else(|| OverrideError::MissingEquals(raw.clone()))?;
                let key = key.trim();
                if key.is_empty() || key.split('.').any(str::is_empty) {
                    return Err(OverrideError::EmptyKey(raw.clone()));
                }
                let value = value.trim();
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| Value::String(value.to_string()));
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Applies the overrides, in order, onto the object `target`.
    pub fn apply_on_value(&self, target: &mut Value) -> Result<(), OverrideError> {
        let overrides = self.parse_overrides()?;
        let Value::Object(target) = target else {
            return Err(OverrideError::NotAnObject);
        };
        for (path, value) in overrides {
            merge_maps(&nest(&path, value), target);
        }
        Ok(())
    }
}

fn nest(path: &str, value: Value) -> Map<String, Value> {
    let mut segments = path.rsplit('.');
    let mut map = Map::new();
    let Some(leaf) = segments.next() else {
        return map;
    };
    map.insert(leaf.to_string(), value);
    for segment in segments {
        let mut parent = Map::new();
        parent.insert(segment.to_string(), Value::Object(map));
        map = parent;
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn values_fall_back_to_strings() {
        let overrides = CliConfigOverrides::new(["ping_secs=2.5", "first_commit=HEAD~3"]);

        assert_eq!(
            overrides.parse_overrides().unwrap(),
            vec![
                ("ping_secs".to_string(), json!(2.5)),
                ("first_commit".to_string(), json!("HEAD~3")),
            ]
        );
    }

    #[test]
    fn only_the_first_equals_splits() {
        let overrides = CliConfigOverrides::new(["env.FLAGS=-a=b"]);

        assert_eq!(
            overrides.parse_overrides().unwrap(),
            vec![("env.FLAGS".to_string(), json!("-a=b"))]
        );
    }

    #[test]
    fn malformed_overrides_are_rejected() {
        assert_eq!(
            CliConfigOverrides::new(["novalue"]).parse_overrides(),
            Err(OverrideError::MissingEquals("novalue".to_string()))
        );
        assert_eq!(
            CliConfigOverrides::new([" =1"]).parse_overrides(),
            Err(OverrideError::EmptyKey(" =1".to_string()))
        );
        assert_eq!(
            CliConfigOverrides::new(["a..b=1"]).parse_overrides(),
            Err(OverrideError::EmptyKey("a..b=1".to_string()))
        );
    }

    #[test]
    fn dotted_paths_keep_siblings() {
        let mut config = json!({"tools": {"ruff": true, "mypy": true}, "ping_secs": 60});
        CliConfigOverrides::new(["tools.mypy=false", "tools.new.flag=1", "ping_secs=0"])
            .apply_on_value(&mut config)
            .unwrap();

        assert_eq!(
            config,
            json!({"tools": {"ruff": true, "mypy": false, "new": {"flag": 1}}, "ping_secs": 0})
        );
    }

    #[test]
    fn later_overrides_win_and_replace_scalars() {
        let mut config = json!({"a": 1});
        CliConfigOverrides::new(["a.b=2", "a.b=3"])
            .apply_on_value(&mut config)
            .unwrap();

        assert_eq!(config, json!({"a": {"b": 3}}));
    }

    #[test]
    fn non_object_target_is_rejected() {
        let mut config = json!([1, 2]);
        assert_eq!(
            CliConfigOverrides::new(["a=1"]).apply_on_value(&mut config),
            Err(OverrideError::NotAnObject)
        );
    }
}

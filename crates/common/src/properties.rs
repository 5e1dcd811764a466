//! Flattening of TOML documents into dotted key/value properties.
//!
//! `[db] url = "x"` becomes `db.url = x`, arrays become `key[0]`, `key[1]`, ...

use crate::Properties;
use toml::Value;

/// Parse TOML text and flatten it into properties.
pub fn parse_toml(text: &str) -> Result<Properties, toml::de::Error> {
    let table: toml::Table = toml::from_str(text)?;
    Ok(flatten_table(&table))
}

pub fn flatten_table(table: &toml::Table) -> Properties {
    let mut out = Properties::new();
    for (key, value) in table {
        flatten_value(key, value, &mut out);
    }
    out
}

fn flatten_value(prefix: &str, value: &Value, out: &mut Properties) {
    match value {
        Value::Table(table) => {
            for (key, nested) in table {
                flatten_value(&format!("{}.{}", prefix, key), nested, out);
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                flatten_value(&format!("{}[{}]", prefix, i), item, out);
            }
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Integer(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::Float(f) => {
            out.insert(prefix.to_string(), f.to_string());
        }
        Value::Boolean(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Datetime(dt) => {
            out.insert(prefix.to_string(), dt.to_string());
        }
    }
}

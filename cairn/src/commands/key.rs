use std::path::Path;

use anyhow::Result;
use cairn_core::path_utils::object_prefix;
use cairn_core::{Cache, KeySource, Metadata};

use crate::formatting::{print_key_value, print_warning};

use super::{load_config, Overrides};

pub fn cmd_key(config_path: Option<&Path>, overrides: &Overrides, json: bool) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    let cache = Cache::from_config(&config, Metadata::from_env())?;
    let key = cache.key()?;
    let prefix = object_prefix(&config.namespace, &key.value);

    if json {
        let output = serde_json::json!({
            "key": key.value,
            "fallback": key.source == KeySource::Fallback,
            "prefix": prefix,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if key.source == KeySource::Fallback {
        print_warning("Primary key generator failed, showing the fallback key");
    }
    print_key_value("Key", &key.value);
    print_key_value("Prefix", &prefix);
    Ok(())
}

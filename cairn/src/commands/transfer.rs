//! Rebuild and restore commands.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use cairn_core::{Cache, CacheConfig, GeneratedKey, Metadata};

use crate::formatting::{
    format_duration, print_error, print_section_header, print_success, print_summary_box,
    print_warning,
};

use super::{load_config, runtime, Overrides};

pub fn cmd_rebuild(
    config_path: Option<&Path>,
    overrides: &Overrides,
    mounts: Vec<String>,
    no_override: bool,
) -> Result<()> {
    let mut config = load_config(config_path, overrides)?;
    if no_override {
        config.transfer.override_existing = false;
    }

    let cache = Cache::from_config(&config, Metadata::from_env())?;
    let mounts = if mounts.is_empty() {
        cache.mounts().to_vec()
    } else {
        mounts
    };

    print_section_header("Rebuilding cache");
    let key = cache.key()?;
    print_plan(&config, &cache, &key, &mounts);

    let start = Instant::now();
    let result = runtime()?.block_on(cache.rebuild_with_key(&key, &mounts));
    report("Rebuild", result, start)
}

pub fn cmd_restore(
    config_path: Option<&Path>,
    overrides: &Overrides,
    mounts: Vec<String>,
    fail_if_key_not_present: bool,
) -> Result<()> {
    let mut config = load_config(config_path, overrides)?;
    if fail_if_key_not_present {
        config.transfer.fail_if_key_not_present = true;
    }

    let cache = Cache::from_config(&config, Metadata::from_env())?;

    print_section_header("Restoring cache");
    if mounts.is_empty() {
        print_warning("No mounts given, restoring everything stored under the key");
    }
    let key = cache.key()?;
    print_plan(&config, &cache, &key, &mounts);

    let start = Instant::now();
    let result = runtime()?.block_on(cache.restore_with_key(&key, &mounts));
    report("Restore", result, start)
}

fn print_plan(config: &CacheConfig, cache: &Cache, key: &GeneratedKey, mounts: &[String]) {
    let mounts = if mounts.is_empty() {
        "(from storage)".to_string()
    } else {
        mounts.join(", ")
    };

    print_summary_box(
        "Cache",
        &[
            ("Namespace", config.namespace.as_str()),
            ("Key", key.value.as_str()),
            ("Key source", &format!("{:?}", key.source).to_lowercase()),
            ("Backend", cache.backend_name()),
            ("Format", config.archive.format.as_str()),
            ("Mounts", &mounts),
        ],
    );
    println!();
}

fn report(operation: &str, result: cairn_core::Result<()>, start: Instant) -> Result<()> {
    let elapsed = format_duration(start.elapsed().as_secs_f64());
    match result {
        Ok(()) => {
            print_success(&format!("{} finished in {}", operation, elapsed));
            Ok(())
        }
        Err(e) => {
            print_error(&format!("{} failed after {}", operation, elapsed));
            Err(e.into())
        }
    }
}

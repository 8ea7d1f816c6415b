//! Build script for the mealplanner-auth crate.
//!
//! Loads the OIDC and API settings at compile time so that
//! `ClientConfig::from_env_client()` can read them with `option_env!()`.
//!
//! Priority order:
//! 1. Environment variables already set (CI, container build args)
//! 2. Variables from `.env` next to `Cargo.toml`
//! 3. Variables from `.env.example` (only when nothing else is configured)

use std::env;
use std::fs;
use std::path::PathBuf;

const REQUIRED_VARS: [&str; 4] = [
    "OIDC_AUTHORITY",
    "OIDC_CLIENT_ID",
    "OIDC_REDIRECT_URI",
    "API_BASE_URL",
];

fn main() {
    println!("cargo:rerun-if-changed=.env");
    println!("cargo:rerun-if-changed=.env.example");
    for var in REQUIRED_VARS {
        println!("cargo:rerun-if-env-changed={var}");
    }

    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap_or_default());
    let env_file = manifest_dir.join(".env");
    let env_example_file = manifest_dir.join(".env.example");

    let env_vars_set = REQUIRED_VARS
        .iter()
        .filter(|&var| env::var(var).is_ok())
        .count();

    let (file_to_load, file_description) = if env_file.exists() {
        (Some(env_file), ".env")
    } else if env_vars_set == 0 && env_example_file.exists() {
        (Some(env_example_file), ".env.example (fallback)")
    } else {
        (None, "")
    };

    let Some(file_path) = file_to_load else {
        if env_vars_set > 0 {
            println!(
                "cargo:warning=Using OIDC configuration from environment variables ({}/{} set)",
                env_vars_set,
                REQUIRED_VARS.len()
            );
        } else {
            println!("cargo:warning=No .env file and no OIDC_* environment variables found");
        }
        return;
    };

    println!(
        "cargo:warning=Found {file_description} file, loading configuration (environment variables take priority)"
    );

    let Ok(contents) = fs::read_to_string(&file_path) else {
        println!("cargo:warning=Could not read {}", file_path.display());
        return;
    };

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = match key.trim().trim_start_matches("VITE_") {
                "API_URL" => "API_BASE_URL",
                other => other,
            };
            let value = value.trim().trim_matches('"');

            if env::var(key).is_err() {
                println!("cargo:rustc-env={key}={value}");
            }
        }
    }
}

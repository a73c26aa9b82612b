//! Stamps the binary with a version and commit for `/status` and the startup log.
//!
//! `DBB_VERSION` / `DBB_GIT_SHA` win when set (release builds). Otherwise the
//! version comes from the nearest `v*` tag and the commit from `GITHUB_SHA` or git.

use std::env;
use std::process::Command;

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

fn version() -> String {
    if let Ok(version) = env::var("DBB_VERSION") {
        return version;
    }
    // Cargo.toml carries 0.0.0; tags look like v1.4.2
    git(&["describe", "--tags", "--match", "v*", "--abbrev=0"])
        .map(|tag| tag.trim_start_matches('v').to_string())
        .or_else(|| env::var("CARGO_PKG_VERSION").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

fn git_sha() -> String {
    env::var("DBB_GIT_SHA")
        .ok()
        .or_else(|| {
            env::var("GITHUB_SHA")
                .ok()
                .map(|sha| sha.chars().take(7).collect())
        })
        .or_else(|| git(&["rev-parse", "--short=7", "HEAD"]))
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    println!("cargo:rustc-env=DBB_VERSION={}", version());
    println!("cargo:rustc-env=DBB_GIT_SHA={}", git_sha());

    for var in ["DBB_VERSION", "DBB_GIT_SHA", "GITHUB_SHA"] {
        println!("cargo:rerun-if-env-changed={}", var);
    }
    if std::path::Path::new(".git/HEAD").exists() {
        println!("cargo:rerun-if-changed=.git/HEAD");
    }
}

//! Embeds the source revision and build date shown by `tether --version`.
//!
//! Packaged builds without a git checkout can pin the revision through
//! `TETHER_BUILD_REV`.

use std::process::Command;

fn git_revision() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--always", "--dirty", "--abbrev=8"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let rev = String::from_utf8(output.stdout).ok()?;
    let rev = rev.trim();
    (!rev.is_empty()).then(|| rev.to_string())
}

fn main() {
    let revision = std::env::var("TETHER_BUILD_REV")
        .ok()
        .filter(|rev| !rev.trim().is_empty())
        .or_else(git_revision)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=TETHER_GIT_REV={revision}");
    println!(
        "cargo:rustc-env=TETHER_BUILD_DATE={}",
        chrono::Utc::now().format("%Y-%m-%d")
    );

    println!("cargo:rerun-if-env-changed=TETHER_BUILD_REV");
    println!("cargo:rerun-if-changed=../../.git/HEAD");
    println!("cargo:rerun-if-changed=../../.git/index");
}

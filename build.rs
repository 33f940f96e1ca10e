use chrono::Utc;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::process::Command;

/// Short hash of the checked-out commit, if this is a git checkout
fn git_hash() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|hash| hash.trim().to_string())
        .filter(|hash| !hash.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn main() {
    let out_dir = PathBuf::from(env::var_os("OUT_DIR").expect("cargo sets OUT_DIR"));
    let version = env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "unknown".to_string());
    let built = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

    let generated = format!(
        "pub const PACKAGE_VERSION: &str = {version:?};\n\
         pub const BUILD_TIME: &str = \"{built}\";\n\
         pub const GIT_HASH: &str = {hash:?};\n",
        hash = git_hash(),
    );

    // Leave the file untouched when nothing changed so dependents are not rebuilt
    let dest = out_dir.join("version.rs");
    let current = fs::read_to_string(&dest).unwrap_or_default();
    if strip_build_time(&current) != strip_build_time(&generated) {
        fs::write(&dest, generated).expect("write version.rs");
    }

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=.git/HEAD");
}

fn strip_build_time(source: &str) -> String {
    source
        .lines()
        .filter(|line| !line.contains("BUILD_TIME"))
        .collect::<Vec<_>>()
        .join("\n")
}

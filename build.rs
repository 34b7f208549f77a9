use std::env;
use std::fs;
use std::path::Path;

/// Locked version of `package` in a Cargo.lock, if listed.
fn locked_version(lock: &str, package: &str) -> Option<String> {
    let mut lines = lock.lines().map(str::trim);
    while let Some(line) = lines.next() {
        if line == format!("name = \"{}\"", package) {
            let version = lines.next()?;
            return version
                .strip_prefix("version = \"")
                .and_then(|rest| rest.strip_suffix('"'))
                .map(str::to_string);
        }
    }
    None
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR")?;
    let lock_path = Path::new(&manifest_dir).join("Cargo.lock");
    println!("cargo:rerun-if-changed={}", lock_path.display());

    // Built as a dependency there is no lock file of our own.
    let version = fs::read_to_string(&lock_path)
        .ok()
        .and_then(|lock| locked_version(&lock, "rusqlite"))
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=ENVKIT_RUSQLITE_VERSION={}", version);
    Ok(())
}

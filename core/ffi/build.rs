//! Generates the C header for the offcache library with cbindgen.

use std::env;
use std::path::PathBuf;

fn main() {
    println!("cargo:rerun-if-changed=src/lib.rs");
    println!("cargo:rerun-if-changed=src/types.rs");
    println!("cargo:rerun-if-changed=cbindgen.toml");

    let Ok(crate_dir) = env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR not set, skipping header generation");
        return;
    };
    let crate_dir = PathBuf::from(crate_dir);
    let header = include_dir(&crate_dir).join("offcache.h");
    if let Some(parent) = header.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            println!("cargo:warning=Unable to create {}: {}", parent.display(), e);
            return;
        }
    }

    let config = cbindgen::Config::from_file(crate_dir.join("cbindgen.toml")).unwrap_or_else(|_| {
        let mut config = cbindgen::Config::default();
        config.language = cbindgen::Language::C;
        config.include_guard = Some("OFFCACHE_H".to_string());
        config
    });

    match cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
    {
        Ok(bindings) => {
            bindings.write_to_file(&header);
        }
        Err(e) => {
            println!("cargo:warning=Unable to generate C bindings: {}", e);
        }
    }
}

/// `<target>/include`, honoring `CARGO_TARGET_DIR`.
fn include_dir(crate_dir: &std::path::Path) -> PathBuf {
    let target = match env::var("CARGO_TARGET_DIR") {
        Ok(target) => PathBuf::from(target),
        Err(_) => crate_dir
            .ancestors()
            .nth(2)
            .unwrap_or(crate_dir)
            .join("target"),
    };
    target.join("include")
}

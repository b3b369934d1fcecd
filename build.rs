//! This build script handles:
//! - Exposing build-time information to the application.
//! - Copying `memory.x` to the output directory to allow the firmware to be
//!   created, when building for the RP2040.
//!
//! ## Build-time information
//!
//! `built` writes `built.rs` into `OUT_DIR`, which the firmware logs at boot.
//!
//! ## `memory.x` file handling
//!
//! This build script copies the memory.x file from the `link/` dir into a
//! directory where the linker can find it at link time.  Host builds (tests)
//! skip this entirely.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

// memory.x handling derived from embassy-rs examples.

fn main() {
    // Re-run this build script of DEFMT_LOG changes.
    println!("cargo:rerun-if-env-changed=DEFMT_LOG");

    // Get built-time information
    built::write_built_file().expect("Failed to acquire build-time information");

    #[cfg(feature = "rp2040")]
    rp2040_link();
}

#[cfg(feature = "rp2040")]
fn rp2040_link() {
    use std::env;
    use std::fs::File;
    use std::io::Write;
    use std::path::PathBuf;

    // The file is deliberately not called memory.x, as then the linker would
    // pick it up from our root directory instead of the version we put in
    // OUT_DIR, below.
    println!("cargo:rerun-if-changed=link/memory.rp2040.x");
    let memory_x = include_bytes!("link/memory.rp2040.x");

    // Put `memory.x` in our output directory and ensure it's on the linker
    // search path.
    let out = &PathBuf::from(env::var_os("OUT_DIR").expect("OUT_DIR not set"));
    File::create(out.join("memory.x"))
        .and_then(|mut f| f.write_all(memory_x))
        .expect("Failed to write memory.x");
    println!("cargo:rustc-link-search={}", out.display());

    // Set embassy linker arguments for the binary.
    println!("cargo:rustc-link-arg-bins=--nmagic");
    println!("cargo:rustc-link-arg-bins=-Tlink.x");
    println!("cargo:rustc-link-arg-bins=-Tlink-rp.x");
    println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
}

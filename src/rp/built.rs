//! This file handles build-time information.

// Copyright (c) 2025 Piers Finlayson <piers@piers.rocks>
//
// GPLv3 licensed - see https://www.gnu.org/licenses/gpl-3.0.html

// Import the build-time information from the `built.rs` output file generated
// during the build process by `build.rs`.
#[allow(dead_code)]
mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Log build-time information to the console.
pub fn log_fw_info(bin_name: &str) {
    info!("{} running {}", built_info::PKG_NAME, bin_name);
    info!("Author: {}", built_info::PKG_AUTHORS);
    info!("Version: {}", built_info::PKG_VERSION);

    info!("Built: {}", built_info::BUILT_TIME_UTC);
    info!("Rust version: {}", built_info::RUSTC_VERSION);
    info!("Target triple: {}", built_info::TARGET);
    info!("Build profile: {}", built_info::PROFILE);
    info!("Enabled features: {:?}", built_info::FEATURES_LOWERCASE_STR);
}

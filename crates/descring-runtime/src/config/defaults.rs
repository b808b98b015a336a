//! Compile-time defaults, generated by `build.rs`.
//!
//! Override at build time with `DESCRING_CONFIG_RS=/path/to/config.rs`.

include!(concat!(env!("OUT_DIR"), "/descring_merged_config.rs"));

//! veneer-kk
//!
//! Native runtime patcher for Koikatu. Loaded into the game process at
//! preload time, it patches the engine's build-settings parser so that
//! the `enabledVRDevices` field always comes back as the two strings
//! "None" and "OpenVR", regardless of what the settings file contains.
//!
//! The replacement handler lives in this DLL, far outside the ±2GiB
//! range of the call being redirected, so the redirect goes through a
//! 12-byte stub written into inter-function padding near the call site.
//! All offsets and expected encodings here are configuration for one
//! specific build of the game; the mechanics live in libveneer, which
//! refuses to write anything that does not match those expectations.

pub mod game;
pub mod handler;
pub mod logger;

#[cfg(target_os = "windows")]
pub mod entry;

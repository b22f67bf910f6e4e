//! DLL entry points.
//!
//! The preloader resolves and calls the exported `setup_all` once the
//! DLL is mapped into the game process, before the engine parses its
//! build settings. Everything interesting happens behind `install`;
//! the exported surface only logs and swallows, since a panic or an
//! error crossing the FFI boundary would take the host down with it.

use std::ffi::c_void;

use anyhow::Context;
use libveneer::{FnPtr, ProcessMemory, apply_all, winapi};
use windows::{
    Win32::{
        Foundation::HINSTANCE,
        System::SystemServices::{
            DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH, DLL_THREAD_ATTACH, DLL_THREAD_DETACH,
        },
    },
    core::BOOL,
};

use crate::game::{self, GameApi, ParseStringArrayFn};
use crate::handler;
use crate::logger::GlobalLogger;

#[unsafe(no_mangle)]
#[allow(non_snake_case)]
pub extern "system" fn DllMain(hmodule: HINSTANCE, reason: u32, _reserved: *mut c_void) -> BOOL {
    let result = match reason {
        DLL_PROCESS_ATTACH => {
            init_logging();

            log::info!("Process attach - waiting for setup_all");
            log::info!("(DllMain) HMODULE: {:p}", hmodule.0);

            true
        }
        DLL_PROCESS_DETACH => {
            log::info!("Process detach (module: {:p})", hmodule.0);
            true
        }
        DLL_THREAD_ATTACH => true,
        DLL_THREAD_DETACH => true,
        _ => {
            log::warn!("Unknown DLL reason code {:#x}", reason);
            true
        }
    };

    result.into()
}

/// Entry point the preloader calls after mapping this DLL.
///
/// Failure leaves the game completely unpatched and running: the engine
/// verifies every byte before writing, so on any mismatch the settings
/// parser keeps its original behavior.
#[unsafe(no_mangle)]
pub extern "C" fn setup_all() {
    init_logging();

    match install() {
        Ok(_) => {
            log::info!("[Setup] enabledVRDevices override installed");
        }
        Err(err) => {
            log::error!("[Setup] Install failed, game left unpatched: {:?}", err);
        }
    }
}

/// Logger bootstrap failures have no logger to go through, so they end
/// up in a breadcrumb file next to the game executable.
fn init_logging() {
    if let Err(err) = GlobalLogger::init() {
        let _ = std::fs::write(
            "veneer_logger_error.txt",
            format!("Failed to initialize logger: {err:?}"),
        );
    }
}

/// Resolves the game module, publishes its entry points for the
/// handler, and applies the patch plan.
///
/// Must stay panic-free: errors are propagated as results and handled
/// at the export boundary. No .expect or .unwrap in here.
fn install() -> anyhow::Result<()> {
    let base = winapi::get_module_handle_a(None).context("resolving game module base")?;
    log::info!("[Setup] Game module base: {}", base);

    GameApi::resolve(base)?.publish();

    let handler = FnPtr::<ParseStringArrayFn>::from_fn(handler::parse_vr_devices_override)
        .context("taking handler address")?;
    log::debug!("[Setup] Handler at {}", handler.addr());

    let plan = game::patch_plan(base, handler.addr());
    apply_all(&mut ProcessMemory, &plan)?;

    Ok(())
}

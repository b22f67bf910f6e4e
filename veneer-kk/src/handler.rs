//! Replacement for the engine's `enabledVRDevices` parse call.

use std::ffi::c_void;

use crate::game::{GameApi, STRING_STRIDE};

const DEVICE_NONE: &[u8] = b"None";
const DEVICE_OPENVR: &[u8] = b"OpenVR";

/// Called in place of `parse_string_array` for the `enabledVRDevices`
/// field. Lets the original parse run, then rewrites the result to
/// exactly `["None", "OpenVR"]`.
///
/// The first element has to stay "None": the engine picks the device by
/// index, and index 0 is the no-VR fallback. Index 1 is what forces the
/// OpenVR path regardless of the settings file.
///
/// Reached by a tail jump from the redirected call, so the same
/// convention and arguments as the original, and returning from here
/// returns straight into the parser.
///
/// # Safety
///
/// `parser` and `dest` are whatever the game passed to the original
/// call; they are only ever forwarded to the game's own functions.
pub unsafe extern "C" fn parse_vr_devices_override(parser: *mut c_void, dest: *mut *mut u8) {
    let Some(api) = GameApi::get() else {
        // Unreachable in a patched process: the API is published before
        // the call-site redirect that makes this function reachable, and
        // a once-set static never becomes unset. Reaching this branch
        // means the install sequence itself is broken; the parse is left
        // incomplete, which the log line says outright.
        log::error!(
            "[Handler] Game API not published, install order violated; enabledVRDevices parse skipped"
        );
        return;
    };

    unsafe {
        (api.parse_string_array)(parser, dest);

        (api.resize_string_vector)(dest, 2);

        // dest points at the vector's begin pointer; elements are
        // STRING_STRIDE bytes apart.
        let first = *dest as *mut c_void;
        let second = (*dest).add(STRING_STRIDE) as *mut c_void;

        (api.string_assign)(first, DEVICE_NONE.as_ptr(), DEVICE_NONE.len());
        (api.string_assign)(second, DEVICE_OPENVR.as_ptr(), DEVICE_OPENVR.len());
    }

    log::debug!("[Handler] enabledVRDevices forced to [\"None\", \"OpenVR\"]");
}

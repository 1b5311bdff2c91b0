//! Serialized rendering of OS error messages.
//!
//! The libc string-from-errno machinery is not reentrant on every platform,
//! so every place that turns an OS error into text goes through one
//! process-wide mutex. Keep this as the single serialization point; do not
//! format `std::io::Error` values from transport code directly.

use once_cell::sync::Lazy;
use parking_lot::Mutex;

static STRERROR_GUARD: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub fn os_error_message(error: &std::io::Error) -> String {
    let _guard = STRERROR_GUARD.lock();
    error.to_string()
}

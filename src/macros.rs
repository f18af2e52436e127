#![allow(unused_macros)]

/// Run a libc syscall, turning a `-1` return into the last OS error.
macro_rules! syscall {
    ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}

/// Gate an item behind the `telemetry` feature.
macro_rules! cfg_telemetry {
    ($($item:item)*) => {
        $(
            #[cfg(feature = "telemetry")]
            $item
        )*
    }
}

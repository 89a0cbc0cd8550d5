//! Logging that goes to `log` or `defmt` depending on the enabled feature.
//!
//! Arguments must implement both `Display` and `defmt::Format`, so only `{}` is used in format strings.

macro_rules! dispatch_log {
    ( $level:ident, $( $arg:expr ),+ ) => {
        {
            #[cfg(feature = "log")]
            log::$level!( $( $arg ),+ );
            #[cfg(feature = "defmt")]
            defmt::$level!( $( $arg ),+ );
            #[cfg(not(any(feature = "log", feature = "defmt")))]
            {
                $( let _ = &$arg; )+
            }
        }
    };
}

macro_rules! error {
    ( $( $arg:expr ),+ ) => { $crate::log_wrapper::dispatch_log!(error, $( $arg ),+ ) };
}

macro_rules! log_warn {
    ( $( $arg:expr ),+ ) => { $crate::log_wrapper::dispatch_log!(warn, $( $arg ),+ ) };
}

macro_rules! info {
    ( $( $arg:expr ),+ ) => { $crate::log_wrapper::dispatch_log!(info, $( $arg ),+ ) };
}

macro_rules! debug {
    ( $( $arg:expr ),+ ) => { $crate::log_wrapper::dispatch_log!(debug, $( $arg ),+ ) };
}

macro_rules! trace {
    ( $( $arg:expr ),+ ) => { $crate::log_wrapper::dispatch_log!(trace, $( $arg ),+ ) };
}

pub(crate) use {debug, dispatch_log, error, info, trace};
// A macro named `warn` would clash with the built-in `#[warn]` attribute
pub(crate) use log_warn as warn;

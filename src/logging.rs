//! Logging front-end.
//!
//! On the target every macro forwards to `defmt` (transported over RTT by the
//! firmware). Without the `defmt` feature the macros only type-check their
//! arguments, so host builds need no global logger. Use plain `{}`
//! placeholders: the same format string has to satisfy both back-ends.

#[doc(hidden)]
#[inline(always)]
pub fn discard(_args: core::fmt::Arguments<'_>) {}

#[macro_export]
macro_rules! log_trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::trace!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        $crate::logging::discard(::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        $crate::logging::discard(::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        $crate::logging::discard(::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        $crate::logging::discard(::core::format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::error!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        $crate::logging::discard(::core::format_args!($($arg)*));
    }};
}

//! Hardware capability detection and the compressed-storage fallback policy.
//!
//! The LVQ and LeanVec layouts are designed around wide SIMD loads. When the
//! running CPU lacks the vector width a layout wants, construction can either
//! degrade to an equivalent uncompressed representation or refuse outright.
//! The policy is process-wide and defaults to [`FallbackMode::Warning`].

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// What to do when a compressed layout requires SIMD support the CPU lacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackMode {
    /// Fall back to an uncompressed representation without any notice.
    Silent,
    /// Fall back and emit a `tracing` warning.
    Warning,
    /// Refuse with [`Error::UnsupportedHardware`].
    Error,
}

static FALLBACK_MODE: AtomicU8 = AtomicU8::new(1);

/// Sets the process-wide fallback mode.
pub fn set_fallback_mode(mode: FallbackMode) {
    let raw = match mode {
        FallbackMode::Silent => 0,
        FallbackMode::Warning => 1,
        FallbackMode::Error => 2,
    };
    FALLBACK_MODE.store(raw, Ordering::Relaxed);
}

/// Returns the process-wide fallback mode.
#[must_use]
pub fn fallback_mode() -> FallbackMode {
    match FALLBACK_MODE.load(Ordering::Relaxed) {
        0 => FallbackMode::Silent,
        2 => FallbackMode::Error,
        _ => FallbackMode::Warning,
    }
}

/// SIMD capability classes relevant to the compressed layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SimdClass {
    /// No vector extensions beyond the baseline.
    Scalar,
    /// 128-bit lanes (SSE2 / NEON).
    V128,
    /// 256-bit lanes (AVX2).
    V256,
    /// 512-bit lanes (AVX-512).
    V512,
}

/// Probes the SIMD class of the running CPU.
#[must_use]
pub fn detect_simd_class() -> SimdClass {
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx512f") {
            return SimdClass::V512;
        }
        if std::arch::is_x86_feature_detected!("avx2") {
            return SimdClass::V256;
        }
        SimdClass::V128
    }
    #[cfg(target_arch = "aarch64")]
    {
        SimdClass::V128
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        SimdClass::Scalar
    }
}

/// Decides whether a layout requiring `required` may be used.
///
/// Returns `Ok(true)` when the CPU qualifies, `Ok(false)` when the caller
/// should fall back to an uncompressed representation, and an error in
/// [`FallbackMode::Error`].
///
/// # Errors
///
/// Returns [`Error::UnsupportedHardware`] when the capability is missing and
/// the process-wide mode is [`FallbackMode::Error`].
pub fn check_simd_requirement(layout: &str, required: SimdClass) -> Result<bool> {
    if detect_simd_class() >= required {
        return Ok(true);
    }
    match fallback_mode() {
        FallbackMode::Silent => Ok(false),
        FallbackMode::Warning => {
            tracing::warn!(
                layout,
                required = ?required,
                "SIMD class unavailable, storing vectors uncompressed"
            );
            Ok(false)
        }
        FallbackMode::Error => Err(Error::UnsupportedHardware(format!(
            "layout '{layout}' requires {required:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_round_trip() {
        let original = fallback_mode();
        set_fallback_mode(FallbackMode::Silent);
        assert_eq!(fallback_mode(), FallbackMode::Silent);
        set_fallback_mode(FallbackMode::Error);
        assert_eq!(fallback_mode(), FallbackMode::Error);
        set_fallback_mode(original);
    }

    #[test]
    fn test_scalar_requirement_always_passes() {
        assert!(check_simd_requirement("test", SimdClass::Scalar).unwrap());
    }
}

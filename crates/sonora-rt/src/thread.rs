/// Enables flush-to-zero and denormals-are-zero on supported CPUs.
#[inline]
#[allow(deprecated)]
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn flush_denormals() {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::{_mm_getcsr, _mm_setcsr};
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::{_mm_getcsr, _mm_setcsr};

    const FTZ: u32 = 1 << 15;
    const DAZ: u32 = 1 << 6;
    // SAFETY: only toggles the FTZ/DAZ bits of this thread's MXCSR.
    unsafe {
        let csr = _mm_getcsr();
        _mm_setcsr(csr | FTZ | DAZ);
    }
}

#[inline]
#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn flush_denormals() {}

/// Prepares the calling thread for block processing. Worker and render
/// threads call this once on entry.
pub fn enter_audio_thread() {
    flush_denormals();
    tracing::trace!(thread = ?std::thread::current().name(), "entered audio thread");
}

//! Profiling utilities based on the `puffin` crate.
//!
//! With the `profiling` feature disabled the scope macros compile to nothing,
//! so hot paths such as the block allocator can be annotated unconditionally.

#[cfg(feature = "profiling")]
pub use puffin::{profile_function, profile_scope};

#[cfg(not(feature = "profiling"))]
#[macro_export]
#[doc(hidden)]
macro_rules! __hearth_profile_noop {
    ($($arg:tt)*) => {};
}

#[cfg(not(feature = "profiling"))]
pub use crate::__hearth_profile_noop as profile_function;
#[cfg(not(feature = "profiling"))]
pub use crate::__hearth_profile_noop as profile_scope;

#[cfg(feature = "profiling")]
static PROFILING_SERVER: std::sync::OnceLock<puffin_http::Server> = std::sync::OnceLock::new();

/// Start the puffin HTTP server so `puffin_viewer` can attach.
///
/// Loader threads are long-lived, so unlike a frame-driven app there is no
/// natural frame boundary; call [`new_frame`] from whatever loop drives the
/// cache (usually the game loop) to bucket the captured scopes.
#[cfg(feature = "profiling")]
pub fn init_profiling(bind_addr: &str) {
    puffin::set_scopes_on(true);

    match puffin_http::Server::new(bind_addr) {
        Ok(server) => {
            tracing::info!("Puffin profiler server started on http://{}", bind_addr);
            let _ = PROFILING_SERVER.set(server);
        }
        Err(e) => {
            tracing::error!("Failed to start puffin server: {}", e);
        }
    }
}

/// Mark the start of a new profiling frame.
#[inline]
pub fn new_frame() {
    #[cfg(feature = "profiling")]
    puffin::GlobalProfiler::lock().new_frame();
}

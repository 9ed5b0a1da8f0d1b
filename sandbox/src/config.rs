//! Policy runtime configuration.

/// Configuration for compiled policy instances.
///
/// Controls the host-created linear memory, the optional instruction
/// budget, and guest log capture.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Initial linear memory pages (1 page = 64 KiB).
    /// Default: 5 pages = 320 KiB, enough for module bootstrap.
    pub initial_memory_pages: u32,

    /// Maximum linear memory pages.
    /// Default: 4096 pages = 256 MiB.
    pub max_memory_pages: u32,

    /// Wasmtime fuel budget per `evaluate`/`set_data` call.
    /// `None` disables metering; evaluation then runs to completion.
    pub fuel_limit: Option<u64>,

    /// Whether to buffer `opa_println` output for [`Policy::take_logs`].
    ///
    /// [`Policy::take_logs`]: crate::Policy::take_logs
    pub enable_guest_logs: bool,

    /// Maximum buffered guest log lines per call.
    pub max_log_lines: usize,

    /// Use the single-call `opa_eval` export when the module offers it.
    pub prefer_single_call_eval: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            initial_memory_pages: 5,
            max_memory_pages: 4096,     // 256 MiB
            fuel_limit: None,
            enable_guest_logs: false,
            max_log_lines: 1024,
            prefer_single_call_eval: true,
        }
    }
}

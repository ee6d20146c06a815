/// Limits applied to every table invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Maximum nesting of `CALL_TABLE` below the top-level invocation.
    pub max_call_depth: u32,
    /// Opcodes executed per top-level invocation (all nested calls included) before the
    /// invocation is halted. Guards against firmware that loops on a status bit that never
    /// flips.
    pub max_steps: u64,
    /// Size of the parameter space shared by a top-level call and its nested calls, in dwords.
    ///
    /// Nested tables see a window shifted by their caller's declared parameter size, so this
    /// needs headroom beyond the largest top-level parameter block.
    pub param_space_dwords: usize,
    /// Firmware scratch size used when the image does not declare one.
    pub default_scratch_bytes: usize,
    /// Upper bound on the firmware-declared scratch size.
    pub max_scratch_bytes: usize,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 16,
            max_steps: 1_000_000,
            param_space_dwords: 64,
            default_scratch_bytes: 20 * 1024,
            max_scratch_bytes: 1024 * 1024,
        }
    }
}

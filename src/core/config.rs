// Backend configuration. BackendConfig collects the handful of knobs the pipeline reads: the
// number of allocatable general-purpose registers (K), how many of them carry call arguments,
// whether to run the structural verifier after every pass, and an optional pass after which the
// driver dumps the textual IR. The defaults describe the standard ARM target (13 registers,
// 4 argument registers). PassName doubles as the clap value type for the --dump-after flag.

//! Backend configuration.

use super::error::{CompileError, CompileResult};
use std::fmt;

/// Highest register count the target can colour onto (r0..r12).
pub const MAX_ALLOCATABLE_REGISTERS: usize = 13;

/// Pipeline stages that can be named on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum PassName {
    Cfg,
    Ssa,
    CritEdge,
    Lower,
    PhiWeb,
    Spill,
    CallTarget,
    Color,
}

impl fmt::Display for PassName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassName::Cfg => "cfg",
            PassName::Ssa => "ssa",
            PassName::CritEdge => "crit-edge",
            PassName::Lower => "lower",
            PassName::PhiWeb => "phi-web",
            PassName::Spill => "spill",
            PassName::CallTarget => "call-target",
            PassName::Color => "color",
        };
        f.write_str(name)
    }
}

/// Configuration shared by every pass of one compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Number of registers values may occupy simultaneously (K).
    pub num_registers: usize,
    /// Registers carrying the leading call arguments (r0 upwards).
    pub num_arg_registers: usize,
    /// Run the structural verifier after every pass.
    pub verify: bool,
    /// Dump the textual IR after this pass.
    pub dump_after: Option<PassName>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            num_registers: MAX_ALLOCATABLE_REGISTERS,
            num_arg_registers: 4,
            verify: false,
            dump_after: None,
        }
    }
}

impl BackendConfig {
    /// Check that the register counts describe a target we can colour onto.
    pub fn validate(&self) -> CompileResult<()> {
        if self.num_arg_registers != 4 {
            return Err(CompileError::InvalidConfig {
                reason: format!(
                    "the calling convention passes 4 arguments in registers, got {}",
                    self.num_arg_registers
                ),
            });
        }
        // A call needs its register arguments plus as many carried values
        if self.num_registers > MAX_ALLOCATABLE_REGISTERS
            || self.num_registers < self.min_registers()
        {
            return Err(CompileError::InvalidConfig {
                reason: format!(
                    "register count must be in {}..={}, got {}",
                    self.min_registers(),
                    MAX_ALLOCATABLE_REGISTERS,
                    self.num_registers
                ),
            });
        }
        Ok(())
    }

    /// Smallest register count that leaves a call room for all of its
    /// register arguments within the call budget.
    pub fn min_registers(&self) -> usize {
        2 * self.num_arg_registers
    }

    /// Register budget left for values live across a call.
    pub fn call_budget(&self) -> usize {
        self.num_registers - self.num_arg_registers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BackendConfig::default();
        assert_eq!(config.num_registers, 13);
        assert_eq!(config.call_budget(), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_register_count() {
        let mut config = BackendConfig::default();
        config.num_registers = 14;
        assert!(config.validate().is_err());
        config.num_registers = 4;
        assert!(config.validate().is_err());
        config.num_registers = 6;
        assert!(config.validate().is_err());
        config.num_registers = 7;
        assert!(config.validate().is_err());
        config.num_registers = 8;
        assert!(config.validate().is_ok());
        assert_eq!(config.call_budget(), config.num_arg_registers);
    }

    #[test]
    fn test_pass_name_display() {
        assert_eq!(PassName::CritEdge.to_string(), "crit-edge");
        assert_eq!(PassName::Spill.to_string(), "spill");
    }
}

// The passes of the backend pipeline, one module each, in the order the compiler driver runs
// them: CFG assembly, dominance and dominance frontiers, SSA construction, critical-edge
// splitting, target lowering, phi-web grouping, spilling, call targeting, liveness and coloring.
// SSA repair is shared by the two passes that add definitions to values already in SSA form
// (spilling and call targeting), and the verifier checks the structural invariants that hold
// between passes.

//! Analysis and transformation passes.
//!
//! # Pipeline
//!
//! 1. [`cfg`] - split linear code into blocks, link successors and predecessors
//! 2. [`dominance`] - dominator tree and dominance frontiers
//! 3. [`ssa`] - phi placement and renaming
//! 4. [`crit_edge`] - split edges that phi resolution could not use
//! 5. [`lower`] - one IR instruction per target instruction
//! 6. [`phi_web`] - group phi-connected values
//! 7. [`spill`] - bound register pressure
//! 8. [`call_target`] - pin call arguments, move values off clobbered registers
//! 9. [`liveness`] - live sets and last uses
//! 10. [`color`] - assign registers

pub mod call_target;
pub mod cfg;
pub mod color;
pub mod crit_edge;
pub mod dominance;
pub mod liveness;
pub mod lower;
pub mod phi_web;
pub mod spill;
pub mod ssa;
pub mod ssa_repair;
pub mod verify;

pub use call_target::target_calls;
pub use cfg::build_cfg;
pub use color::color_procedure;
pub use crit_edge::split_critical_edges;
pub use dominance::{DomFrontiers, DomTree};
pub use liveness::Liveness;
pub use lower::lower_procedure;
pub use phi_web::build_phi_webs;
pub use spill::spill_procedure;
pub use ssa::construct_ssa;
pub use ssa_repair::repair_ssa;

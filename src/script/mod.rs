//! Script assembler (spec.md component G): subtitle parsing, chunking,
//! per-chunk LM generation, merge, refine, and conversion to the persisted
//! `Script` JSON shape. Grounded on `services/script_generation/*.py`.

pub mod assemble;
pub mod chunk;
pub mod json_sanitize;
pub mod length_plan;
pub mod merge;
pub mod model;
pub mod plot_analysis;
pub mod refine;
pub mod subtitle;

pub use assemble::{assemble_script, AssembleRequest};
pub use model::{Script, Segment};

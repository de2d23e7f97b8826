mod engine_process;
mod engine_stub;

pub use engine_process::ProcessEngine;
pub use engine_stub::Pinky;

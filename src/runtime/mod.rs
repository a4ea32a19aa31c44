pub mod cancel;
pub mod process;

pub use cancel::CancelFlag;
pub use process::{parse_json_output, ProcessOutput, ProcessRunner};

//! Platform services used by the transports: radio association, network time, heap
//! accounting and memory telemetry.

pub mod clock;
pub mod heap;
pub mod meminfo;
pub mod wifi;

//! Resource admission: memory checks and the reusable wait policy

mod memory;
mod wait;

pub use memory::{
    AdmissionCheck, FixedMemoryProbe, MemoryAdmission, MemoryProbe, MemoryWaitObserver,
    SystemMemoryProbe,
};
pub use wait::{Probe, WaitError, WaitPolicy, Waited};

pub mod clock;
pub mod pipeline;
pub mod session;

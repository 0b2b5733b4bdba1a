pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;
pub mod session;

pub use registry::{ConnectionRegistry, Delivery};
pub use session::{FrameSink, Session};

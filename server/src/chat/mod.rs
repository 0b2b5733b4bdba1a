pub mod fanout;
pub mod router;

pub use fanout::{FanoutEngine, FanoutReport, Origin};
pub use router::MessageRouter;

mod retry;
pub use retry::*;

pub mod driver;
pub mod error;
pub mod server;
pub mod session;
pub mod utils;

pub use error::{DriverError, ErrorKind};
pub use session::{SessionCore, SessionManager};

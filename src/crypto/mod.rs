pub mod kind;
pub mod session;
pub mod util;

pub use kind::CipherKind;
pub use session::Session;

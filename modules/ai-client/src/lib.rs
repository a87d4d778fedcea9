pub mod claude;
pub mod error;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::AiError;

pub mod config;
pub mod dates;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{AppConfig, FileConfig};
pub use dates::parse_pub_date;
pub use error::{NeutralNewsError, SynthesisError};
pub use traits::{DocumentStore, NeutralSynthesizer, TextEmbedder};
pub use types::*;

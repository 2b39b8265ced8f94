pub mod types;
pub mod request;
pub mod response;

pub use request::{
    is_json_mime, GenerateContentRequest, GenerationConfig, GenerationConfigBody, APPLICATION_JSON,
    TEXT_PLAIN,
};
pub use response::{GenerateContentResponse, NoValidPart};
pub use types::*;

pub mod draft;
pub mod reset;
pub mod status;
pub mod utils;

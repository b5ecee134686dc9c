pub mod capture;
pub mod inpaint;
pub mod logging;
pub mod ocr;
pub mod server;
pub mod settings;

pub use ocr::{FontWeight, TextArea};

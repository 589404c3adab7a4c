//! Prompt System - built-in templates and Handlebars rendering

mod render;
pub mod templates;

pub use render::PromptRenderer;

//! Prompt Renderer - Render templates with context variables using Handlebars
//!
//! The renderer comes with the agent, judge and feedback templates
//! registered; more can be registered by name.

use handlebars::Handlebars;
use serde::Serialize;

use super::templates;
use crate::error::{MarbleError, Result};

/// Renders prompt templates using Handlebars templating
pub struct PromptRenderer {
    handlebars: Handlebars<'static>,
}

impl std::fmt::Debug for PromptRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.handlebars.get_templates().keys().collect();
        names.sort();
        f.debug_struct("PromptRenderer").field("templates", &names).finish()
    }
}

impl PromptRenderer {
    /// Create an empty renderer
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        // Prompts are plain text, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);
        Self { handlebars }
    }

    /// Renderer with the built-in templates registered
    pub fn builtin() -> Result<Self> {
        let mut renderer = Self::new();
        renderer.register_template(templates::AGENT_SYSTEM, templates::AGENT_SYSTEM_TEMPLATE)?;
        renderer.register_template(templates::AGENT_TURN, templates::AGENT_TURN_TEMPLATE)?;
        renderer.register_template(templates::JUDGE, templates::JUDGE_TEMPLATE)?;
        renderer.register_template(templates::FEEDBACK, templates::FEEDBACK_TEMPLATE)?;
        Ok(renderer)
    }

    /// Render a template string with any serializable context
    pub fn render_with<T: Serialize>(&self, template: &str, context: &T) -> Result<String> {
        self.handlebars
            .render_template(template, context)
            .map_err(|e| MarbleError::InvalidState(format!("Failed to render template: {}", e)))
    }

    /// Register a named template for later use
    pub fn register_template(&mut self, name: &str, template: &str) -> Result<()> {
        self.handlebars
            .register_template_string(name, template)
            .map_err(|e| MarbleError::InvalidState(format!("Failed to register template '{}': {}", name, e)))
    }

    /// Render a previously registered template
    pub fn render_named<T: Serialize>(&self, name: &str, context: &T) -> Result<String> {
        self.handlebars
            .render(name, context)
            .map_err(|e| MarbleError::InvalidState(format!("Failed to render template '{}': {}", name, e)))
    }

    /// Check if a named template is registered
    pub fn has_template(&self, name: &str) -> bool {
        self.handlebars.get_template(name).is_some()
    }
}

impl Default for PromptRenderer {
    fn default() -> Self {
        Self::new()
    }
}

//! Build prompt rendering for a single feature.

use std::path::Path;

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::{Feature, sanitize_feature_name};
use crate::io::context::truncate_for_context;

const FEATURE_TEMPLATE: &str = include_str!("prompts/feature.md");

/// Inputs for the feature build prompt.
#[derive(Debug, Clone)]
pub struct FeaturePromptInput<'a> {
    pub feature: &'a Feature,
    pub branch: &'a str,
    pub completed: &'a [String],
    pub specs_dir: &'a Path,
    pub context_max_tokens: usize,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("feature", FEATURE_TEMPLATE)
            .expect("feature template should be valid");
        Self { env }
    }
}

/// Render the build prompt, embedding `<specs_dir>/<sanitized-name>.md`
/// through the context truncator when it exists.
pub fn render_feature_prompt(input: &FeaturePromptInput<'_>) -> Result<String> {
    let spec_path = input
        .specs_dir
        .join(format!("{}.md", sanitize_feature_name(&input.feature.name)));
    let spec = truncate_for_context(&spec_path, input.context_max_tokens)?;
    debug!(
        feature = %input.feature.name,
        spec_path = %spec_path.display(),
        spec_chars = spec.len(),
        "rendering feature prompt"
    );

    let engine = PromptEngine::new();
    let template = engine.env.get_template("feature")?;
    let rendered = template.render(context! {
        feature => input.feature,
        branch => input.branch,
        completed => input.completed,
        spec => (!spec.trim().is_empty()).then(|| spec.trim().to_string()),
    })?;
    Ok(rendered)
}

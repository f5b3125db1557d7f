//! Language templates: how to turn one source file into a runnable image.
//!
//! A template names the file the source is written to and a `BuildRecipe`
//! that is rendered into a Dockerfile. The registry is built once at startup
//! and shared read-only between executions.

use std::collections::HashMap;

use crate::config::LanguageConfig;
use crate::errors::ExecutionError;

/// File every program reads its standard input from.
pub const INPUT_FILE_NAME: &str = "input.txt";
/// File name of the rendered build recipe inside the workspace.
pub const RECIPE_FILE_NAME: &str = "Dockerfile";

const CONTAINER_WORK_DIR: &str = "/app";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecipe {
    pub base_image: String,
    /// Compile step run at image build time, if the language needs one.
    pub compile: Option<String>,
    /// Program invocation. Standard input is redirected from `INPUT_FILE_NAME` when rendered.
    pub run: String,
}

impl BuildRecipe {
    pub fn interpreted(base_image: &str, run: &str) -> Self {
        Self {
            base_image: base_image.to_string(),
            compile: None,
            run: run.to_string(),
        }
    }

    pub fn compiled(base_image: &str, compile: &str, run: &str) -> Self {
        Self {
            base_image: base_image.to_string(),
            compile: Some(compile.to_string()),
            run: run.to_string(),
        }
    }

    /// The shell command the container runs.
    pub fn run_command(&self) -> String {
        format!("{} < {}", self.run, INPUT_FILE_NAME)
    }

    /// Render as a Dockerfile.
    pub fn render(&self) -> String {
        let mut dockerfile = String::new();
        dockerfile.push_str(&format!("FROM {}\n", self.base_image));
        dockerfile.push_str(&format!("WORKDIR {}\n", CONTAINER_WORK_DIR));
        dockerfile.push_str("COPY . .\n");
        if let Some(compile) = &self.compile {
            dockerfile.push_str(&format!("RUN {}\n", compile));
        }
        // Exec form; serde_json takes care of quoting inside the command.
        let cmd = serde_json::json!(["sh", "-c", self.run_command()]);
        dockerfile.push_str(&format!("CMD {}\n", cmd));
        dockerfile
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageTemplate {
    pub language: String,
    pub source_file_name: String,
    pub recipe: BuildRecipe,
}

impl LanguageTemplate {
    pub fn new(language: &str, source_file_name: &str, recipe: BuildRecipe) -> Self {
        Self {
            language: language.to_lowercase(),
            source_file_name: source_file_name.to_string(),
            recipe,
        }
    }
}

impl From<&LanguageConfig> for LanguageTemplate {
    fn from(config: &LanguageConfig) -> Self {
        let recipe = BuildRecipe {
            base_image: config.base_image.clone(),
            compile: config.compile.clone(),
            run: config.run.clone(),
        };
        LanguageTemplate::new(config.name.trim(), &config.source_file, recipe)
    }
}

/// Immutable language lookup table.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, LanguageTemplate>,
}

impl TemplateRegistry {
    pub fn empty() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Java (compiled), Python and JavaScript (interpreted).
    pub fn builtin() -> Self {
        Self::empty()
            .with_template(LanguageTemplate::new(
                "java",
                "Main.java",
                BuildRecipe::compiled("openjdk:17-slim", "javac Main.java", "java Main"),
            ))
            .with_template(LanguageTemplate::new(
                "python",
                "main.py",
                BuildRecipe::interpreted("python:3.11-slim", "python main.py"),
            ))
            .with_template(LanguageTemplate::new(
                "javascript",
                "index.js",
                BuildRecipe::interpreted("node:18-slim", "node index.js"),
            ))
    }

    /// Builtins plus the configured extras. Extras replace a builtin of the same name.
    pub fn from_config(languages: &[LanguageConfig]) -> Self {
        languages
            .iter()
            .fold(Self::builtin(), |registry, language| {
                registry.with_template(LanguageTemplate::from(language))
            })
    }

    pub fn with_template(mut self, template: LanguageTemplate) -> Self {
        if self.templates.contains_key(&template.language) {
            log::info!("Overriding language template '{}'", template.language);
        }
        self.templates.insert(template.language.clone(), template);
        self
    }

    /// Case-insensitive exact lookup.
    pub fn resolve(&self, language: &str) -> Result<&LanguageTemplate, ExecutionError> {
        self.templates
            .get(&language.to_lowercase())
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))
    }

    /// Registered language names, sorted.
    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

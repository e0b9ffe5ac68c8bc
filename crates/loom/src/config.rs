//! Engine Configuration

use loom_expr::{CompileOptions, Regex, RootRewrite, DEFAULT_FILTER_TEMPLATE};
use loom_reactive::{BinderOptions, DetectorOptions};
use serde::Deserialize;
use thiserror::Error;

/// Engine configuration options
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Turn the last statement into a `return`
    pub auto_return: bool,

    /// Run each expression as an immediately invoked function
    pub auto_wrap: bool,

    /// Enable `value | filter:arg` pipes
    pub allow_filters: bool,

    /// Filter invocation template (`%name`, `%value`, `%args`)
    pub filter_template: String,

    /// Template applied to root identifiers, e.g. `scope.%root`
    pub root_rewrite: Option<String>,

    /// Roots matching this pattern are left alone by `root_rewrite`
    pub root_rewrite_exclude: Option<String>,

    /// Read each dependency once into a local before the expression runs
    pub store_dependencies_locally: bool,

    /// Names found in no scope raise a ReferenceError. Turn off to have them
    /// read as `undefined`.
    pub strict_references: bool,

    /// Re-check bound for a node refreshed while it is being checked
    pub max_recheck_passes: usize,

    /// Evaluator recursion limit
    pub max_call_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            auto_return: true,
            auto_wrap: false,
            allow_filters: true,
            filter_template: DEFAULT_FILTER_TEMPLATE.to_owned(),
            root_rewrite: None,
            root_rewrite_exclude: None,
            store_dependencies_locally: false,
            strict_references: true,
            max_recheck_passes: 10,
            max_call_depth: 256,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid root_rewrite_exclude pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("root_rewrite template '{0}' has no %root placeholder")]
    MissingRootPlaceholder(String),

    #[error("filter_template '{0}' needs both %name and %value placeholders")]
    InvalidFilterTemplate(String),

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),
}

impl Config {
    /// Validated compiler options
    pub fn compile_options(&self) -> Result<CompileOptions, ConfigError> {
        if self.allow_filters
            && !(self.filter_template.contains("%name") && self.filter_template.contains("%value"))
        {
            return Err(ConfigError::InvalidFilterTemplate(self.filter_template.clone()));
        }

        let root_rewrite = match &self.root_rewrite {
            None => None,
            Some(template) if !template.contains("%root") => {
                return Err(ConfigError::MissingRootPlaceholder(template.clone()));
            }
            Some(template) => {
                let rewrite = RootRewrite::new(template.clone());
                Some(match &self.root_rewrite_exclude {
                    None => rewrite,
                    Some(pattern) => {
                        let exclude = Regex::new(pattern).map_err(|e| ConfigError::InvalidPattern {
                            pattern: pattern.clone(),
                            reason: e.to_string(),
                        })?;
                        rewrite.excluding(exclude)
                    }
                })
            }
        };

        Ok(CompileOptions {
            root_rewrite,
            allow_filters: self.allow_filters,
            filter_template: Some(self.filter_template.clone()),
            auto_return: self.auto_return,
            auto_wrap: self.auto_wrap,
            store_dependencies_locally: self.store_dependencies_locally,
        })
    }

    pub fn binder_options(&self) -> Result<BinderOptions, ConfigError> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::ZeroLimit("max_call_depth"));
        }
        Ok(BinderOptions { strict_references: self.strict_references, max_call_depth: self.max_call_depth })
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions { max_recheck_passes: self.max_recheck_passes }
    }
}

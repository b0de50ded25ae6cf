//! Code generation configuration
//!
//! Loaded from an optional JSON file and then overridden by command line
//! flags. Every field has a default so an empty object is a valid config.

use serde::Deserialize;

/// How statement-level errors are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticMode {
    /// Stop at the first error
    #[default]
    FailFast,
    /// Skip the failing statement and keep going; internal errors stay fatal
    CollectAll,
}

/// What a `try` does with an exception no clause matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledException {
    /// Continue after the try statement as if nothing was thrown
    #[default]
    FallThrough,
    /// Re-raise to the enclosing handler, or exit when there is none
    Abort,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CodegenConfig {
    /// Name recorded in the `ModuleID` header
    pub module_name: String,
    pub target_triple: Option<String>,
    /// Nesting depth at which a call raises `StackOverflowError`
    pub stack_depth_limit: u32,
    pub diagnostics: DiagnosticMode,
    pub unhandled_exception: UnhandledException,
    /// Qualified-name prefixes whose definitions get `linkonce_odr` linkage
    pub std_lib_prefixes: Vec<String>,
    /// Emit DWARF metadata and `!dbg` locations
    pub debug_info: bool,
    /// Source path recorded in `DIFile`; defaults to `<module_name>.bpl`
    pub source_file: Option<String>,
}

impl Default for CodegenConfig {
    fn default() -> Self {
        Self {
            module_name: "main".to_string(),
            target_triple: None,
            stack_depth_limit: 10000,
            diagnostics: DiagnosticMode::default(),
            unhandled_exception: UnhandledException::default(),
            std_lib_prefixes: vec!["std.".to_string()],
            debug_info: false,
            source_file: None,
        }
    }
}

impl CodegenConfig {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn source_path(&self) -> String {
        self.source_file.clone().unwrap_or_else(|| format!("{}.bpl", self.module_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_object_is_the_default() {
        assert_eq!(CodegenConfig::from_json("{}").unwrap(), CodegenConfig::default());
    }

    #[test]
    fn snake_case_enums() {
        let cfg = CodegenConfig::from_json(
            r#"{"diagnostics": "collect_all", "unhandled_exception": "abort", "stack_depth_limit": 64}"#,
        )
        .unwrap();
        assert_eq!(cfg.diagnostics, DiagnosticMode::CollectAll);
        assert_eq!(cfg.unhandled_exception, UnhandledException::Abort);
        assert_eq!(cfg.stack_depth_limit, 64);
        assert_eq!(cfg.module_name, "main");
    }

    #[test]
    fn debug_info_is_off_unless_asked_for() {
        assert!(!CodegenConfig::default().debug_info);
        let cfg = CodegenConfig::from_json(r#"{"debug_info": true, "module_name": "demo"}"#).unwrap();
        assert!(cfg.debug_info);
        assert_eq!(cfg.source_path(), "demo.bpl");
        let cfg = CodegenConfig::from_json(r#"{"source_file": "src/app.bpl"}"#).unwrap();
        assert_eq!(cfg.source_path(), "src/app.bpl");
    }
}

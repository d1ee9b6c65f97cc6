#[cfg(feature = "cli")]
pub mod cli;
pub mod descriptor;
pub mod runtime;

pub use runtime::{CacheConfig, ExecutionConfig, LoggingConfig, RuntimeConfig, TelemetryConfig};

use regex::Regex;
use std::sync::OnceLock;

/// 替換環境變數 (例如 ${MODEL_DIR})，未設定的變數保持原樣
pub(crate) fn substitute_env_vars(content: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").unwrap());

    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_variables_are_kept() {
        assert_eq!(
            substitute_env_vars("path = \"${SHEET_CALC_SURELY_UNSET}/model.json\""),
            "path = \"${SHEET_CALC_SURELY_UNSET}/model.json\""
        );
    }
}

//! Secret handling
//!
//! Secrets (Discord bot token, LLM API key) come from the environment or from a
//! `.config.env` file (`KEY=value` lines). They are never logged in full; use
//! [`mask_credential`] whenever one has to appear in a log line.

use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Name of the dotenv-style secrets file looked up in the working directory and in `~/.parakeet/`.
pub const CONFIG_ENV_FILE: &str = ".config.env";

/// Parse `KEY=value` lines. Blank lines and `#` comments are skipped; values may be quoted.
pub fn parse_env_file(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| {
            let l = l.strip_prefix("export ").unwrap_or(l);
            let (k, v) = l.split_once('=')?;
            let k = k.trim();
            if k.is_empty() {
                return None;
            }
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            Some((k.to_string(), v.to_string()))
        })
        .collect()
}

/// Read a `.config.env`-style file. Missing or unreadable file yields an empty map.
pub fn read_env_file(path: &Path) -> HashMap<String, String> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let vars = parse_env_file(&content);
            debug!("Secrets: read {} key(s) from {}", vars.len(), path.display());
            vars
        }
        Err(_) => HashMap::new(),
    }
}

/// Mask a credential for logging (shows only first/last few characters)
pub fn mask_credential(credential: &str) -> String {
    let chars: Vec<char> = credential.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_credential() {
        assert_eq!(mask_credential("short"), "****");
        assert_eq!(mask_credential("verylongtoken12345"), "very...2345");
        assert_eq!(mask_credential("ééééééééééé"), "éééé...éééé");
    }

    #[test]
    fn test_parse_env_file() {
        let vars = parse_env_file(
            "# secrets\nDISCORD_BOT_TOKEN=abc.def\n\nexport OPENAI_API_KEY=\"sk-123\"\nOPT_IN_ROLE_NAME='AI Trainer'\nbroken line\n=novalue\n",
        );
        assert_eq!(vars.get("DISCORD_BOT_TOKEN").map(String::as_str), Some("abc.def"));
        assert_eq!(vars.get("OPENAI_API_KEY").map(String::as_str), Some("sk-123"));
        assert_eq!(vars.get("OPT_IN_ROLE_NAME").map(String::as_str), Some("AI Trainer"));
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn test_read_missing_env_file() {
        assert!(read_env_file(Path::new("/definitely/not/here/.config.env")).is_empty());
    }
}

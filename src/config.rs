//! Configuration file loading and merging with CLI flags.
//!
//! The file is a flat list of `key = value` lines (a TOML subset). Strings
//! are double-quoted; `#` starts a comment outside strings.
//!
//! ```toml
//! output_dir = "/srv/mirror"
//! fetch_limit = 500          # 0 disables the limit
//! max_connections = 8
//! filter_id = 56027
//! save_tags = true
//! ```

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use booru_sync::client::{DEFAULT_PAGE_SIZE, SearchClientConfig, SearchParams};
use booru_sync::sync::{
    DEFAULT_BASE_DIR, DEFAULT_FETCH_LIMIT, DEFAULT_REPRESENTATION, SyncOptions,
};

use crate::cli::DownloadArgs;

const APP_DIR: &str = "booru-sync";
const MAX_PER_PAGE: u32 = 50;

/// Values read from the configuration file. Unset keys stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Base directory for sync directories.
    pub output_dir: Option<PathBuf>,
    /// Records per run; `Some(None)` when the file disables the limit.
    #[allow(clippy::option_option)]
    pub fetch_limit: Option<Option<usize>>,
    pub max_connections: Option<usize>,
    pub filter_id: Option<u64>,
    pub base_url: Option<String>,
    pub per_page: Option<u32>,
    pub representation: Option<String>,
    pub save_tags: Option<bool>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Validates values against the ranges the CLI accepts.
    pub fn validate(&self) -> Result<()> {
        if let Some(max_connections) = self.max_connections
            && !(1..=50).contains(&max_connections)
        {
            bail!(
                "Invalid config value for `max_connections`: {max_connections}. Expected range: 1..=50"
            );
        }
        if let Some(per_page) = self.per_page
            && !(1..=MAX_PER_PAGE).contains(&per_page)
        {
            bail!(
                "Invalid config value for `per_page`: {per_page}. Expected range: 1..={MAX_PER_PAGE}"
            );
        }
        if let Some(base_url) = &self.base_url
            && url::Url::parse(base_url).is_err()
        {
            bail!("Invalid config value for `base_url`: '{base_url}' is not a URL");
        }
        if let Some(representation) = &self.representation
            && representation.trim().is_empty()
        {
            bail!("Invalid config value for `representation`: must not be empty");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/booru-sync/config.toml`
/// 2. `$HOME/.config/booru-sync/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    config_path_from(env_var_non_empty_os("XDG_CONFIG_HOME"), env_var_non_empty_os("HOME"))
}

fn config_path_from(xdg_config_home: Option<OsString>, home: Option<OsString>) -> Option<PathBuf> {
    if let Some(xdg_config_home) = xdg_config_home {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }
    let home = home?;
    Some(PathBuf::from(home).join(".config").join(APP_DIR).join("config.toml"))
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    let config = match path.as_deref() {
        Some(path_ref) if path_ref.exists() => Some(load_file_config(path_ref)?),
        _ => None,
    };
    Ok(LoadedConfig { path, config })
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let line_no = line_index + 1;

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };
        let key = raw_key.trim();
        let value = raw_value.trim();
        let invalid = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => {
                cfg.output_dir = Some(PathBuf::from(
                    parse_string_literal(value).with_context(invalid)?,
                ));
            }
            "fetch_limit" => {
                let parsed = parse_usize(value).with_context(invalid)?;
                cfg.fetch_limit = Some((parsed > 0).then_some(parsed));
            }
            "max_connections" => {
                cfg.max_connections = Some(parse_usize(value).with_context(invalid)?);
            }
            "filter_id" => {
                cfg.filter_id = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "base_url" => {
                let parsed = parse_string_literal(value).with_context(invalid)?;
                cfg.base_url = Some(parsed);
            }
            "per_page" => {
                let parsed = parse_integer_u64(value).with_context(invalid)?;
                let per_page = u32::try_from(parsed).with_context(invalid)?;
                cfg.per_page = Some(per_page);
            }
            "representation" => {
                cfg.representation = Some(parse_string_literal(value).with_context(invalid)?);
            }
            "save_tags" => {
                cfg.save_tags = Some(parse_boolean(value).with_context(invalid)?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(invalid)?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Cuts `line` at the first `#` that is not inside a quoted string.
fn strip_inline_comment(line: &str) -> &str {
    let mut quoted = false;
    let cut = line.char_indices().find_map(|(index, ch)| {
        if ch == '"' {
            quoted = !quoted;
        }
        (ch == '#' && !quoted).then_some(index)
    });
    cut.map_or(line, |index| &line[..index])
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    raw_value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .map(str::to_string)
        .context("Expected double-quoted string")
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.starts_with('-') {
        bail!("Expected non-negative integer, got '{token}'");
    }
    token
        .parse::<u64>()
        .with_context(|| format!("Expected integer value, got '{token}'"))
}

fn parse_usize(raw_value: &str) -> Result<usize> {
    let value = parse_integer_u64(raw_value)?;
    usize::try_from(value).context("Integer value out of range")
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    raw_value
        .trim()
        .parse::<bool>()
        .context("Expected 'true' or 'false'")
}

/// Client settings from the file config over built-in defaults.
///
/// Every subcommand builds its client through this, so file values apply
/// the same way everywhere.
#[must_use]
pub fn resolve_client(file: Option<&FileConfig>) -> SearchClientConfig {
    let defaults = SearchClientConfig::default();
    let Some(file) = file else {
        return defaults;
    };
    SearchClientConfig {
        base_url: file.base_url.clone().unwrap_or(defaults.base_url),
        filter_id: file.filter_id.unwrap_or(defaults.filter_id),
        max_connections: file.max_connections.unwrap_or(defaults.max_connections),
        connect_timeout_secs: file
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs),
        read_timeout_secs: file.read_timeout_secs.unwrap_or(defaults.read_timeout_secs),
    }
}

/// Everything a `download` run needs, after merging flags over file values
/// over built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub query: String,
    pub base_dir: PathBuf,
    pub client: SearchClientConfig,
    pub options: SyncOptions,
}

/// Merges `download` flags with the file config.
pub fn resolve_download(args: &DownloadArgs, file: Option<&FileConfig>) -> Result<DownloadSettings> {
    let empty = FileConfig::default();
    let file = file.unwrap_or(&empty);

    let query = args.query.trim();
    if query.is_empty() {
        bail!("Search query must not be empty");
    }

    let base_dir = args
        .dir
        .clone()
        .or_else(|| file.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_DIR));

    let fetch_limit = if args.no_limit {
        None
    } else if let Some(limit) = args.limit {
        Some(limit)
    } else {
        file.fetch_limit.unwrap_or(Some(DEFAULT_FETCH_LIMIT))
    };

    let mut client = resolve_client(Some(file));
    if let Some(base_url) = &args.base_url {
        client.base_url.clone_from(base_url);
    }
    if let Some(filter_id) = args.filter_id {
        client.filter_id = filter_id;
    }
    if let Some(max_connections) = args.max_connections {
        client.max_connections = max_connections;
    }
    let filter_id = client.filter_id;

    let params = SearchParams {
        per_page: args.per_page.or(file.per_page).unwrap_or(DEFAULT_PAGE_SIZE),
        filter_id: Some(filter_id),
        ..SearchParams::default()
    };

    let options = SyncOptions {
        incremental: !args.check_all,
        save_tags: args.save_tags || file.save_tags.unwrap_or(false),
        fetch_limit,
        start_page: args.start_page,
        params,
        representation: args
            .representation
            .clone()
            .or_else(|| file.representation.clone())
            .unwrap_or_else(|| DEFAULT_REPRESENTATION.to_string()),
        show_progress: false,
    };

    Ok(DownloadSettings {
        query: query.to_string(),
        base_dir,
        client,
        options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use booru_sync::client::Filters;
    use clap::Parser;

    fn download_args(argv: &[&str]) -> DownloadArgs {
        let mut full = vec!["booru-sync", "download"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Download(args) => args,
            Command::Featured => panic!("expected download subcommand"),
        }
    }

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
max_connections = 8
representation = "large"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.max_connections, Some(8));
        assert_eq!(cfg.representation.as_deref(), Some("large"));
        assert!(cfg.output_dir.is_none());
        assert!(cfg.fetch_limit.is_none());
    }

    #[test]
    fn test_parse_config_fetch_limit_zero_disables_limit() {
        let cfg = parse_config_str("fetch_limit = 0").unwrap();
        assert_eq!(cfg.fetch_limit, Some(None));

        let cfg = parse_config_str("fetch_limit = 1000").unwrap();
        assert_eq!(cfg.fetch_limit, Some(Some(1000)));
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
output_dir = "/srv/mirror#1" # base directory
filter_id = 56027 # everything
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.output_dir, Some(PathBuf::from("/srv/mirror#1")));
        assert_eq!(cfg.filter_id, Some(Filters::EVERYTHING));
    }

    #[test]
    fn test_parse_config_rejects_invalid_max_connections() {
        let err = parse_config_str("max_connections = 0").expect_err("0 is below range");
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn test_parse_config_rejects_per_page_above_api_maximum() {
        let err = parse_config_str("per_page = 51").expect_err("51 is above range");
        assert!(err.to_string().contains("per_page"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err = parse_config_str("read_timeout_secs = 0").expect_err("invalid timeout expected");
        assert!(err.to_string().contains("read_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_unquoted_string() {
        let err = parse_config_str("base_url = http://localhost").expect_err("unquoted string");
        assert!(err.to_string().contains("base_url"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_boolean() {
        let err = parse_config_str("save_tags = yes").expect_err("invalid boolean expected");
        assert!(err.to_string().contains("save_tags"));
    }

    #[test]
    fn test_parse_config_rejects_negative_numbers() {
        let err = parse_config_str("fetch_limit = -5").expect_err("negative limit");
        assert!(err.to_string().contains("fetch_limit"));
    }

    #[test]
    fn test_parse_config_rejects_lone_quote() {
        let err = parse_config_str("representation = \"").expect_err("unterminated string");
        assert!(err.to_string().contains("representation"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("filter_id = 4 trailing").expect_err("trailing token error");
        assert!(err.to_string().contains("filter_id"));
    }

    #[test]
    fn test_parse_config_rejects_missing_equals() {
        let err = parse_config_str("save_tags").expect_err("syntax error expected");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("unknown_key = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("unknown_key"));
    }

    #[test]
    fn test_config_path_prefers_xdg_config_home() {
        let path = config_path_from(Some("/xdg".into()), Some("/home/me".into()));
        assert_eq!(path, Some(PathBuf::from("/xdg/booru-sync/config.toml")));
    }

    #[test]
    fn test_config_path_falls_back_to_home() {
        let path = config_path_from(None, Some("/home/me".into()));
        assert_eq!(
            path,
            Some(PathBuf::from("/home/me/.config/booru-sync/config.toml"))
        );
        assert_eq!(config_path_from(None, None), None);
    }

    #[test]
    fn test_resolve_download_defaults_without_config() {
        let settings = resolve_download(&download_args(&["oc:hardy"]), None).unwrap();

        assert_eq!(settings.query, "oc:hardy");
        assert_eq!(settings.base_dir, PathBuf::from(DEFAULT_BASE_DIR));
        assert_eq!(settings.options.fetch_limit, Some(DEFAULT_FETCH_LIMIT));
        assert!(settings.options.incremental);
        assert!(!settings.options.save_tags);
        assert_eq!(settings.options.start_page, 1);
        assert_eq!(settings.options.params.per_page, DEFAULT_PAGE_SIZE);
        assert_eq!(settings.options.params.filter_id, Some(Filters::DEFAULT));
        assert_eq!(settings.client, SearchClientConfig::default());
    }

    #[test]
    fn test_resolve_download_flags_override_file() {
        let file = FileConfig {
            output_dir: Some(PathBuf::from("/from-file")),
            fetch_limit: Some(Some(10)),
            max_connections: Some(2),
            ..FileConfig::default()
        };
        let args = download_args(&["q", "--dir", "/from-flag", "-l", "20"]);

        let settings = resolve_download(&args, Some(&file)).unwrap();

        assert_eq!(settings.base_dir, PathBuf::from("/from-flag"));
        assert_eq!(settings.options.fetch_limit, Some(20));
        assert_eq!(settings.client.max_connections, 2);
    }

    #[test]
    fn test_resolve_download_file_can_disable_limit() {
        let file = FileConfig {
            fetch_limit: Some(None),
            save_tags: Some(true),
            ..FileConfig::default()
        };

        let settings = resolve_download(&download_args(&["q"]), Some(&file)).unwrap();

        assert_eq!(settings.options.fetch_limit, None);
        assert!(settings.options.save_tags);
    }

    #[test]
    fn test_resolve_download_no_limit_and_check_all() {
        let args = download_args(&["q", "--no-limit", "--check-all", "--save-tags"]);

        let settings = resolve_download(&args, None).unwrap();

        assert_eq!(settings.options.fetch_limit, None);
        assert!(!settings.options.incremental);
        assert!(settings.options.save_tags);
    }

    #[test]
    fn test_resolve_client_applies_every_file_setting() {
        let file = FileConfig {
            base_url: Some("http://mirror.test/api".to_string()),
            filter_id: Some(Filters::EVERYTHING),
            max_connections: Some(3),
            connect_timeout_secs: Some(5),
            read_timeout_secs: Some(60),
            ..FileConfig::default()
        };

        let client = resolve_client(Some(&file));

        assert_eq!(
            client,
            SearchClientConfig {
                base_url: "http://mirror.test/api".to_string(),
                filter_id: Filters::EVERYTHING,
                max_connections: 3,
                connect_timeout_secs: 5,
                read_timeout_secs: 60,
            }
        );
        assert_eq!(resolve_client(None), SearchClientConfig::default());
    }

    #[test]
    fn test_resolve_download_uses_file_timeouts_and_flag_overrides() {
        let file = FileConfig {
            filter_id: Some(Filters::EVERYTHING),
            read_timeout_secs: Some(90),
            ..FileConfig::default()
        };
        let args = download_args(&["q", "--filter-id", "7", "--base-url", "http://flag.test"]);

        let settings = resolve_download(&args, Some(&file)).unwrap();

        assert_eq!(settings.client.read_timeout_secs, 90);
        assert_eq!(settings.client.filter_id, 7);
        assert_eq!(settings.options.params.filter_id, Some(7));
        assert_eq!(settings.client.base_url, "http://flag.test");
    }

    #[test]
    fn test_resolve_download_rejects_blank_query() {
        let err = resolve_download(&download_args(&["   "]), None).unwrap_err();
        assert!(err.to_string().contains("query"));
    }
}
